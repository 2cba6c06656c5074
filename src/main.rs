//! OMERO client - command-line front end.
//!
//! Connects to a server and exercises the library: server check, hierarchy
//! browsing and tile reading.

use clap::Parser;
use std::process::ExitCode;
use tracing::error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use omero_client::{
    config::{BrowseConfig, CheckConfig, Cli, Command, Config, TileConfig},
    Client, ClientError, EntityFilter, NodeId, RepositoryEntity,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Command::Check(config) => run_check(config).await,
        Command::Browse(config) => run_browse(config).await,
        Command::Tile(config) => run_tile(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "omero_client=debug"
    } else {
        "omero_client=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Validate the configuration and connect.
async fn connect(config: &Config) -> Result<Client, ExitCode> {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return Err(ExitCode::FAILURE);
    }

    match Client::connect(&config.server, config.credentials(), config.client_options()).await {
        Ok(client) => Ok(client),
        Err(e) => {
            error!("Failed to connect to {}: {}", config.server, e);
            if matches!(e, ClientError::Authentication(_)) {
                error!("  Check the username and password");
            }
            Err(ExitCode::FAILURE)
        }
    }
}

// =============================================================================
// Check Command
// =============================================================================

async fn run_check(config: CheckConfig) -> ExitCode {
    let client = match connect(&config.config).await {
        Ok(client) => client,
        Err(code) => return code,
    };

    let state = client.browser().snapshot();
    println!("OMERO Server Check");
    println!("══════════════════");
    println!();
    println!("✓ Server: {}", client.api().web_server_uri());
    println!("✓ Server id: {}", client.api().server_id());
    println!("✓ User: {}", state.username_label());
    println!();

    println!("Groups:");
    for group in client.server().groups() {
        let owners = client.server().owners_of(group);
        println!("  [{}] {} ({} owners)", group.id, group.name, owners.len());
    }
    println!();

    println!("Pixel APIs:");
    for api in client.registry().apis() {
        println!(
            "  {} {}{}",
            if api.is_available() { "✓" } else { "✗" },
            api.name(),
            if api.can_access_raw_pixels() { " (raw pixels)" } else { "" }
        );
    }
    if let Some(selected) = state.selected_pixel_api {
        println!();
        println!("Selected pixel API: {}", selected);
    }

    client.close().await;
    ExitCode::SUCCESS
}

// =============================================================================
// Browse Command
// =============================================================================

async fn run_browse(config: BrowseConfig) -> ExitCode {
    let client = match connect(&config.config).await {
        Ok(client) => client,
        Err(code) => return code,
    };

    let mut filter = EntityFilter::default();
    if let Some(text) = &config.filter {
        filter = filter.text(text.as_str());
    }
    if let Some(id) = config.group {
        match client.server().group(id) {
            Some(group) => filter = filter.group(group.clone()),
            None => {
                error!("Unknown group {}", id);
                client.close().await;
                return ExitCode::FAILURE;
            }
        }
    }
    if let Some(id) = config.owner {
        match client.server().owners().iter().find(|o| o.id == id) {
            Some(owner) => filter = filter.owner(owner.clone()),
            None => {
                error!("Unknown owner {}", id);
                client.close().await;
                return ExitCode::FAILURE;
            }
        }
    }

    let code = match browse(&client, &filter, config.orphaned).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to browse: {}", e);
            ExitCode::FAILURE
        }
    };
    client.close().await;
    code
}

/// Load the whole tree, then print the filtered view of it.
async fn browse(client: &Client, filter: &EntityFilter, orphaned: bool) -> Result<(), ClientError> {
    let hierarchy = client.hierarchy();
    let roots = client.expand(NodeId::Server).await?;

    for root in roots.iter() {
        match root {
            RepositoryEntity::Project(project) => {
                let datasets = client.expand(NodeId::Project(project.id)).await?;
                for dataset in datasets.iter() {
                    if let Some(node) = NodeId::of(dataset) {
                        client.expand(node).await?;
                    }
                }
            }
            RepositoryEntity::OrphanedFolder if orphaned => {
                client.expand(NodeId::OrphanedFolder).await?;
            }
            _ => {}
        }
    }

    print_level(client, NodeId::Server, filter, 0);

    let state = client.browser().snapshot();
    if orphaned {
        println!();
        println!(
            "Orphaned images: {}/{}",
            state.orphaned_images_loaded, state.orphaned_images_total
        );
    }
    println!("Remote loads: {}", hierarchy.loads());
    Ok(())
}

fn print_level(client: &Client, node: NodeId, filter: &EntityFilter, depth: usize) {
    for child in client.hierarchy().filtered_children(node, filter) {
        let marker = match &child {
            RepositoryEntity::Image(image) if !client.is_supported(image) => " (unsupported)",
            _ => "",
        };
        let id = child
            .server_identity()
            .map(|(kind, id)| format!(" [{}-{}]", kind, id))
            .unwrap_or_default();
        println!("{}{}{}{}", "  ".repeat(depth), child.label(), id, marker);

        if let Some(child_node) = NodeId::of(&child) {
            print_level(client, child_node, filter, depth + 1);
        }
    }
}

// =============================================================================
// Tile Command
// =============================================================================

async fn run_tile(config: TileConfig) -> ExitCode {
    if let Err(e) = config.validate() {
        init_logging(config.config.verbose);
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }
    let client = match connect(&config.config).await {
        Ok(client) => client,
        Err(code) => return code,
    };

    let code = match read_tile(&client, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("Failed to read tile: {}", e);
            ExitCode::FAILURE
        }
    };
    client.close().await;
    code
}

async fn read_tile(client: &Client, config: &TileConfig) -> Result<(), ClientError> {
    let session = client.open_image(config.image).await?;
    let image = session.image();

    println!("Image {}: {}", image.id, image.name);
    println!(
        "  {}x{} px, {} channel(s), {} level(s), {}",
        image.dimensions.width,
        image.dimensions.height,
        image.channel_count(),
        image.dimensions.resolution_levels,
        image
            .pixel_type
            .map(|p| p.to_string())
            .unwrap_or_else(|| "unknown type".to_string())
    );
    println!("  Pixel API: {}", session.api());

    let request = session
        .tile_request(config.level, config.x, config.y, config.width, config.height)
        .at_plane(config.z, config.t);
    let result = session.read_tile(&request).await;
    session.close().await;
    let response = result?;
    let tile = &response.tile;

    println!();
    println!("Tile {}", request);
    println!(
        "  {}x{} px, {} band(s) of {}",
        tile.width(),
        tile.height(),
        tile.band_count(),
        tile.pixel_type()
    );
    for band in 0..tile.band_count() {
        if let Some(stats) = tile.band_stats(band) {
            println!(
                "  band {}: min {:.2}, max {:.2}, mean {:.2}",
                band, stats.min, stats.max, stats.mean
            );
        }
    }
    Ok(())
}
