use std::fmt;
use std::str::FromStr;

/// Annotation families that can be requested from the webclient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnnotationKind {
    Map,
    Tag,
    Comment,
    File,
    Rating,
}

impl AnnotationKind {
    pub const ALL: [AnnotationKind; 5] = [
        AnnotationKind::Map,
        AnnotationKind::Tag,
        AnnotationKind::Comment,
        AnnotationKind::File,
        AnnotationKind::Rating,
    ];

    /// Value of the `type` query parameter.
    pub const fn as_str(self) -> &'static str {
        match self {
            AnnotationKind::Map => "map",
            AnnotationKind::Tag => "tag",
            AnnotationKind::Comment => "comment",
            AnnotationKind::File => "file",
            AnnotationKind::Rating => "rating",
        }
    }

    /// Kind of a server annotation class such as `MapAnnotationI`.
    ///
    /// Ratings are long annotations; the namespace tells them apart.
    pub fn from_class(class: &str, namespace: Option<&str>) -> Option<Self> {
        match class.trim_end_matches('I') {
            "MapAnnotation" => Some(AnnotationKind::Map),
            "TagAnnotation" => Some(AnnotationKind::Tag),
            "CommentAnnotation" => Some(AnnotationKind::Comment),
            "FileAnnotation" => Some(AnnotationKind::File),
            "LongAnnotation" if namespace.is_some_and(|ns| ns.ends_with(RATING_NAMESPACE_SUFFIX)) => {
                Some(AnnotationKind::Rating)
            }
            _ => None,
        }
    }
}

/// Namespaces of rating annotations end with this.
const RATING_NAMESPACE_SUFFIX: &str = "omero/insight/rating";

impl fmt::Display for AnnotationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AnnotationKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AnnotationKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown annotation kind '{}'", s))
    }
}

/// An annotation attached to a server entity.
#[derive(Debug, Clone, PartialEq)]
pub enum Annotation {
    /// Key-value pairs, in server order (keys may repeat)
    Map {
        id: i64,
        namespace: Option<String>,
        pairs: Vec<(String, String)>,
    },
    Tag {
        id: i64,
        value: String,
    },
    Comment {
        id: i64,
        value: String,
    },
    /// Attachment metadata; the content itself is not downloaded
    File {
        id: i64,
        name: String,
        size: Option<u64>,
        mime_type: Option<String>,
    },
    /// Star rating, 0 to 5
    Rating {
        id: i64,
        value: u8,
    },
}

impl Annotation {
    pub fn id(&self) -> i64 {
        match self {
            Annotation::Map { id, .. }
            | Annotation::Tag { id, .. }
            | Annotation::Comment { id, .. }
            | Annotation::File { id, .. }
            | Annotation::Rating { id, .. } => *id,
        }
    }

    pub fn kind(&self) -> AnnotationKind {
        match self {
            Annotation::Map { .. } => AnnotationKind::Map,
            Annotation::Tag { .. } => AnnotationKind::Tag,
            Annotation::Comment { .. } => AnnotationKind::Comment,
            Annotation::File { .. } => AnnotationKind::File,
            Annotation::Rating { .. } => AnnotationKind::Rating,
        }
    }
}
