/// Identifier used by the "all groups" and "all members" pseudo-entities.
pub const ALL_ID: i64 = -1;

/// An experimenter that owns entities on the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Owner {
    pub id: i64,
    pub first_name: String,
    pub middle_name: String,
    pub last_name: String,
    pub username: String,
}

impl Owner {
    pub fn new(
        id: i64,
        first_name: impl Into<String>,
        middle_name: impl Into<String>,
        last_name: impl Into<String>,
        username: impl Into<String>,
    ) -> Self {
        Self {
            id,
            first_name: first_name.into(),
            middle_name: middle_name.into(),
            last_name: last_name.into(),
            username: username.into(),
        }
    }

    /// Pseudo-owner matching every owner when used as a filter.
    pub fn all_members() -> Self {
        Self::new(ALL_ID, "All members", "", "", "")
    }

    pub fn is_all_members(&self) -> bool {
        self.id == ALL_ID
    }

    /// "First Middle Last", skipping empty parts.
    pub fn full_name(&self) -> String {
        let name = [
            self.first_name.as_str(),
            self.middle_name.as_str(),
            self.last_name.as_str(),
        ]
        .iter()
        .filter(|part| !part.is_empty())
        .copied()
        .collect::<Vec<_>>()
        .join(" ");

        if name.is_empty() {
            self.username.clone()
        } else {
            name
        }
    }
}

/// A group of experimenters. Groups and owners are many-to-many.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: i64,
    pub name: String,
    pub owners: Vec<Owner>,
}

impl Group {
    pub fn new(id: i64, name: impl Into<String>, owners: Vec<Owner>) -> Self {
        Self {
            id,
            name: name.into(),
            owners,
        }
    }

    /// The distinguished pseudo-group standing for every group.
    ///
    /// It is never a real remote group and has no owners of its own; its
    /// members are all owners known to the server.
    pub fn all_groups() -> Self {
        Self::new(ALL_ID, "All groups", Vec::new())
    }

    pub fn is_all_groups(&self) -> bool {
        self.id == ALL_ID
    }

    /// Light reference to this group for entity ownership.
    pub fn to_ref(&self) -> GroupRef {
        GroupRef {
            id: self.id,
            name: self.name.clone(),
        }
    }
}

/// Group identity as carried by an entity's ownership details.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GroupRef {
    pub id: i64,
    pub name: String,
}
