use std::fmt;
use std::str::FromStr;

use crate::ConfigurationError;

/// Object categories known to the feed API, with the singular and plural
/// names the API uses in element attributes and resource paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ObjectCategory {
    Activity,
    Equipment,
    Grant,
    OrgStructure,
    Project,
    Publication,
    User,
    TeachingActivity,
    Impact,
}

impl ObjectCategory {
    pub const ALL: [ObjectCategory; 9] = [
        ObjectCategory::Activity,
        ObjectCategory::Equipment,
        ObjectCategory::Grant,
        ObjectCategory::OrgStructure,
        ObjectCategory::Project,
        ObjectCategory::Publication,
        ObjectCategory::User,
        ObjectCategory::TeachingActivity,
        ObjectCategory::Impact,
    ];

    pub fn singular(self) -> &'static str {
        match self {
            ObjectCategory::Activity => "activity",
            ObjectCategory::Equipment => "equipment",
            ObjectCategory::Grant => "grant",
            ObjectCategory::OrgStructure => "org-structure",
            ObjectCategory::Project => "project",
            ObjectCategory::Publication => "publication",
            ObjectCategory::User => "user",
            ObjectCategory::TeachingActivity => "teaching-activity",
            ObjectCategory::Impact => "impact",
        }
    }

    pub fn plural(self) -> &'static str {
        match self {
            ObjectCategory::Activity => "activities",
            ObjectCategory::Equipment => "equipment",
            ObjectCategory::Grant => "grants",
            ObjectCategory::OrgStructure => "org-structures",
            ObjectCategory::Project => "projects",
            ObjectCategory::Publication => "publications",
            ObjectCategory::User => "users",
            ObjectCategory::TeachingActivity => "teaching-activities",
            ObjectCategory::Impact => "impact-records",
        }
    }
}

impl FromStr for ObjectCategory {
    type Err = ConfigurationError;

    /// Accepts either the singular or the plural name.
    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let lookup = value.trim();
        ObjectCategory::ALL
            .iter()
            .copied()
            .find(|c| c.singular() == lookup || c.plural() == lookup)
            .ok_or_else(|| ConfigurationError::UnknownCategory(value.to_string()))
    }
}

impl fmt::Display for ObjectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.singular())
    }
}

/// Top-level kind of an item, independent of object category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemKind {
    Object,
    Relationship,
    RelationshipType,
    Group,
}

impl ItemKind {
    pub fn name(self) -> &'static str {
        match self {
            ItemKind::Object => "object",
            ItemKind::Relationship => "relationship",
            ItemKind::RelationshipType => "relationship_type",
            ItemKind::Group => "group",
        }
    }
}

/// Identity of a harvested item. Used as the store key and as the unit of
/// failure attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ItemIdentity {
    Object { category: ObjectCategory, id: u32 },
    Relationship(u32),
    Group(u32),
    RelationshipType(u32),
}

impl ItemIdentity {
    pub fn object(category: ObjectCategory, id: u32) -> Self {
        ItemIdentity::Object { category, id }
    }

    pub fn id(&self) -> u32 {
        match *self {
            ItemIdentity::Object { id, .. } => id,
            ItemIdentity::Relationship(id)
            | ItemIdentity::Group(id)
            | ItemIdentity::RelationshipType(id) => id,
        }
    }

    pub fn object_category(&self) -> Option<ObjectCategory> {
        match *self {
            ItemIdentity::Object { category, .. } => Some(category),
            _ => None,
        }
    }

    pub fn kind(&self) -> ItemKind {
        match self {
            ItemIdentity::Object { .. } => ItemKind::Object,
            ItemIdentity::Relationship(_) => ItemKind::Relationship,
            ItemIdentity::Group(_) => ItemKind::Group,
            ItemIdentity::RelationshipType(_) => ItemKind::RelationshipType,
        }
    }

    /// Distinguishing name: the object category for objects, the kind otherwise.
    pub fn descriptor(&self) -> &'static str {
        match self {
            ItemIdentity::Object { category, .. } => category.singular(),
            other => other.kind().name(),
        }
    }
}

impl fmt::Display for ItemIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.descriptor(), self.id())
    }
}
