use chrono::{DateTime, Utc};

use crate::ObjectCategory;

/// Default number of ids per explicit batch request.
pub const DEFAULT_ID_BATCH: usize = 100;

/// Whether a query is restricted to recent changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Delta {
    #[default]
    Full,
    ModifiedSince(DateTime<Utc>),
    DeletedSince(DateTime<Utc>),
}

impl Delta {
    pub fn since(&self) -> Option<DateTime<Utc>> {
        match *self {
            Delta::Full => None,
            Delta::ModifiedSince(at) | Delta::DeletedSince(at) => Some(at),
        }
    }

    pub fn is_deleted(&self) -> bool {
        matches!(self, Delta::DeletedSince(_))
    }
}

/// Filter for object feeds.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ObjectQuery {
    pub category: Option<ObjectCategory>,
    pub groups: Vec<u32>,
    pub explicit_members_only: bool,
    pub approved_only: bool,
    pub delta: Delta,
}

impl ObjectQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn category(category: ObjectCategory) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }

    pub fn modified_since(mut self, at: DateTime<Utc>) -> Self {
        self.delta = Delta::ModifiedSince(at);
        self
    }

    pub fn deleted_since(mut self, at: DateTime<Utc>) -> Self {
        self.delta = Delta::DeletedSince(at);
        self
    }

    pub fn in_groups(mut self, groups: impl IntoIterator<Item = u32>, explicit_only: bool) -> Self {
        self.groups = groups.into_iter().collect();
        self.explicit_members_only = explicit_only && !self.groups.is_empty();
        self
    }

    pub fn approved_only(mut self) -> Self {
        self.approved_only = true;
        self
    }
}

/// Filter for relationship feeds.
///
/// An explicit id batch takes precedence over `delta` when URLs are built.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RelationshipQuery {
    pub type_ids: Vec<u32>,
    pub delta: Delta,
    pub ids: Option<Vec<u32>>,
}

impl RelationshipQuery {
    pub fn all() -> Self {
        Self::default()
    }

    /// Explicit id batch. Duplicates are dropped, first occurrence wins.
    pub fn by_ids(ids: impl IntoIterator<Item = u32>) -> Self {
        let mut seen = std::collections::HashSet::new();
        let ids = ids.into_iter().filter(|id| seen.insert(*id)).collect();
        Self {
            ids: Some(ids),
            ..Self::default()
        }
    }

    pub fn of_types(mut self, type_ids: impl IntoIterator<Item = u32>) -> Self {
        self.type_ids = type_ids.into_iter().collect();
        self
    }

    pub fn modified_since(mut self, at: DateTime<Utc>) -> Self {
        self.delta = Delta::ModifiedSince(at);
        self
    }

    pub fn deleted_since(mut self, at: DateTime<Utc>) -> Self {
        self.delta = Delta::DeletedSince(at);
        self
    }

    /// The delta that applies to URL construction: none for id batches.
    pub fn effective_delta(&self) -> Delta {
        if self.ids.is_some() {
            Delta::Full
        } else {
            self.delta
        }
    }
}

/// What a query harvests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryTarget {
    Objects(ObjectQuery),
    Relationships(RelationshipQuery),
    RelationshipTypes,
    Groups,
}

/// Per-query paging behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingOptions {
    pub process_all_pages: bool,
    /// Requested page size; zero or below leaves the server default.
    pub per_page: i32,
}

/// Paging defaults keyed by detail level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingDefaults {
    pub process_all_pages: bool,
    pub per_page_full: i32,
    pub per_page_ref: i32,
}

impl Default for ProcessingDefaults {
    fn default() -> Self {
        Self {
            process_all_pages: true,
            per_page_full: 25,
            per_page_ref: 100,
        }
    }
}

impl ProcessingDefaults {
    pub fn options_for(&self, full_detail: bool) -> ProcessingOptions {
        ProcessingOptions {
            process_all_pages: self.process_all_pages,
            per_page: if full_detail {
                self.per_page_full
            } else {
                self.per_page_ref
            },
        }
    }
}

/// A description of what to harvest, with its detail level and paging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedQuery {
    pub target: QueryTarget,
    pub full_detail: bool,
    pub options: ProcessingOptions,
}

impl FeedQuery {
    fn new(target: QueryTarget, full_detail: bool) -> Self {
        Self {
            target,
            full_detail,
            options: ProcessingDefaults::default().options_for(full_detail),
        }
    }

    /// Deleted-item feeds carry no detail level; full detail is dropped for them.
    pub fn objects(query: ObjectQuery, full_detail: bool) -> Self {
        let full_detail = full_detail && !query.delta.is_deleted();
        Self::new(QueryTarget::Objects(query), full_detail)
    }

    pub fn relationships(query: RelationshipQuery, full_detail: bool) -> Self {
        let full_detail = full_detail && !query.delta.is_deleted() && query.ids.is_none();
        let mut feed = Self::new(QueryTarget::Relationships(query), full_detail);
        if matches!(&feed.target, QueryTarget::Relationships(q) if q.ids.is_some()) {
            feed.options.per_page = DEFAULT_ID_BATCH as i32;
        }
        feed
    }

    /// Explicit members of one user group.
    pub fn group_members(group_id: u32) -> Self {
        Self::objects(
            ObjectQuery::category(ObjectCategory::User).in_groups([group_id], true),
            false,
        )
    }

    pub fn groups() -> Self {
        Self::new(QueryTarget::Groups, false)
    }

    pub fn relationship_types() -> Self {
        Self::new(QueryTarget::RelationshipTypes, false)
    }

    pub fn with_per_page(mut self, per_page: i32) -> Self {
        self.options.per_page = per_page;
        self
    }

    pub fn with_options(mut self, options: ProcessingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn first_page_only(mut self) -> Self {
        self.options.process_all_pages = false;
        self
    }

    pub fn represents_deleted(&self) -> bool {
        match &self.target {
            QueryTarget::Objects(q) => q.delta.is_deleted(),
            QueryTarget::Relationships(q) => q.effective_delta().is_deleted(),
            QueryTarget::RelationshipTypes | QueryTarget::Groups => false,
        }
    }

    /// Groups and relationship types are single, unpaginated resources.
    pub fn is_paginated(&self) -> bool {
        matches!(
            self.target,
            QueryTarget::Objects(_) | QueryTarget::Relationships(_)
        )
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match &self.target {
            QueryTarget::Objects(q) => {
                let what = q.category.map(|c| c.plural()).unwrap_or("objects");
                match q.delta {
                    Delta::Full => format!("all {what}"),
                    Delta::ModifiedSince(at) => format!("{what} modified since {at}"),
                    Delta::DeletedSince(at) => format!("{what} deleted since {at}"),
                }
            }
            QueryTarget::Relationships(q) => match (&q.ids, q.delta) {
                (Some(ids), _) => format!("{} relationships by id", ids.len()),
                (None, Delta::Full) => "all relationships".to_string(),
                (None, Delta::ModifiedSince(at)) => format!("relationships modified since {at}"),
                (None, Delta::DeletedSince(at)) => format!("relationships deleted since {at}"),
            },
            QueryTarget::RelationshipTypes => "relationship types".to_string(),
            QueryTarget::Groups => "groups".to_string(),
        }
    }
}
