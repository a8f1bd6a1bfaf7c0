//! Request URL construction for each generation of the feed API.
//!
//! Generations differ only in data: one [`ApiAdapter`] type is configured with
//! a [`ProtocolCapabilities`] value, so adding a generation means adding a
//! capability set rather than a new type.

use std::fmt;

use chrono::{DateTime, Utc};
use url::Url;

use crate::{ConfigurationError, FeedQuery, ObjectQuery, QueryTarget, RelationshipQuery};

const DELETED_SINCE: &str = "deleted-since";
const AFFECTED_SINCE: &str = "affected-since";
const MODIFIED_SINCE: &str = "modified-since";

/// What one protocol generation supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolCapabilities {
    /// Category filter becomes a path segment (`/publications`) instead of a parameter.
    pub category_paths: bool,
    /// Deleted items live under a distinct `deleted` path segment.
    pub deleted_sub_path: bool,
    pub ever_approved_filter: bool,
    /// Object feeds get `order-by=id` so paging stays stable under concurrent writes.
    pub order_by_id: bool,
    /// Object deltas use `affected-since` instead of `modified-since`.
    pub affected_since: bool,
    pub max_per_page_full: i32,
    pub max_per_page_ref: i32,
}

impl ProtocolCapabilities {
    /// Flat resource paths, no deleted resources, modified-since only.
    pub fn early() -> Self {
        Self {
            category_paths: false,
            deleted_sub_path: false,
            ever_approved_filter: false,
            order_by_id: true,
            affected_since: false,
            max_per_page_full: 25,
            max_per_page_ref: 1000,
        }
    }

    pub fn mid() -> Self {
        Self {
            category_paths: true,
            deleted_sub_path: true,
            ever_approved_filter: true,
            order_by_id: true,
            affected_since: false,
            max_per_page_full: 25,
            max_per_page_ref: 1000,
        }
    }

    /// Next links carry continuation tokens, so no ordering parameter is needed.
    pub fn later(use_affected_since: bool) -> Self {
        Self {
            order_by_id: false,
            affected_since: use_affected_since,
            ..Self::mid()
        }
    }
}

/// Builds request URLs for one protocol generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiAdapter {
    name: String,
    capabilities: ProtocolCapabilities,
}

impl ApiAdapter {
    pub fn new(name: impl Into<String>, capabilities: ProtocolCapabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn capabilities(&self) -> &ProtocolCapabilities {
        &self.capabilities
    }

    /// `None` means the page size parameter is omitted and the server default applies.
    pub fn effective_per_page(&self, requested: i32, full_detail: bool) -> Option<i32> {
        if requested <= 0 {
            return None;
        }
        let ceiling = if full_detail {
            self.capabilities.max_per_page_full
        } else {
            self.capabilities.max_per_page_ref
        };
        Some(requested.min(ceiling))
    }

    pub fn delta_field(&self, deleted: bool, object_query: bool) -> &'static str {
        if deleted {
            DELETED_SINCE
        } else if self.capabilities.affected_since && object_query {
            AFFECTED_SINCE
        } else {
            MODIFIED_SINCE
        }
    }

    pub fn build_object_feed_url(
        &self,
        base: &Url,
        query: &ObjectQuery,
        full_detail: bool,
        per_page: i32,
    ) -> Url {
        let caps = &self.capabilities;
        let deleted = query.delta.is_deleted();
        let mut segments = Vec::new();
        let mut params = Vec::new();

        if deleted && caps.deleted_sub_path {
            segments.push("deleted");
        }
        match query.category {
            Some(category) if caps.category_paths => segments.push(category.plural()),
            Some(category) => {
                segments.push("objects");
                params.push(("categories", category.plural().to_string()));
            }
            None => segments.push("objects"),
        }

        if !query.groups.is_empty() {
            params.push(("groups", join_ids(&query.groups)));
            if query.explicit_members_only {
                params.push(("group-membership", "explicit".to_string()));
            }
        }
        if query.approved_only && caps.ever_approved_filter {
            params.push(("ever-approved", "true".to_string()));
        }
        if full_detail {
            params.push(("detail", "full".to_string()));
        }
        if let Some(size) = self.effective_per_page(per_page, full_detail) {
            params.push(("per-page", size.to_string()));
        }
        if let Some(since) = query.delta.since() {
            params.push((self.delta_field(deleted, true), format_timestamp(&since)));
        }
        if caps.order_by_id && !deleted {
            params.push(("order-by", "id".to_string()));
        }

        build_url(base, &segments, &params)
    }

    /// With `ids`, one batch URL is built and the query's delta and type filter
    /// are ignored.
    pub fn build_relationship_feed_url(
        &self,
        base: &Url,
        query: &RelationshipQuery,
        full_detail: bool,
        per_page: i32,
        ids: Option<&[u32]>,
    ) -> Result<Url, ConfigurationError> {
        let deleted = ids.is_none() && query.delta.is_deleted();
        let mut segments = vec!["relationships"];
        let mut params = Vec::new();

        if deleted && self.capabilities.deleted_sub_path {
            segments.push("deleted");
        }
        if full_detail {
            params.push(("detail", "full".to_string()));
        }

        match ids {
            Some([]) => return Err(ConfigurationError::EmptyIdBatch),
            Some(ids) => {
                if let Some(size) = self.effective_per_page(ids.len() as i32, full_detail) {
                    params.push(("per-page", size.to_string()));
                }
                params.push(("ids", join_ids(ids)));
            }
            None => {
                if let Some(size) = self.effective_per_page(per_page, full_detail) {
                    params.push(("per-page", size.to_string()));
                }
                if !query.type_ids.is_empty() {
                    params.push(("types", join_ids(&query.type_ids)));
                }
                if let Some(since) = query.delta.since() {
                    params.push((self.delta_field(deleted, false), format_timestamp(&since)));
                }
            }
        }

        Ok(build_url(base, &segments, &params))
    }

    pub fn build_group_url(&self, base: &Url) -> Url {
        build_url(base, &["groups"], &[])
    }

    pub fn build_relationship_types_url(&self, base: &Url) -> Url {
        build_url(base, &["relationship", "types"], &[])
    }

    /// Every URL needed to start harvesting `query`.
    ///
    /// Paginated feeds resolve to a single seed URL whose `next` links are
    /// followed at fetch time, except explicit id batches, which are sliced
    /// into contiguous chunks of `per_page` ids (100 when unset).
    pub fn resolve_query_urls(
        &self,
        base: &Url,
        query: &FeedQuery,
    ) -> Result<Vec<Url>, ConfigurationError> {
        let per_page = query.options.per_page;
        match &query.target {
            QueryTarget::Objects(objects) => Ok(vec![self.build_object_feed_url(
                base,
                objects,
                query.full_detail,
                per_page,
            )]),
            QueryTarget::Relationships(relationships) => match &relationships.ids {
                Some(ids) => {
                    if ids.is_empty() {
                        return Err(ConfigurationError::EmptyIdBatch);
                    }
                    if relationships.delta != crate::Delta::Full {
                        engine_logging::engine_warn!(
                            "Relationship query has both an id batch and a delta; the delta is ignored"
                        );
                    }
                    let chunk = if per_page > 0 {
                        per_page as usize
                    } else {
                        crate::DEFAULT_ID_BATCH
                    };
                    ids.chunks(chunk)
                        .map(|batch| {
                            self.build_relationship_feed_url(
                                base,
                                relationships,
                                query.full_detail,
                                per_page,
                                Some(batch),
                            )
                        })
                        .collect()
                }
                None => Ok(vec![self.build_relationship_feed_url(
                    base,
                    relationships,
                    query.full_detail,
                    per_page,
                    None,
                )?]),
            },
            QueryTarget::Groups => Ok(vec![self.build_group_url(base)]),
            QueryTarget::RelationshipTypes => Ok(vec![self.build_relationship_types_url(base)]),
        }
    }
}

/// Known protocol generations of the feed API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ApiVersion {
    V3_7,
    V4_6,
    V4_9,
    V5_5,
}

impl ApiVersion {
    pub const ALL: [ApiVersion; 4] = [
        ApiVersion::V3_7,
        ApiVersion::V4_6,
        ApiVersion::V4_9,
        ApiVersion::V5_5,
    ];

    pub fn name(self) -> &'static str {
        match self {
            ApiVersion::V3_7 => "3.7",
            ApiVersion::V4_6 => "4.6",
            ApiVersion::V4_9 => "4.9",
            ApiVersion::V5_5 => "5.5",
        }
    }

    /// Accepts `"4.9"`, `"v4.9"` or `"version 4.9"`, case-insensitively.
    pub fn parse(value: &str) -> Result<Self, ConfigurationError> {
        let lower = value.to_ascii_lowercase();
        let stripped = lower
            .strip_prefix("version")
            .or_else(|| lower.strip_prefix('v'))
            .unwrap_or(&lower);
        let lookup = stripped.trim_start_matches(&[' ', '.'][..]).trim();
        ApiVersion::ALL
            .iter()
            .copied()
            .find(|v| v.name() == lookup)
            .ok_or_else(|| ConfigurationError::UnknownApiVersion(value.to_string()))
    }

    /// `use_affected_since` only matters for generations that support it.
    pub fn adapter(self, use_affected_since: bool) -> ApiAdapter {
        let capabilities = match self {
            ApiVersion::V3_7 => ProtocolCapabilities::early(),
            ApiVersion::V4_6 | ApiVersion::V4_9 => ProtocolCapabilities::mid(),
            ApiVersion::V5_5 => ProtocolCapabilities::later(use_affected_since),
        };
        ApiAdapter::new(self.name(), capabilities)
    }
}

impl fmt::Display for ApiVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// `yyyy-MM-ddTHH:mm:ss+0000`
pub fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S%z").to_string()
}

fn join_ids(ids: &[u32]) -> String {
    ids.iter()
        .map(u32::to_string)
        .collect::<Vec<_>>()
        .join(",")
}

fn build_url(base: &Url, segments: &[&str], params: &[(&str, String)]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty();
        path.extend(segments);
    }
    if !params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (name, value) in params {
            pairs.append_pair(name, value);
        }
    }
    url
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_parse_accepts_prefixes() {
        assert_eq!(ApiVersion::parse("4.9").unwrap(), ApiVersion::V4_9);
        assert_eq!(ApiVersion::parse("v5.5").unwrap(), ApiVersion::V5_5);
        assert_eq!(ApiVersion::parse("Version 4.6").unwrap(), ApiVersion::V4_6);
        assert_eq!(ApiVersion::parse("v.3.7").unwrap(), ApiVersion::V3_7);
        assert!(ApiVersion::parse("6.0").is_err());
    }

    #[test]
    fn timestamp_uses_numeric_offset() {
        use chrono::TimeZone;
        let at = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        assert_eq!(format_timestamp(&at), "2024-03-05T07:08:09+0000");
    }

    #[test]
    fn unparameterised_urls_have_no_query() {
        let base = Url::parse("https://api.example.org/v4.9/").unwrap();
        let adapter = ApiVersion::V4_9.adapter(false);
        assert_eq!(
            adapter.build_group_url(&base).as_str(),
            "https://api.example.org/v4.9/groups"
        );
        assert_eq!(
            adapter.build_relationship_types_url(&base).as_str(),
            "https://api.example.org/v4.9/relationship/types"
        );
    }
}
