use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;

use engine_logging::{engine_debug, engine_info, engine_warn};
use harvester_core::{FeedQuery, ItemIdentity, ItemKind, ObjectCategory, ValidatedUrl};
use tokio::runtime::Runtime;

use crate::client::{FeedClient, QueryStats};
use crate::error::HarvestError;
use crate::feed::FeedEntry;
use crate::pipeline::{TranslationPipeline, TranslationReport, TranslationTask};
use crate::resources::{ResourceFetchService, ResourceReport};
use crate::store::{ItemStore, ResourceType};
use crate::transform::TransformSource;

/// Totals for one harvest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HarvestSummary {
    pub queries: usize,
    pub requests: usize,
    pub entries_stored: usize,
    pub entries_deleted: usize,
    pub group_memberships: usize,
    pub photos: ResourceReport,
    pub translation: TranslationReport,
}

/// Fetches queries, stores each entry raw and hands it to translation.
pub struct Harvester {
    runtime: Runtime,
    client: FeedClient,
    raw_store: Arc<dyn ItemStore>,
    output_store: Arc<dyn ItemStore>,
    pipeline: TranslationPipeline,
    transforms: HashMap<ItemKind, TransformSource>,
    resources: Option<ResourceFetchService>,
    groups: BTreeSet<u32>,
    totals: HarvestSummary,
}

impl Harvester {
    pub fn new(
        client: FeedClient,
        raw_store: Arc<dyn ItemStore>,
        output_store: Arc<dyn ItemStore>,
        pipeline: TranslationPipeline,
    ) -> Result<Self, HarvestError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(HarvestError::Runtime)?;
        Ok(Self {
            runtime,
            client,
            raw_store,
            output_store,
            pipeline,
            transforms: HashMap::new(),
            resources: None,
            groups: BTreeSet::new(),
            totals: HarvestSummary::default(),
        })
    }

    /// Items of `kind` are translated with `source`; kinds without a
    /// transform are only stored raw.
    pub fn with_transform(mut self, kind: ItemKind, source: TransformSource) -> Self {
        self.transforms.insert(kind, source);
        self
    }

    /// Download user photos linked from full-detail user records.
    pub fn with_resource_fetcher(mut self, service: ResourceFetchService) -> Self {
        self.resources = Some(service);
        self
    }

    pub fn client(&self) -> &FeedClient {
        &self.client
    }

    /// Groups stored so far in this run, in id order.
    pub fn harvested_groups(&self) -> Vec<u32> {
        self.groups.iter().copied().collect()
    }

    /// Fetches the explicit user members of `group_id` and stores them as one
    /// membership document. Returns the number of members.
    pub fn harvest_group_members(&mut self, group_id: u32) -> Result<usize, HarvestError> {
        let query = FeedQuery::group_members(group_id);
        let mut members = Vec::new();
        let mut sink = |entry: FeedEntry| -> Result<(), HarvestError> {
            if !entry.deleted && entry.identity.object_category() == Some(ObjectCategory::User) {
                members.push(entry.identity.id());
            }
            Ok(())
        };
        let stats = self
            .runtime
            .block_on(self.client.execute_query(&query, query.options, &mut sink));
        self.totals.queries += 1;
        let stats = stats?;
        self.totals.requests += stats.requests;

        self.raw_store.store_item(
            &ItemIdentity::Group(group_id),
            ResourceType::RAW_GROUP_MEMBERSHIP,
            membership_document(group_id, &members).as_bytes(),
        )?;
        self.totals.group_memberships += 1;
        engine_debug!("Group {} has {} explicit members", group_id, members.len());
        Ok(members.len())
    }

    /// Runs `query` to completion. Translation continues in the background.
    pub fn harvest(&mut self, query: &FeedQuery) -> Result<QueryStats, HarvestError> {
        let mut stored = 0usize;
        let mut deleted = 0usize;
        let mut groups = Vec::new();
        let mut sink = |entry: FeedEntry| -> Result<(), HarvestError> {
            if entry.deleted {
                self.remove(&entry)?;
                deleted += 1;
            } else {
                if let ItemIdentity::Group(id) = entry.identity {
                    groups.push(id);
                }
                self.accept(entry)?;
                stored += 1;
            }
            Ok(())
        };
        let stats = self
            .runtime
            .block_on(self.client.execute_query(query, query.options, &mut sink));

        self.totals.queries += 1;
        self.totals.entries_stored += stored;
        self.totals.entries_deleted += deleted;
        self.groups.extend(groups);
        let stats = stats?;
        self.totals.requests += stats.requests;
        Ok(stats)
    }

    fn accept(&self, entry: FeedEntry) -> Result<(), HarvestError> {
        let kind = entry.identity.kind();
        let item = self
            .raw_store
            .store_item(&entry.identity, ResourceType::raw_for(kind), &entry.xml)?;

        if let (Some(source), Some(target)) =
            (self.transforms.get(&kind), ResourceType::translated_for(kind))
        {
            let task = TranslationTask::new(item, target, source.clone());
            self.pipeline.submit(task)?;
        }

        if let (Some(service), Some(photo)) = (&self.resources, entry.photo_url.as_deref()) {
            match ValidatedUrl::new(photo, Some(self.client.base().as_str())) {
                Ok(mut url) => {
                    if url.is_mismatched() {
                        url.use_rewritten(self.client.rewrites_mismatched_urls());
                    }
                    service.fetch_user_photo(entry.identity, url)?;
                }
                Err(err) => engine_warn!("Ignoring photo of {}: {}", entry.identity, err),
            }
        }
        Ok(())
    }

    fn remove(&self, entry: &FeedEntry) -> Result<(), HarvestError> {
        let kind = entry.identity.kind();
        if kind == ItemKind::Group {
            self.raw_store
                .delete_item(&entry.identity, ResourceType::RAW_GROUP_MEMBERSHIP)?;
        }
        let mut removed = self
            .raw_store
            .delete_item(&entry.identity, ResourceType::raw_for(kind))?;
        if let Some(target) = ResourceType::translated_for(kind) {
            removed |= self.output_store.delete_item(&entry.identity, target)?;
        }
        if entry.identity.object_category() == Some(harvester_core::ObjectCategory::User) {
            removed |= self
                .raw_store
                .delete_item(&entry.identity, ResourceType::RAW_USER_PHOTO)?;
        }
        engine_debug!(
            "Deleted item {} ({})",
            entry.identity,
            if removed { "removed from stores" } else { "was not stored" }
        );
        Ok(())
    }

    /// Waits for background work and returns the run totals.
    pub fn finish(self) -> Result<HarvestSummary, HarvestError> {
        let Harvester {
            runtime,
            pipeline,
            resources,
            mut totals,
            ..
        } = self;
        if let Some(service) = resources {
            totals.photos = service.shutdown();
        }
        totals.translation = pipeline.shutdown()?;
        drop(runtime);
        engine_info!(
            "Harvest finished: {} queries, {} requests, {} stored, {} deleted, {} translated, {} failed",
            totals.queries,
            totals.requests,
            totals.entries_stored,
            totals.entries_deleted,
            totals.translation.succeeded,
            totals.translation.failed
        );
        Ok(totals)
    }
}

fn membership_document(group_id: u32, members: &[u32]) -> String {
    let mut xml = format!("<group-membership group-id=\"{group_id}\">\n");
    for id in members {
        let _ = writeln!(xml, "  <user id=\"{id}\"/>");
    }
    xml.push_str("</group-membership>\n");
    xml
}
