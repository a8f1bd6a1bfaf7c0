use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use engine_logging::{engine_error, engine_info, engine_warn};
use harvester_core::{
    ApiVersion, FeedQuery, ItemKind, ObjectCategory, ObjectQuery, RelationshipQuery,
    ValidatedUrl,
};
use harvester_engine::{
    detect_api_version, resolve_api_version, write_run_report, FeedClient, FetchSettings,
    FileItemStore, HarvestSummary, Harvester, ItemStore, RateLimitedFetcher, RequestClock,
    ResourceFetchService, TemplateTransformCompiler, TransformSource, TranslationPipeline,
};

use super::persistence::{load_run_state, save_run_state};
use crate::config::HarvestConfig;

/// Runs one harvest as configured: a full harvest on the first run or when
/// forced, a delta harvest since the last successful run otherwise.
pub fn run_app(config: &HarvestConfig) -> anyhow::Result<HarvestSummary> {
    let started = Utc::now();
    let base = ValidatedUrl::base(&config.api_url)?;
    let settings = config.fetch_settings(&base)?;
    let clock = Arc::new(RequestClock::new(settings.min_interval));

    let version = determine_version(config, &base, &settings, &clock)?;
    engine_info!("Using API version {} at {}", version, base.as_str());

    let mut state = load_run_state(&config.output_dir);
    let since = if config.force_full {
        None
    } else {
        state.last_success_utc
    };
    match since {
        Some(at) => engine_info!("Delta harvest of changes since {}", at),
        None => engine_info!("Full harvest"),
    }
    let queries = planned_queries(config, &config.categories()?, since);

    let fetcher = Arc::new(RateLimitedFetcher::new(settings.clone(), clock.clone())?);
    let client = FeedClient::new(base, version.adapter(config.use_affected_since), fetcher)
        .with_max_retries(config.max_retries)
        .with_rewrite_mismatched_urls(config.rewrite_mismatched_urls);

    let store: Arc<dyn ItemStore> = Arc::new(FileItemStore::new(&config.output_dir));
    let pipeline = TranslationPipeline::new(
        config.translation_config(),
        Arc::new(TemplateTransformCompiler),
        store.clone(),
        store.clone(),
    )?;

    let mut harvester = Harvester::new(client, store.clone(), store.clone(), pipeline)?;
    let transforms = [
        (ItemKind::Object, &config.transforms.object),
        (ItemKind::Relationship, &config.transforms.relationship),
        (ItemKind::Group, &config.transforms.group),
    ];
    for (kind, path) in transforms {
        if let Some(path) = path {
            harvester = harvester.with_transform(kind, TransformSource::File(path.clone()));
        }
    }
    if config.fetch_photos {
        // Photo downloads share the clock, so they are paced with feed requests.
        let photo_fetcher = Arc::new(RateLimitedFetcher::new(settings, clock)?);
        let service = ResourceFetchService::new(config.resource_settings(), photo_fetcher, store)?;
        harvester = harvester.with_resource_fetcher(service);
    }

    let mut failure = None;
    for query in &queries {
        if let Err(err) = harvester.harvest(query) {
            engine_error!("Query \"{}\" failed: {}", query.describe(), err);
            failure = Some(err);
            break;
        }
    }
    if failure.is_none() && config.harvest_groups && config.harvest_group_members {
        for group in harvester.harvested_groups() {
            if let Err(err) = harvester.harvest_group_members(group) {
                engine_error!("Membership of group {} failed: {}", group, err);
                failure = Some(err);
                break;
            }
        }
    }
    let summary = harvester.finish();
    let finished = Utc::now();

    if let Some(err) = failure {
        return Err(err).context("harvest stopped early; run state not updated");
    }
    let summary = summary?;

    let report = write_run_report(&config.output_dir, &summary, started, finished)?;
    engine_info!("Run report written to {:?}", report);
    state.record_success(started);
    save_run_state(&config.output_dir, &state);
    Ok(summary)
}

/// Reconciles the configured version with the one the server reports. The
/// server is asked on a fetcher of its own that shares the request clock.
fn determine_version(
    config: &HarvestConfig,
    base: &ValidatedUrl,
    settings: &FetchSettings,
    clock: &Arc<RequestClock>,
) -> anyhow::Result<ApiVersion> {
    let configured = config.api_version()?;
    let fetcher = RateLimitedFetcher::new(settings.clone(), clock.clone())?;
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("cannot start runtime for version detection")?;
    let reported = match runtime.block_on(detect_api_version(&fetcher, base, config.max_retries)) {
        Ok(reported) => reported,
        Err(err) if configured.is_some() => {
            engine_warn!("Could not read the API version from the server: {}", err);
            None
        }
        Err(err) => return Err(err).context("cannot determine the API version"),
    };
    Ok(resolve_api_version(configured, reported)?)
}

/// Queries for one run, in harvest order: objects by category, then
/// relationships, then groups and relationship types. A delta run adds a
/// deleted-items query after each changed-items query.
pub fn planned_queries(
    config: &HarvestConfig,
    categories: &[ObjectCategory],
    since: Option<DateTime<Utc>>,
) -> Vec<FeedQuery> {
    let options = config.processing_defaults();
    let mut queries = Vec::new();

    for &category in categories {
        let mut objects = ObjectQuery::category(category);
        if !config.groups.is_empty() {
            objects = objects.in_groups(config.groups.iter().copied(), config.explicit_members_only);
        }
        if config.approved_only {
            objects = objects.approved_only();
        }
        match since {
            Some(at) => {
                queries.push(FeedQuery::objects(objects.clone().modified_since(at), config.full_detail));
                queries.push(FeedQuery::objects(objects.deleted_since(at), false));
            }
            None => queries.push(FeedQuery::objects(objects, config.full_detail)),
        }
    }

    if config.harvest_relationships {
        let relationships =
            RelationshipQuery::all().of_types(config.relationship_types.iter().copied());
        match since {
            Some(at) => {
                queries.push(FeedQuery::relationships(
                    relationships.clone().modified_since(at),
                    config.full_detail,
                ));
                queries.push(FeedQuery::relationships(relationships.deleted_since(at), false));
            }
            None => queries.push(FeedQuery::relationships(relationships, config.full_detail)),
        }
    }

    if config.harvest_groups {
        queries.push(FeedQuery::groups());
    }
    if config.harvest_relationship_types {
        queries.push(FeedQuery::relationship_types());
    }

    queries
        .into_iter()
        .map(|query| {
            if query.is_paginated() {
                let paging = options.options_for(query.full_detail);
                query.with_options(paging)
            } else {
                query
            }
        })
        .collect()
}
