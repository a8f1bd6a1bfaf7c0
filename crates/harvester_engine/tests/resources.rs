use std::sync::Arc;
use std::time::Duration;

use harvester_core::{ItemIdentity, ObjectCategory, ValidatedUrl};
use harvester_engine::{
    FetchSettings, MemoryItemStore, RateLimitedFetcher, ResourceError, ResourceFetchService,
    ResourceFetchSettings, ResourceReport, ResourceType,
};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

#[test]
fn photos_are_fetched_into_the_store() {
    let runtime = tokio::runtime::Runtime::new().unwrap();
    let server = runtime.block_on(MockServer::start());
    runtime.block_on(
        Mock::given(method("GET"))
            .and(path("/photo/1"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0x89, b'P', b'N', b'G']))
            .mount(&server),
    );
    runtime.block_on(
        Mock::given(method("GET"))
            .and(path("/photo/2"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server),
    );
    runtime.block_on(
        Mock::given(method("GET"))
            .and(path("/photo/3"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server),
    );

    let fetcher = RateLimitedFetcher::standalone(FetchSettings {
        min_interval: Duration::ZERO,
        ..FetchSettings::default()
    })
    .unwrap();
    let store = Arc::new(MemoryItemStore::new());
    let service = ResourceFetchService::new(
        ResourceFetchSettings {
            workers: 2,
            max_retries: 0,
        },
        Arc::new(fetcher),
        store.clone(),
    )
    .unwrap();

    for id in 1..=3 {
        let url = ValidatedUrl::new(&format!("{}/photo/{id}", server.uri()), None).unwrap();
        service
            .fetch_user_photo(ItemIdentity::object(ObjectCategory::User, id), url)
            .unwrap();
    }
    let report = service.shutdown();

    // A missing photo and an empty one both count as failures.
    assert_eq!(report, ResourceReport { fetched: 1, failed: 2 });
    assert_eq!(
        store.get(&ItemIdentity::object(ObjectCategory::User, 1), ResourceType::RAW_USER_PHOTO),
        Some(vec![0x89, b'P', b'N', b'G'])
    );
    assert_eq!(store.len(), 1);
}

#[test]
fn zero_workers_is_rejected() {
    let fetcher = RateLimitedFetcher::standalone(FetchSettings::default()).unwrap();
    let result = ResourceFetchService::new(
        ResourceFetchSettings {
            workers: 0,
            max_retries: 0,
        },
        Arc::new(fetcher),
        Arc::new(MemoryItemStore::new()),
    );
    assert!(matches!(result, Err(ResourceError::Configuration(_))));
}
