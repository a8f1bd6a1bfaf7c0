use std::collections::BTreeMap;
use std::io::Read;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use harvester_core::{ItemIdentity, ObjectCategory};
use harvester_engine::{
    CompiledTransform, ItemStore, MemoryItemStore, PipelineError, ResourceType, StoredItem,
    TaskStage, TemplateTransformCompiler, TolerancePolicy, TransformCompiler, TransformError,
    TransformSource, Transformer, TranslationConfig, TranslationPipeline, TranslationTask,
};
use pretty_assertions::assert_eq;

fn inline(name: &str, text: &str) -> TransformSource {
    TransformSource::Inline {
        name: name.to_string(),
        text: text.to_string(),
    }
}

fn wrap() -> TransformSource {
    inline("wrap", "<rdf base=\"${baseURI}\">${item}</rdf>")
}

/// Counts compilations and fails for sources named "broken".
#[derive(Default)]
struct CountingCompiler {
    compiles: AtomicUsize,
}

impl TransformCompiler for CountingCompiler {
    fn compile(&self, source: &TransformSource) -> Result<Box<dyn CompiledTransform>, TransformError> {
        self.compiles.fetch_add(1, Ordering::SeqCst);
        if source.name() == "broken" {
            return Err(TransformError::Compile {
                name: source.name(),
                message: "not a template".to_string(),
            });
        }
        TemplateTransformCompiler.compile(source)
    }
}

/// Compiles transforms whose transformers panic.
struct PanickingCompiler;

struct Explodes;

impl CompiledTransform for Explodes {
    fn new_transformer(&self) -> Box<dyn Transformer + '_> {
        Box::new(Explodes)
    }
}

impl Transformer for Explodes {
    fn set_parameter(&mut self, _name: &str, _value: &str) -> Result<(), TransformError> {
        Ok(())
    }

    fn transform(&mut self, _input: &mut dyn Read) -> Result<Vec<u8>, TransformError> {
        panic!("transformer blew up");
    }
}

impl TransformCompiler for PanickingCompiler {
    fn compile(&self, source: &TransformSource) -> Result<Box<dyn CompiledTransform>, TransformError> {
        if source.name() == "explodes" {
            return Ok(Box::new(Explodes));
        }
        TemplateTransformCompiler.compile(source)
    }
}

fn config(workers: usize) -> TranslationConfig {
    TranslationConfig {
        workers,
        ..TranslationConfig::default()
    }
}

fn user(id: u32) -> ItemIdentity {
    ItemIdentity::object(ObjectCategory::User, id)
}

fn stored(store: &MemoryItemStore, identity: ItemIdentity, xml: &str) -> StoredItem {
    store
        .store_item(&identity, ResourceType::RAW_OBJECT, xml.as_bytes())
        .unwrap()
}

fn output_text(store: &MemoryItemStore, identity: ItemIdentity) -> Option<String> {
    store
        .get(&identity, ResourceType::TRANSLATED_OBJECT)
        .map(|bytes| String::from_utf8(bytes).unwrap())
}

#[test]
fn tolerated_transform_failure_does_not_stop_other_tasks() {
    engine_logging::initialize_for_tests();
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let pipeline = TranslationPipeline::new(
        config(3),
        Arc::new(CountingCompiler::default()),
        input.clone(),
        output.clone(),
    )
    .unwrap();

    for id in 1..=5 {
        let item = stored(&input, user(id), &format!("<entry id=\"{id}\"/>"));
        let transform = if id == 3 { inline("broken", "") } else { wrap() };
        pipeline
            .submit(TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, transform))
            .unwrap();
    }

    let report = pipeline.await_drain().unwrap();
    assert_eq!(report.succeeded, 4);
    assert_eq!(report.failed, 1);
    assert_eq!(report.completed(), 5);
    assert_eq!(report.failures[0].identity, user(3));
    assert_eq!(report.failures[0].stage, TaskStage::Transforming);
    assert!(report.failures[0].tolerated);

    assert_eq!(output.identities(ResourceType::TRANSLATED_OBJECT).len(), 4);
    assert_eq!(output_text(&output, user(3)), None);
    assert_eq!(
        output_text(&output, user(1)).as_deref(),
        Some("<rdf base=\"\"><entry id=\"1\"/></rdf>")
    );

    // The pipeline keeps accepting work after a tolerated failure.
    let item = stored(&input, user(6), "<entry/>");
    pipeline
        .submit(TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, wrap()))
        .unwrap();
    assert_eq!(pipeline.shutdown().unwrap().succeeded, 5);
}

#[test]
fn parameters_merge_with_task_values_winning() {
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let mut parameters = BTreeMap::new();
    parameters.insert("baseURI".to_string(), "http://global/".to_string());
    parameters.insert("undeclared".to_string(), "ignored".to_string());
    let pipeline = TranslationPipeline::new(
        TranslationConfig {
            workers: 1,
            parameters,
            ..TranslationConfig::default()
        },
        Arc::new(TemplateTransformCompiler),
        input.clone(),
        output.clone(),
    )
    .unwrap();

    let first = stored(&input, user(1), "<a/>");
    let second = stored(&input, user(2), "<b/>");
    pipeline
        .submit(TranslationTask::new(first, ResourceType::TRANSLATED_OBJECT, wrap()))
        .unwrap();
    pipeline
        .submit(
            TranslationTask::new(second, ResourceType::TRANSLATED_OBJECT, wrap())
                .with_parameter("baseURI", "http://task/"),
        )
        .unwrap();
    let report = pipeline.shutdown().unwrap();

    assert_eq!(report.succeeded, 2);
    assert_eq!(
        output_text(&output, user(1)).as_deref(),
        Some("<rdf base=\"http://global/\"><a/></rdf>")
    );
    assert_eq!(
        output_text(&output, user(2)).as_deref(),
        Some("<rdf base=\"http://task/\"><b/></rdf>")
    );
}

#[test]
fn missing_transform_file_is_skipped_when_ignored() {
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let pipeline = TranslationPipeline::new(
        config(2),
        Arc::new(TemplateTransformCompiler),
        input.clone(),
        output.clone(),
    )
    .unwrap();

    let item = stored(&input, user(1), "<entry/>");
    let policy = TolerancePolicy {
        ignore_file_not_found: true,
        ..TolerancePolicy::default()
    };
    let missing = TransformSource::File(PathBuf::from("/no/such/dir/object.tmpl"));
    pipeline
        .submit(TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, missing).with_policy(policy))
        .unwrap();

    let report = pipeline.shutdown().unwrap();
    assert_eq!(report.skipped, 1);
    assert_eq!(report.failed, 0);
    assert!(output.is_empty());
}

#[test]
fn untolerated_io_failure_rejects_later_submissions() {
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let pipeline = TranslationPipeline::new(
        config(1),
        Arc::new(TemplateTransformCompiler),
        input.clone(),
        output,
    )
    .unwrap();

    // Never stored, so reading the input fails.
    let ghost = StoredItem {
        identity: user(404),
        resource: ResourceType::RAW_OBJECT,
        path: None,
    };
    pipeline
        .submit(TranslationTask::new(ghost, ResourceType::TRANSLATED_OBJECT, wrap()))
        .unwrap();

    let err = pipeline.await_drain().unwrap_err();
    match err {
        PipelineError::Untolerated { identity, stage, .. } => {
            assert_eq!(identity, user(404));
            assert_eq!(stage, TaskStage::FetchingInput);
        }
        other => panic!("unexpected error: {other}"),
    }

    let item = stored(&input, user(1), "<entry/>");
    let rejected = pipeline.submit(TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, wrap()));
    assert!(matches!(rejected, Err(PipelineError::Untolerated { .. })));
    assert!(pipeline.shutdown().is_err());
}

#[test]
fn narrow_output_replaces_supplementary_characters() {
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let pipeline = TranslationPipeline::new(
        TranslationConfig {
            workers: 1,
            use_full_utf8: false,
            ..TranslationConfig::default()
        },
        Arc::new(TemplateTransformCompiler),
        input.clone(),
        output.clone(),
    )
    .unwrap();

    let item = stored(&input, user(1), "<title>\u{1D11E} clef</title>");
    pipeline
        .submit(TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, inline("copy", "${item}")))
        .unwrap();
    pipeline.shutdown().unwrap();

    assert_eq!(
        output_text(&output, user(1)).as_deref(),
        Some("<title>\u{FFFD} clef</title>")
    );
}

#[test]
fn each_worker_compiles_a_transform_once() {
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let compiler = Arc::new(CountingCompiler::default());
    let pipeline = TranslationPipeline::new(config(1), compiler.clone(), input.clone(), output).unwrap();
    assert_eq!(pipeline.worker_count(), 1);

    for id in 1..=4 {
        let item = stored(&input, user(id), "<entry/>");
        pipeline
            .submit(TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, wrap()))
            .unwrap();
    }
    let other = stored(&input, user(5), "<entry/>");
    pipeline
        .submit(TranslationTask::new(other, ResourceType::TRANSLATED_OBJECT, inline("copy", "${item}")))
        .unwrap();

    assert_eq!(pipeline.await_drain().unwrap().succeeded, 5);
    assert_eq!(pipeline.snapshot().completed(), 5);
    assert_eq!(compiler.compiles.load(Ordering::SeqCst), 2);
}

#[test]
fn zero_workers_is_a_configuration_error() {
    let result = TranslationPipeline::new(
        config(0),
        Arc::new(TemplateTransformCompiler),
        Arc::new(MemoryItemStore::new()),
        Arc::new(MemoryItemStore::new()),
    );
    assert!(matches!(result, Err(PipelineError::Configuration(_))));
}

#[test]
fn pipeline_policy_applies_to_tasks_without_their_own() {
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let strict = TolerancePolicy {
        tolerate_transform_errors: false,
        ..TolerancePolicy::default()
    };
    let pipeline = TranslationPipeline::new(
        TranslationConfig {
            workers: 1,
            policy: strict,
            ..TranslationConfig::default()
        },
        Arc::new(CountingCompiler::default()),
        input.clone(),
        output,
    )
    .unwrap();

    let item = stored(&input, user(1), "<entry/>");
    pipeline
        .submit(TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, inline("broken", "")))
        .unwrap();

    match pipeline.await_drain() {
        Err(PipelineError::Untolerated { identity, stage, .. }) => {
            assert_eq!(identity, user(1));
            assert_eq!(stage, TaskStage::Transforming);
        }
        other => panic!("unexpected drain result: {other:?}"),
    }
}

#[test]
fn task_policy_overrides_the_pipeline_policy() {
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let pipeline = TranslationPipeline::new(
        TranslationConfig {
            workers: 1,
            policy: TolerancePolicy {
                tolerate_transform_errors: false,
                ..TolerancePolicy::default()
            },
            ..TranslationConfig::default()
        },
        Arc::new(CountingCompiler::default()),
        input.clone(),
        output,
    )
    .unwrap();

    let item = stored(&input, user(1), "<entry/>");
    let lenient = TolerancePolicy {
        tolerate_transform_errors: true,
        ..TolerancePolicy::default()
    };
    pipeline
        .submit(
            TranslationTask::new(item, ResourceType::TRANSLATED_OBJECT, inline("broken", ""))
                .with_policy(lenient),
        )
        .unwrap();

    let report = pipeline.shutdown().unwrap();
    assert_eq!(report.failed, 1);
    assert!(report.failures[0].tolerated);
}

#[test]
fn panicking_transformer_is_counted_and_worker_survives() {
    engine_logging::initialize_for_tests();
    let input = Arc::new(MemoryItemStore::new());
    let output = Arc::new(MemoryItemStore::new());
    let pipeline =
        TranslationPipeline::new(config(1), Arc::new(PanickingCompiler), input.clone(), output.clone())
            .unwrap();

    let bad = stored(&input, user(1), "<entry/>");
    let good = stored(&input, user(2), "<entry/>");
    pipeline
        .submit(TranslationTask::new(bad, ResourceType::TRANSLATED_OBJECT, inline("explodes", "")))
        .unwrap();
    pipeline
        .submit(TranslationTask::new(good, ResourceType::TRANSLATED_OBJECT, wrap()))
        .unwrap();

    let report = pipeline.await_drain().unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures[0].identity, user(1));
    assert_eq!(report.failures[0].stage, TaskStage::Transforming);
    assert!(report.failures[0].tolerated);
    assert!(report.failures[0].message.contains("transformer blew up"));
    assert_eq!(output_text(&output, user(1)), None);
    assert!(output_text(&output, user(2)).is_some());

    // The single worker is still there to take more work.
    let later = stored(&input, user(3), "<entry/>");
    pipeline
        .submit(TranslationTask::new(later, ResourceType::TRANSLATED_OBJECT, wrap()))
        .unwrap();
    assert_eq!(pipeline.shutdown().unwrap().succeeded, 2);
}
