//! Bounded worker pool that translates stored items.
//!
//! Tasks are submitted without waiting for their result. Each worker keeps a
//! private cache of compiled transforms, so a transform is compiled at most
//! once per worker. Outcomes are collected in a shared report that
//! [`TranslationPipeline::await_drain`] returns once every submitted task has
//! finished.

use std::any::Any;
use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::io::{self, Read};
use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use engine_logging::{
    engine_debug, engine_error, engine_info, engine_warn, set_worker_label, worker_label,
};
use harvester_core::{ConfigurationError, ItemIdentity};
use thiserror::Error;

use crate::store::{ItemStore, ResourceType, StoreError, StoredItem};
use crate::transform::{CompiledTransform, TransformCompiler, TransformError, TransformSource};
use crate::TaskStage;

/// Which per-item failures are recorded and skipped instead of surfaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TolerancePolicy {
    pub tolerate_io_errors: bool,
    pub tolerate_transform_errors: bool,
    /// A missing file behind a transform error counts as a skip.
    pub ignore_file_not_found: bool,
}

impl Default for TolerancePolicy {
    fn default() -> Self {
        Self {
            tolerate_io_errors: false,
            tolerate_transform_errors: true,
            ignore_file_not_found: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TranslationConfig {
    pub workers: usize,
    /// Applies to every task that does not carry a policy of its own.
    pub policy: TolerancePolicy,
    /// When false, characters above U+FFFF are replaced with U+FFFD in output.
    pub use_full_utf8: bool,
    /// Passed to every transform; task parameters win on collision.
    pub parameters: BTreeMap<String, String>,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            workers: available_workers(),
            policy: TolerancePolicy::default(),
            use_full_utf8: true,
            parameters: BTreeMap::new(),
        }
    }
}

fn available_workers() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

/// One unit of translation work, consumed by exactly one worker.
#[derive(Debug, Clone)]
pub struct TranslationTask {
    pub item: StoredItem,
    pub target: ResourceType,
    pub transform: TransformSource,
    pub parameters: BTreeMap<String, String>,
    /// Overrides the pipeline's policy for this task.
    pub policy: Option<TolerancePolicy>,
}

impl TranslationTask {
    pub fn new(item: StoredItem, target: ResourceType, transform: TransformSource) -> Self {
        Self {
            item,
            target,
            transform,
            parameters: BTreeMap::new(),
            policy: None,
        }
    }

    pub fn with_parameter(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(name.into(), value.into());
        self
    }

    pub fn with_policy(mut self, policy: TolerancePolicy) -> Self {
        self.policy = Some(policy);
        self
    }
}

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error("io error while {stage}: {cause}")]
    Io {
        stage: TaskStage,
        #[source]
        cause: StoreError,
    },
    #[error(transparent)]
    Transform(#[from] TransformError),
}

impl TranslationError {
    pub fn stage(&self) -> TaskStage {
        match self {
            TranslationError::Io { stage, .. } => *stage,
            TranslationError::Transform(_) => TaskStage::Transforming,
        }
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("translation pipeline is shut down")]
    Closed,
    #[error("translation of {identity} failed while {stage}: {message}")]
    Untolerated {
        identity: ItemIdentity,
        stage: TaskStage,
        message: String,
    },
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error("cannot start translation worker: {0}")]
    Spawn(#[source] io::Error),
}

/// A task that did not produce output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskFailure {
    pub identity: ItemIdentity,
    pub stage: TaskStage,
    pub message: String,
    pub tolerated: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TranslationReport {
    pub succeeded: usize,
    pub failed: usize,
    pub skipped: usize,
    pub failures: Vec<TaskFailure>,
}

impl TranslationReport {
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed + self.skipped
    }
}

#[derive(Default)]
struct Progress {
    in_flight: usize,
    report: TranslationReport,
    untolerated: Option<TaskFailure>,
}

#[derive(Default)]
struct Tracker {
    progress: Mutex<Progress>,
    drained: Condvar,
}

impl Tracker {
    fn lock(&self) -> MutexGuard<'_, Progress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn finish(&self, outcome: TaskOutcome) {
        let mut progress = self.lock();
        match outcome {
            TaskOutcome::Succeeded => progress.report.succeeded += 1,
            TaskOutcome::Skipped => progress.report.skipped += 1,
            TaskOutcome::Failed(failure) => {
                progress.report.failed += 1;
                if !failure.tolerated && progress.untolerated.is_none() {
                    progress.untolerated = Some(failure.clone());
                }
                progress.report.failures.push(failure);
            }
        }
        progress.in_flight -= 1;
        if progress.in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

enum TaskOutcome {
    Succeeded,
    Skipped,
    Failed(TaskFailure),
}

struct WorkerContext {
    compiler: Arc<dyn TransformCompiler>,
    input: Arc<dyn ItemStore>,
    output: Arc<dyn ItemStore>,
    global_parameters: BTreeMap<String, String>,
    policy: TolerancePolicy,
    use_full_utf8: bool,
    tracker: Arc<Tracker>,
}

pub struct TranslationPipeline {
    sender: Option<Sender<TranslationTask>>,
    workers: Vec<JoinHandle<()>>,
    tracker: Arc<Tracker>,
}

impl TranslationPipeline {
    /// Starts `min(config.workers, available cores)` workers reading from
    /// `input` and writing to `output`.
    pub fn new(
        config: TranslationConfig,
        compiler: Arc<dyn TransformCompiler>,
        input: Arc<dyn ItemStore>,
        output: Arc<dyn ItemStore>,
    ) -> Result<Self, PipelineError> {
        if config.workers == 0 {
            return Err(ConfigurationError::NoWorkers.into());
        }
        let worker_count = config.workers.min(available_workers());
        let (sender, receiver) = mpsc::channel();
        let receiver = Arc::new(Mutex::new(receiver));
        let tracker = Arc::new(Tracker::default());
        let context = Arc::new(WorkerContext {
            compiler,
            input,
            output,
            global_parameters: config.parameters,
            policy: config.policy,
            use_full_utf8: config.use_full_utf8,
            tracker: tracker.clone(),
        });

        let mut workers = Vec::with_capacity(worker_count);
        for index in 0..worker_count {
            let receiver = receiver.clone();
            let context = context.clone();
            let handle = thread::Builder::new()
                .name(format!("translate-{index}"))
                .spawn(move || run_worker(index, &receiver, &context))
                .map_err(PipelineError::Spawn)?;
            workers.push(handle);
        }
        engine_info!("Translation pipeline started with {} workers", worker_count);

        Ok(Self {
            sender: Some(sender),
            workers,
            tracker,
        })
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues a task without waiting for it.
    ///
    /// Fails once the pipeline is shut down or after a task failed in a way
    /// its policy does not tolerate.
    pub fn submit(&self, task: TranslationTask) -> Result<(), PipelineError> {
        let sender = self.sender.as_ref().ok_or(PipelineError::Closed)?;
        {
            let mut progress = self.tracker.lock();
            if let Some(failure) = &progress.untolerated {
                return Err(untolerated(failure));
            }
            progress.in_flight += 1;
        }
        if sender.send(task).is_err() {
            // Every worker has exited.
            let mut progress = self.tracker.lock();
            progress.in_flight -= 1;
            return Err(PipelineError::Closed);
        }
        Ok(())
    }

    /// Blocks until every task submitted so far has finished.
    pub fn await_drain(&self) -> Result<TranslationReport, PipelineError> {
        let mut progress = self.tracker.lock();
        while progress.in_flight > 0 {
            progress = self
                .tracker
                .drained
                .wait(progress)
                .unwrap_or_else(PoisonError::into_inner);
        }
        match &progress.untolerated {
            Some(failure) => Err(untolerated(failure)),
            None => Ok(progress.report.clone()),
        }
    }

    /// Current counts without waiting.
    pub fn snapshot(&self) -> TranslationReport {
        self.tracker.lock().report.clone()
    }

    /// Stops accepting tasks, lets queued ones finish and returns the report.
    pub fn shutdown(mut self) -> Result<TranslationReport, PipelineError> {
        self.close();
        let progress = self.tracker.lock();
        engine_info!(
            "Translation pipeline drained: {} succeeded, {} failed, {} skipped",
            progress.report.succeeded,
            progress.report.failed,
            progress.report.skipped
        );
        match &progress.untolerated {
            Some(failure) => Err(untolerated(failure)),
            None => Ok(progress.report.clone()),
        }
    }

    fn close(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                engine_error!("Translation worker panicked");
            }
        }
    }
}

impl Drop for TranslationPipeline {
    fn drop(&mut self) {
        self.close();
    }
}

fn untolerated(failure: &TaskFailure) -> PipelineError {
    PipelineError::Untolerated {
        identity: failure.identity,
        stage: failure.stage,
        message: failure.message.clone(),
    }
}

fn run_worker(index: usize, receiver: &Mutex<Receiver<TranslationTask>>, context: &WorkerContext) {
    set_worker_label(format!("translate-{index}"));
    let mut cache: HashMap<TransformSource, Box<dyn CompiledTransform>> = HashMap::new();
    loop {
        let next = receiver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recv();
        let Ok(task) = next else {
            break;
        };
        let mut stage = TaskStage::FetchingInput;
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            translate(&task, &mut cache, context, &mut stage)
        }));
        let policy = task.policy.unwrap_or(context.policy);
        let outcome = match result {
            Ok(Ok(())) => TaskOutcome::Succeeded,
            Ok(Err(err)) => classify(&task.item.identity, policy, err),
            Err(payload) => {
                // Compiled afresh for the next task.
                cache.remove(&task.transform);
                panicked(&task.item.identity, policy, stage, &*payload)
            }
        };
        context.tracker.finish(outcome);
    }
    engine_debug!("[{}] worker exiting", worker_label());
}

fn translate(
    task: &TranslationTask,
    cache: &mut HashMap<TransformSource, Box<dyn CompiledTransform>>,
    context: &WorkerContext,
    stage: &mut TaskStage,
) -> Result<(), TranslationError> {
    let identity = &task.item.identity;

    let input = read_input(context.input.as_ref(), &task.item).map_err(|cause| {
        TranslationError::Io {
            stage: TaskStage::FetchingInput,
            cause,
        }
    })?;

    *stage = TaskStage::Transforming;
    let compiled = match cache.entry(task.transform.clone()) {
        Entry::Occupied(entry) => entry.into_mut(),
        Entry::Vacant(entry) => {
            engine_debug!("[{}] compiling transform {}", worker_label(), task.transform.name());
            entry.insert(context.compiler.compile(&task.transform)?)
        }
    };

    let mut transformer = compiled.new_transformer();
    let mut parameters = context.global_parameters.clone();
    parameters.extend(task.parameters.clone());
    for (name, value) in &parameters {
        if let Err(err) = transformer.set_parameter(name, value) {
            engine_warn!("[{}] {} for {}, skipping it", worker_label(), err, identity);
        }
    }
    let mut output = transformer.transform(&mut input.as_slice())?;
    drop(transformer);

    if !context.use_full_utf8 {
        output = restrict_to_bmp(output);
    }

    *stage = TaskStage::WritingOutput;
    context
        .output
        .store_item(identity, task.target, &output)
        .map_err(|cause| TranslationError::Io {
            stage: TaskStage::WritingOutput,
            cause,
        })?;
    Ok(())
}

fn read_input(store: &dyn ItemStore, item: &StoredItem) -> Result<Vec<u8>, StoreError> {
    let mut reader = store.open(item)?;
    let mut data = Vec::new();
    reader.read_to_end(&mut data)?;
    Ok(data)
}

fn classify(identity: &ItemIdentity, policy: TolerancePolicy, err: TranslationError) -> TaskOutcome {
    let identity = *identity;
    let stage = err.stage();
    let tolerated = match &err {
        TranslationError::Io { .. } => policy.tolerate_io_errors,
        TranslationError::Transform(transform) => {
            if policy.ignore_file_not_found && transform.is_file_not_found() {
                engine_info!(
                    "[{}] skipping {}: file not found ({})",
                    worker_label(),
                    identity,
                    transform
                );
                return TaskOutcome::Skipped;
            }
            policy.tolerate_transform_errors
        }
    };

    if tolerated {
        engine_warn!(
            "[{}] translation of {} failed while {}: {}",
            worker_label(),
            identity,
            stage,
            err
        );
    } else {
        engine_error!(
            "[{}] translation of {} failed while {}: {}",
            worker_label(),
            identity,
            stage,
            err
        );
    }
    TaskOutcome::Failed(TaskFailure {
        identity,
        stage,
        message: err.to_string(),
        tolerated,
    })
}

/// A panic is a transform failure when it happens while transforming and an
/// io failure otherwise, so the same tolerance flags apply.
fn panicked(
    identity: &ItemIdentity,
    policy: TolerancePolicy,
    stage: TaskStage,
    payload: &(dyn Any + Send),
) -> TaskOutcome {
    let cause = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    let tolerated = match stage {
        TaskStage::Transforming => policy.tolerate_transform_errors,
        TaskStage::FetchingInput | TaskStage::WritingOutput => policy.tolerate_io_errors,
    };
    engine_error!(
        "[{}] translation of {} panicked while {}: {}",
        worker_label(),
        identity,
        stage,
        cause
    );
    TaskOutcome::Failed(TaskFailure {
        identity: *identity,
        stage,
        message: format!("panicked: {cause}"),
        tolerated,
    })
}

/// Replaces characters outside the 16-bit range with U+FFFD. Non-UTF-8 output
/// is left untouched.
pub fn restrict_to_bmp(output: Vec<u8>) -> Vec<u8> {
    match String::from_utf8(output) {
        Ok(text) if text.chars().any(|c| c as u32 > 0xFFFF) => text
            .chars()
            .map(|c| if c as u32 > 0xFFFF { char::REPLACEMENT_CHARACTER } else { c })
            .collect::<String>()
            .into_bytes(),
        Ok(text) => text.into_bytes(),
        Err(err) => err.into_bytes(),
    }
}
