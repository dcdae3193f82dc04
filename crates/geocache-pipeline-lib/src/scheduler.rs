//! Scheduler - orders and executes transformer stages
//!
//! This module provides the explicit transformer registry, the resolution of
//! conditional and related-conditional enablement, the stable ordering of the
//! enabled stages and their sequential execution over the document set.

use crate::progress::{CancelToken, ProgressSink, StageContext};
use crate::storage::Storage;
use crate::transformer::{Candidate, CandidateSet, run_stage};
use crate::{Document, PipelineError, Result, RunOptions, Transformer, TransformerId};

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

type Factory = Box<dyn Fn() -> Box<dyn Transformer> + Send + Sync>;

/// Explicit list of transformer constructors, in discovery order
#[derive(Default)]
pub struct TransformerRegistry {
    factories: Vec<Factory>,
}

impl TransformerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor; registration order breaks execution order ties
    pub fn register<F>(&mut self, factory: F) -> &mut Self
    where
        F: Fn() -> Box<dyn Transformer> + Send + Sync + 'static,
    {
        self.factories.push(Box::new(factory));
        self
    }

    pub fn with<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Transformer> + Send + Sync + 'static,
    {
        self.register(factory);
        self
    }

    /// Fresh instances for one run; stages are never reused across runs
    pub fn instantiate(&self) -> Vec<Box<dyn Transformer>> {
        self.factories.iter().map(|f| f()).collect()
    }

    pub fn len(&self) -> usize {
        self.factories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.factories.is_empty()
    }
}

/// Resolved, ordered stages of one run
pub struct ExecutionPlan {
    stages: Vec<Box<dyn Transformer>>,
    skipped: Vec<TransformerId>,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl ExecutionPlan {
    /// Resolve enablement and order the enabled stages
    ///
    /// Related-conditional transformers see the full candidate set, so a
    /// transformer can suppress itself because of a conflicting one even when
    /// that conflicting one is disabled. A single pass is enough because
    /// those decisions only look at presence of other transformer types.
    pub fn resolve(candidates: Vec<Box<dyn Transformer>>, options: &RunOptions) -> Self {
        let candidate_set = CandidateSet::new(
            candidates
                .iter()
                .enumerate()
                .map(|(discovery_index, t)| Candidate {
                    id: t.id(),
                    title: t.title().to_string(),
                    order: t.execution_order(),
                    capabilities: t.capabilities(),
                    discovery_index,
                })
                .collect(),
        );

        let mut stages = Vec::with_capacity(candidates.len());
        let mut skipped = Vec::new();
        for transformer in candidates {
            let capabilities = transformer.capabilities();
            let enabled = (!capabilities.conditional || transformer.is_enabled(options))
                && (!capabilities.related_conditional
                    || transformer.is_enabled_given(&candidate_set));
            if enabled {
                stages.push(transformer);
            } else {
                tracing::debug!("Skipping disabled stage {}", transformer.title());
                skipped.push(transformer.id());
            }
        }

        // Stable: ties keep registration order
        stages.sort_by_key(|t| t.execution_order());

        Self { stages, skipped }
    }

    pub fn titles(&self) -> Vec<&str> {
        self.stages.iter().map(|t| t.title()).collect()
    }

    pub fn ids(&self) -> Vec<TransformerId> {
        self.stages.iter().map(|t| t.id()).collect()
    }

    pub fn skipped(&self) -> &[TransformerId] {
        &self.skipped
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Run every stage in order against the documents
    ///
    /// A stage error aborts the run and is wrapped with the stage title.
    /// Cancellation is passed through as [`PipelineError::Terminated`].
    pub fn execute(
        &mut self,
        documents: &mut Vec<Document>,
        options: &RunOptions,
        sink: &dyn ProgressSink,
        cancel: &CancelToken,
    ) -> Result<()> {
        for stage in self.stages.iter_mut() {
            if cancel.is_cancelled() {
                return Err(PipelineError::Terminated);
            }

            let title = stage.title().to_string();
            #[cfg(feature = "profiling")]
            profiling::scope!("scheduler::stage", title.as_str());

            sink.stage_started(&title);
            let ctx = StageContext::new(&title, options, sink, cancel);
            match run_stage(stage.as_mut(), documents, &ctx) {
                Ok(()) => {}
                Err(PipelineError::Terminated) => return Err(PipelineError::Terminated),
                Err(e) => {
                    tracing::error!("Stage '{}' failed: {}", title, e);
                    return Err(PipelineError::Stage {
                        title,
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(())
    }
}

/// How a run ended, when it did not fail
#[derive(Debug)]
pub enum RunOutcome {
    Completed(Vec<Document>),
    /// Cancellation was requested; partial output was discarded
    Cancelled,
}

impl RunOutcome {
    pub fn documents(self) -> Option<Vec<Document>> {
        match self {
            Self::Completed(documents) => Some(documents),
            Self::Cancelled => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Releases the single-run flag when the run ends, however it ends
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PipelineError::AlreadyRunning)?;
        Ok(Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Top-level pipeline engine
pub struct Scheduler {
    registry: TransformerRegistry,
    settings: Option<Arc<dyn Storage>>,
    sink: Arc<dyn ProgressSink>,
    running: AtomicBool,
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Scheduler {
    pub fn new(registry: TransformerRegistry, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            registry,
            settings: None,
            sink,
            running: AtomicBool::new(false),
        }
    }

    /// Storage that configurable transformers load their settings from
    pub fn with_settings(mut self, storage: Arc<dyn Storage>) -> Self {
        self.settings = Some(storage);
        self
    }

    pub fn registry(&self) -> &TransformerRegistry {
        &self.registry
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Instantiate, configure and resolve the registered transformers
    pub fn plan(&self, options: &RunOptions) -> Result<ExecutionPlan> {
        let mut candidates = self.registry.instantiate();
        if let Some(storage) = &self.settings {
            for transformer in candidates.iter_mut() {
                if transformer.capabilities().configurable {
                    transformer.configure(storage.as_ref()).map_err(|e| {
                        PipelineError::Stage {
                            title: transformer.title().to_string(),
                            source: Box::new(e),
                        }
                    })?;
                }
            }
        }
        Ok(ExecutionPlan::resolve(candidates, options))
    }

    /// Run the pipeline on the calling thread
    pub fn run(
        &self,
        documents: Vec<Document>,
        options: &RunOptions,
        cancel: &CancelToken,
    ) -> Result<RunOutcome> {
        let _guard = RunGuard::acquire(&self.running)?;

        let mut plan = self.plan(options)?;
        tracing::info!("Running {} stages: {}", plan.len(), plan.titles().join(", "));

        let mut documents = documents;
        match plan.execute(&mut documents, options, self.sink.as_ref(), cancel) {
            Ok(()) => Ok(RunOutcome::Completed(documents)),
            Err(PipelineError::Terminated) => {
                tracing::info!("Pipeline run cancelled");
                Ok(RunOutcome::Cancelled)
            }
            Err(e) => Err(e),
        }
    }

    /// Run the pipeline on a blocking worker thread
    ///
    /// Must be called from within a tokio runtime. Progress keeps flowing to
    /// the scheduler's sink while the caller awaits the handle.
    pub fn spawn(
        self: &Arc<Self>,
        documents: Vec<Document>,
        options: RunOptions,
        cancel: CancelToken,
    ) -> tokio::task::JoinHandle<Result<RunOutcome>> {
        let scheduler = Arc::clone(self);
        tokio::task::spawn_blocking(move || scheduler.run(documents, &options, &cancel))
    }
}
