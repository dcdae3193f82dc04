mod logging;
mod settings;

pub use logging::setup_logging;
pub use settings::Settings;

use geocache_pipeline_lib::progress::{ChannelSink, ProgressEvent, Severity, TracingSink};
use geocache_pipeline_lib::remote::OfflineService;
use geocache_pipeline_lib::stages::{
    CoordinateOverride, Destination, DirectoryTarget, EditorBackup, PrefixSettings, PublisherTarget,
    StandardStages, disabled::PREFIX_DISABLED_ID,
};
use geocache_pipeline_lib::storage::{FileStorage, SETTINGS_TABLE, Storage, save_json};
use geocache_pipeline_lib::{
    CancelToken, Document, PipelineError, ProgressSink, RunOptions, RunOutcome, Scheduler,
    WaypointEditor,
};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedReceiver;

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Storage(#[from] geocache_pipeline_lib::storage::StorageError),

    #[error("Pipeline worker failed: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Outcome of the whole command
#[derive(Debug, PartialEq, Eq)]
pub enum Finished {
    Done,
    Cancelled,
}

/// Headless front end: owns storage, runs the passes and forwards progress to the log
pub struct GeocachePipelineApp {
    settings: Settings,
    storage: Arc<dyn Storage>,
}

impl GeocachePipelineApp {
    pub fn new(settings: Settings) -> Result<Self, AppError> {
        let path = settings.storage.clone().unwrap_or_else(FileStorage::default_path);
        let storage: Arc<dyn Storage> = Arc::new(FileStorage::open(path)?);
        Ok(Self::with_storage(settings, storage))
    }

    pub fn with_storage(settings: Settings, storage: Arc<dyn Storage>) -> Self {
        Self { settings, storage }
    }

    /// Apply the storage-only requests: new prefix and forgotten edits
    fn update_storage(&self) -> Result<(), AppError> {
        if let Some(prefix) = &self.settings.disabled_prefix {
            let stored = PrefixSettings {
                prefix: prefix.clone(),
            };
            save_json(self.storage.as_ref(), SETTINGS_TABLE, PREFIX_DISABLED_ID, &stored)?;
            tracing::info!("Disabled caches will be prefixed with {:?}", prefix);
        }

        let backup = EditorBackup::new(self.storage.clone());
        for code in &self.settings.forget {
            backup.remove_customizations(code)?;
            tracing::info!("Forgot saved edits of {}", code.to_uppercase());
        }
        Ok(())
    }

    fn scheduler(&self, sink: Arc<dyn ProgressSink>, publish: bool) -> Arc<Scheduler> {
        let publish = match (&self.settings.output, publish) {
            (Some(dir), true) => Some((
                Arc::new(DirectoryTarget::new()) as Arc<dyn PublisherTarget>,
                Destination::new(dir.clone()),
            )),
            _ => None,
        };
        let stages = StandardStages {
            inputs: self.settings.gpx_files.clone(),
            storage: self.storage.clone(),
            service: Arc::new(OfflineService),
            publish,
            remove_disabled: self.settings.remove_disabled,
        };
        Arc::new(Scheduler::new(stages.registry(), sink).with_settings(self.storage.clone()))
    }

    /// Run one pass in the background; ctrl-c cancels it
    async fn run_pass(
        &self,
        sink: Arc<dyn ProgressSink>,
        options: RunOptions,
        publish: bool,
    ) -> Result<RunOutcome, AppError> {
        let scheduler = self.scheduler(sink, publish);
        let cancel = CancelToken::new();
        let mut handle = scheduler.spawn(Vec::new(), options, cancel.clone());

        tokio::select! {
            result = &mut handle => Ok(result??),
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("Interrupted, cancelling...");
                cancel.cancel();
                Ok(handle.await??)
            }
        }
    }

    /// Apply the requested coordinate overrides and persist the edits of the cache documents
    fn save_edits(&self, documents: &mut [Document]) -> Result<(), AppError> {
        let overrides = self
            .settings
            .coordinate_overrides()
            .map_err(AppError::InvalidArgument)?;

        let editor = CoordinateOverride::new();
        for (code, coordinates) in &overrides {
            let mut found = false;
            for waypoint in documents
                .iter_mut()
                .flat_map(|d| d.waypoints.iter_mut())
                .filter(|w| w.code() == *code)
            {
                editor.edit(waypoint, coordinates)?;
                found = true;
            }
            if !found {
                tracing::warn!("Cache {} is not part of the loaded files", code);
            }
        }

        let summary = EditorBackup::new(self.storage.clone()).save(documents)?;
        tracing::debug!("Save summary: {:?}", summary);
        Ok(())
    }

    pub async fn run(&self) -> Result<Finished, AppError> {
        self.settings
            .coordinate_overrides()
            .map_err(AppError::InvalidArgument)?;
        self.update_storage()?;

        let (channel, events) = ChannelSink::channel();
        let forwarder = tokio::spawn(forward_events(events));
        let sink: Arc<dyn ProgressSink> = Arc::new(channel);

        let finished = self.run_passes(sink).await;
        // Every sender is gone once the passes are done
        forwarder.await?;
        finished
    }

    async fn run_passes(&self, sink: Arc<dyn ProgressSink>) -> Result<Finished, AppError> {
        if self.settings.needs_viewer_pass() {
            let options = RunOptions {
                viewer_cache_only: true,
                local_storage_only: self.settings.local_storage_only,
            };
            let Some(mut documents) = self.run_pass(sink.clone(), options, false).await?.documents()
            else {
                return Ok(Finished::Cancelled);
            };
            if self.settings.save_edits || !self.settings.set_coordinates.is_empty() {
                self.save_edits(&mut documents)?;
            }
            summarize(&documents);
        }

        if self.settings.viewer_cache_only {
            return Ok(Finished::Done);
        }
        if self.settings.output.is_none() {
            tracing::info!("No output directory given, nothing to publish");
            return Ok(Finished::Done);
        }

        let options = RunOptions {
            viewer_cache_only: false,
            local_storage_only: self.settings.local_storage_only,
        };
        match self.run_pass(sink, options, true).await? {
            RunOutcome::Completed(documents) => {
                summarize(&documents);
                Ok(Finished::Done)
            }
            RunOutcome::Cancelled => Ok(Finished::Cancelled),
        }
    }
}

fn summarize(documents: &[Document]) {
    for document in documents {
        tracing::info!(
            "{}: {} waypoints, {} geocaches",
            document.display_name(),
            document.waypoints.len(),
            document.geocache_count()
        );
    }
}

/// Log every progress event until the channel closes
async fn forward_events(mut events: UnboundedReceiver<ProgressEvent>) {
    let log = TracingSink;
    while let Some(event) = events.recv().await {
        match event {
            ProgressEvent::StageStarted { title } => log.stage_started(&title),
            ProgressEvent::Status { severity, message } => log.report_status(severity, &message),
            ProgressEvent::Progress { current, total } => log.report_progress(current, total),
        }
    }
    log.report_status(Severity::Info, "Pipeline finished");
}
