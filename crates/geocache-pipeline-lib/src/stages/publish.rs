//! Publishing: handing the final document list to a target
//!
//! Targets come and go (devices get plugged in and out). Whoever detects that
//! pushes a [`TargetChange`] through a [`TargetWatch`]; subscribers never poll.

use crate::utils::plural;
use crate::{
    Capabilities, Document, ExecutionOrder, Granularity, PipelineError, Result, RunOptions,
    StageContext, Transformer, TransformerId,
};
use std::fmt;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

pub const PUBLISH_ID: &str = "publish";

/// Where published files end up
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Destination {
    pub name: String,
    pub path: PathBuf,
}

impl Destination {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self { name, path }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.path.display())
    }
}

/// Receives the final documents
pub trait PublisherTarget: Send + Sync {
    fn publish(&self, documents: &[Document], destination: &Destination) -> Result<()>;
}

/// Runs after a successful publish, e.g. ejecting a removable device
pub trait PostPublishAction: Send + Sync {
    fn describe(&self) -> &str;

    fn run(&self, destination: &Destination) -> Result<()>;
}

/// Writes one GPX file per document into the destination directory
#[derive(Default)]
pub struct DirectoryTarget;

impl DirectoryTarget {
    pub fn new() -> Self {
        Self
    }

    /// File name for the document at `index`; unnamed documents get a synthesized one
    pub fn file_name(document: &Document, index: usize) -> String {
        match &document.file_name {
            Some(name) => Path::new(name)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| format!("document-{}.gpx", index + 1)),
            None => format!("document-{}.gpx", index + 1),
        }
    }
}

impl PublisherTarget for DirectoryTarget {
    fn publish(&self, documents: &[Document], destination: &Destination) -> Result<()> {
        std::fs::create_dir_all(&destination.path)?;
        for (i, document) in documents.iter().enumerate() {
            let path = destination.path.join(Self::file_name(document, i));
            tracing::debug!("Writing {} waypoints to {:?}", document.waypoints.len(), path);
            let file = std::fs::File::create(&path)?;
            document.write_gpx(BufWriter::new(file))?;
        }
        Ok(())
    }
}

/// Target availability events
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TargetChange {
    Attached(Destination),
    Detached(Destination),
}

/// Handle returned by [`TargetWatch::subscribe`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Subscription(u64);

type Listener = Arc<dyn Fn(&TargetChange) + Send + Sync>;

/// Fan-out of target changes to every subscriber
#[derive(Default)]
pub struct TargetWatch {
    listeners: Mutex<(u64, Vec<(Subscription, Listener)>)>,
}

impl TargetWatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, listener: impl Fn(&TargetChange) + Send + Sync + 'static) -> Result<Subscription> {
        let mut guard = self.listeners.lock().map_err(|_| lock_error())?;
        let (next_id, listeners) = &mut *guard;
        let subscription = Subscription(*next_id);
        *next_id += 1;
        listeners.push((subscription, Arc::new(listener)));
        Ok(subscription)
    }

    /// Returns false if the subscription was already gone
    pub fn unsubscribe(&self, subscription: Subscription) -> Result<bool> {
        let mut guard = self.listeners.lock().map_err(|_| lock_error())?;
        let before = guard.1.len();
        guard.1.retain(|(s, _)| *s != subscription);
        Ok(guard.1.len() != before)
    }

    /// Push a change to every subscriber, in subscription order
    pub fn notify(&self, change: &TargetChange) -> Result<()> {
        // Listeners run outside the lock so they may subscribe or unsubscribe
        let listeners: Vec<Listener> = {
            let guard = self.listeners.lock().map_err(|_| lock_error())?;
            guard.1.iter().map(|(_, l)| Arc::clone(l)).collect()
        };
        tracing::debug!("Target change {:?} to {} listeners", change, listeners.len());
        for listener in listeners {
            listener(change);
        }
        Ok(())
    }
}

fn lock_error() -> PipelineError {
    PipelineError::Publish("target watch lock poisoned".to_string())
}

/// Final stage: hands the documents to a target
pub struct Publish {
    target: Arc<dyn PublisherTarget>,
    destination: Destination,
    post_action: Option<Arc<dyn PostPublishAction>>,
}

impl Publish {
    pub fn new(target: Arc<dyn PublisherTarget>, destination: Destination) -> Self {
        Self {
            target,
            destination,
            post_action: None,
        }
    }

    pub fn with_post_action(mut self, action: Arc<dyn PostPublishAction>) -> Self {
        self.post_action = Some(action);
        self
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for Publish {
    fn id(&self) -> TransformerId {
        TransformerId::new(PUBLISH_ID)
    }

    fn title(&self) -> &str {
        "Publish"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::PUBLISH
    }

    fn granularity(&self) -> Granularity {
        Granularity::FileSet
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            conditional: true,
            special: true,
            ..Default::default()
        }
    }

    fn is_enabled(&self, options: &RunOptions) -> bool {
        !options.viewer_cache_only
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        ctx.check_cancelled()?;
        if documents.is_empty() {
            ctx.warn("Nothing to publish");
            return Ok(());
        }

        self.target.publish(documents, &self.destination)?;
        ctx.info(format!(
            "Published {} to {}",
            plural(documents.len(), "file", "files"),
            self.destination.name
        ));

        if let Some(action) = &self.post_action {
            match action.run(&self.destination) {
                Ok(()) => ctx.info(format!("{}: done", action.describe())),
                Err(e) => ctx.warn(format!("{} failed: {}", action.describe(), e)),
            }
        }
        Ok(())
    }
}
