//! Status and progress reporting, plus cooperative cancellation
//!
//! Reporting is fire-and-forget: sinks never push back on the pipeline and a
//! stage that reports nothing is still valid. Marshalling events to a UI
//! thread is the caller's job; [`ChannelSink`] hands them over a channel.

use crate::{PipelineError, Result, RunOptions};
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::mpsc;

/// Per-waypoint loops check the cancellation flag once every this many items
pub const CANCEL_POLL_INTERVAL: usize = 64;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// A single event forwarded to a sink
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgressEvent {
    StageStarted { title: String },
    Status { severity: Severity, message: String },
    Progress { current: usize, total: usize },
}

/// Receiver of status and progress reports
pub trait ProgressSink: Send + Sync {
    fn report_status(&self, severity: Severity, message: &str);

    fn report_progress(&self, current: usize, total: usize);

    fn stage_started(&self, title: &str) {
        tracing::debug!("Stage started: {}", title);
    }
}

/// Discards everything
pub struct NullSink;

impl ProgressSink for NullSink {
    fn report_status(&self, _severity: Severity, _message: &str) {}

    fn report_progress(&self, _current: usize, _total: usize) {}
}

/// Headless sink that writes every report to the log
pub struct TracingSink;

impl ProgressSink for TracingSink {
    fn report_status(&self, severity: Severity, message: &str) {
        match severity {
            Severity::Info => tracing::info!("{}", message),
            Severity::Warning => tracing::warn!("{}", message),
            Severity::Error => tracing::error!("{}", message),
        }
    }

    fn report_progress(&self, current: usize, total: usize) {
        tracing::trace!("Progress {}/{}", current, total);
    }

    fn stage_started(&self, title: &str) {
        tracing::info!("Running stage: {}", title);
    }
}

/// Forwards events over an unbounded channel to whoever owns the UI
#[derive(Clone)]
pub struct ChannelSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }

    fn send(&self, event: ProgressEvent) {
        // A dropped receiver just means nobody is listening anymore
        let _ = self.sender.send(event);
    }
}

impl ProgressSink for ChannelSink {
    fn report_status(&self, severity: Severity, message: &str) {
        self.send(ProgressEvent::Status {
            severity,
            message: message.to_string(),
        });
    }

    fn report_progress(&self, current: usize, total: usize) {
        self.send(ProgressEvent::Progress { current, total });
    }

    fn stage_started(&self, title: &str) {
        self.send(ProgressEvent::StageStarted {
            title: title.to_string(),
        });
    }
}

/// Keeps every event in memory, in order
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, event: ProgressEvent) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Status messages only, without severities
    pub fn messages(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Status { message, .. } => Some(message),
                _ => None,
            })
            .collect()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                ProgressEvent::Status {
                    severity: Severity::Warning,
                    message,
                } => Some(message),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CollectingSink {
    fn report_status(&self, severity: Severity, message: &str) {
        self.push(ProgressEvent::Status {
            severity,
            message: message.to_string(),
        });
    }

    fn report_progress(&self, current: usize, total: usize) {
        self.push(ProgressEvent::Progress { current, total });
    }

    fn stage_started(&self, title: &str) {
        self.push(ProgressEvent::StageStarted {
            title: title.to_string(),
        });
    }
}

impl<T: ProgressSink + ?Sized> ProgressSink for Arc<T> {
    fn report_status(&self, severity: Severity, message: &str) {
        (**self).report_status(severity, message)
    }

    fn report_progress(&self, current: usize, total: usize) {
        (**self).report_progress(current, total)
    }

    fn stage_started(&self, title: &str) {
        (**self).stage_started(title)
    }
}

/// Shared cancellation flag; cloning shares the flag
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Everything a running stage may touch besides the documents
pub struct StageContext<'a> {
    title: &'a str,
    pub options: &'a RunOptions,
    sink: &'a dyn ProgressSink,
    cancel: &'a CancelToken,
}

impl<'a> StageContext<'a> {
    pub fn new(
        title: &'a str,
        options: &'a RunOptions,
        sink: &'a dyn ProgressSink,
        cancel: &'a CancelToken,
    ) -> Self {
        Self {
            title,
            options,
            sink,
            cancel,
        }
    }

    /// Title of the running stage
    pub fn title(&self) -> &str {
        self.title
    }

    pub fn status(&self, severity: Severity, message: impl AsRef<str>) {
        self.sink.report_status(severity, message.as_ref());
    }

    pub fn info(&self, message: impl AsRef<str>) {
        self.status(Severity::Info, message);
    }

    pub fn warn(&self, message: impl AsRef<str>) {
        self.status(Severity::Warning, message);
    }

    pub fn progress(&self, current: usize, total: usize) {
        self.sink.report_progress(current, total);
    }

    /// Fail with [`PipelineError::Terminated`] if cancellation was requested
    pub fn check_cancelled(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PipelineError::Terminated);
        }
        Ok(())
    }

    /// Like [`Self::check_cancelled`], but only every [`CANCEL_POLL_INTERVAL`] iterations
    #[inline]
    pub fn poll_cancelled(&self, iteration: usize) -> Result<()> {
        if iteration % CANCEL_POLL_INTERVAL == 0 {
            self.check_cancelled()
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancel_token_is_shared_between_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }

    #[test]
    fn test_poll_only_checks_on_interval() {
        let options = RunOptions::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = StageContext::new("test", &options, &NullSink, &cancel);

        assert!(ctx.poll_cancelled(1).is_ok());
        assert!(ctx.poll_cancelled(CANCEL_POLL_INTERVAL - 1).is_ok());
        assert!(matches!(
            ctx.poll_cancelled(CANCEL_POLL_INTERVAL),
            Err(PipelineError::Terminated)
        ));
    }

    #[test]
    fn test_channel_sink_keeps_order() {
        let (sink, mut receiver) = ChannelSink::channel();
        sink.stage_started("Dedup");
        sink.report_status(Severity::Warning, "careful");
        sink.report_progress(1, 2);

        assert_eq!(
            receiver.try_recv().unwrap(),
            ProgressEvent::StageStarted {
                title: "Dedup".to_string()
            }
        );
        assert_eq!(
            receiver.try_recv().unwrap(),
            ProgressEvent::Status {
                severity: Severity::Warning,
                message: "careful".to_string()
            }
        );
        assert_eq!(
            receiver.try_recv().unwrap(),
            ProgressEvent::Progress { current: 1, total: 2 }
        );
    }

    #[test]
    fn test_channel_sink_survives_dropped_receiver() {
        let (sink, receiver) = ChannelSink::channel();
        drop(receiver);
        sink.report_status(Severity::Info, "nobody listens");
    }

    #[test]
    fn test_collecting_sink_filters() {
        let sink = CollectingSink::new();
        sink.report_status(Severity::Info, "one");
        sink.report_status(Severity::Warning, "two");
        sink.report_progress(3, 4);
        assert_eq!(sink.messages(), ["one", "two"]);
        assert_eq!(sink.warnings(), ["two"]);
        assert_eq!(sink.events().len(), 3);
    }
}
