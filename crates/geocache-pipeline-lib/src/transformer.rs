//! Transformer contract
//!
//! A transformer is one stage of the pipeline. It declares an identity, a
//! title, an execution order and the granularity it works at, and overrides
//! the matching processing entry point. The default entry points cascade from
//! coarse to fine: `process_all` walks documents, `process_document` walks
//! waypoints.

use crate::progress::StageContext;
use crate::storage::Storage;
use crate::{Document, Result, Waypoint};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a transformer type, also used as the extension slot key
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformerId(String);

impl TransformerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TransformerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sort key for stage sequencing; smaller runs earlier
///
/// The named phases leave room between them so a stage can slot itself just
/// before or after one of them with [`ExecutionOrder::offset`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ExecutionOrder(pub i32);

impl ExecutionOrder {
    pub const LOAD: Self = Self(1_000);
    pub const RESTORE_EDITS: Self = Self(2_000);
    pub const DEDUPLICATE: Self = Self(3_000);
    pub const APPLY_EDITS: Self = Self(4_000);
    pub const FILTER: Self = Self(5_000);
    pub const DECORATE: Self = Self(6_000);
    pub const PUBLISH: Self = Self(10_000);

    /// Order relative to a named phase, e.g. `PUBLISH.offset(-100)`
    #[inline]
    pub const fn offset(self, delta: i32) -> Self {
        Self(self.0 + delta)
    }
}

/// Which processing entry point a transformer implements
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Granularity {
    /// `process_all` over the whole document list
    FileSet,
    /// `process_document` once per document
    Document,
    /// `process_waypoint` once per waypoint
    Waypoint,
}

/// Optional capabilities a transformer declares
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Capabilities {
    /// Loads persisted settings before each run
    pub configurable: bool,
    /// May disable itself via [`Transformer::is_enabled`]
    pub conditional: bool,
    /// Enablement depends on which other transformers are candidates
    pub related_conditional: bool,
    /// Offers an interactive per-waypoint override
    pub editor: bool,
    /// Output or side-effect only stage
    pub special: bool,
}

/// Global options of one pipeline run
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOptions {
    /// Loading into the viewer cache only, nothing gets published
    pub viewer_cache_only: bool,
    /// Never fall back to the remote service
    pub local_storage_only: bool,
}

/// Registration record of one candidate transformer, as seen by the others
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Candidate {
    pub id: TransformerId,
    pub title: String,
    pub order: ExecutionOrder,
    pub capabilities: Capabilities,
    /// Position in the registry
    pub discovery_index: usize,
}

/// The full candidate list, disabled transformers included
#[derive(Clone, Debug, Default)]
pub struct CandidateSet {
    candidates: Vec<Candidate>,
}

impl CandidateSet {
    pub fn new(candidates: Vec<Candidate>) -> Self {
        Self { candidates }
    }

    pub fn contains(&self, id: &TransformerId) -> bool {
        self.candidates.iter().any(|c| &c.id == id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Candidate> {
        self.candidates.iter()
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }
}

/// One unit of pipeline work
pub trait Transformer: Send {
    /// Type identity; also the key of this transformer's extension slot
    fn id(&self) -> TransformerId;

    /// Human readable title, used in status messages and fatal errors
    fn title(&self) -> &str;

    fn execution_order(&self) -> ExecutionOrder;

    fn granularity(&self) -> Granularity {
        Granularity::Waypoint
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::default()
    }

    /// Load persisted settings; only called for configurable transformers
    fn configure(&mut self, _storage: &dyn Storage) -> Result<()> {
        Ok(())
    }

    /// Only consulted for conditional transformers
    fn is_enabled(&self, _options: &RunOptions) -> bool {
        true
    }

    /// Only consulted for related-conditional transformers
    ///
    /// `candidates` holds every registered transformer, whether or not it
    /// ends up enabled. Decisions must depend on presence of other
    /// transformer types only; cycles between related-conditional
    /// transformers are not supported.
    fn is_enabled_given(&self, _candidates: &CandidateSet) -> bool {
        true
    }

    /// Editor capability, if any
    fn as_editor(&self) -> Option<&dyn WaypointEditor> {
        None
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        for_each_document(self, documents, ctx)
    }

    fn process_document(&mut self, document: &mut Document, ctx: &StageContext<'_>) -> Result<()> {
        for (i, waypoint) in document.waypoints.iter_mut().enumerate() {
            ctx.poll_cancelled(i)?;
            self.process_waypoint(waypoint, ctx)?;
        }
        Ok(())
    }

    fn process_waypoint(&mut self, _waypoint: &mut Waypoint, _ctx: &StageContext<'_>) -> Result<()> {
        Ok(())
    }
}

/// Interactive per-waypoint override stored in the editor's extension slot
pub trait WaypointEditor {
    fn slot(&self) -> TransformerId;

    /// Parse user input and store it on the waypoint
    fn edit(&self, waypoint: &mut Waypoint, input: &str) -> Result<()>;

    /// Drop the override from the waypoint
    fn clear(&self, waypoint: &mut Waypoint) -> bool {
        waypoint.remove_extension(&self.slot()).is_some()
    }
}

/// Document-granularity adapter: calls `process_document` for every document
pub fn for_each_document<T: Transformer + ?Sized>(
    stage: &mut T,
    documents: &mut [Document],
    ctx: &StageContext<'_>,
) -> Result<()> {
    let total = documents.len();
    for (i, document) in documents.iter_mut().enumerate() {
        ctx.check_cancelled()?;
        stage.process_document(document, ctx)?;
        ctx.progress(i + 1, total);
    }
    Ok(())
}

/// Waypoint-granularity adapter: calls `process_waypoint` for every waypoint
pub fn for_each_waypoint<T: Transformer + ?Sized>(
    stage: &mut T,
    documents: &mut [Document],
    ctx: &StageContext<'_>,
) -> Result<()> {
    let total: usize = documents.iter().map(|d| d.waypoints.len()).sum();
    let mut done = 0;
    for document in documents.iter_mut() {
        for waypoint in document.waypoints.iter_mut() {
            ctx.poll_cancelled(done)?;
            stage.process_waypoint(waypoint, ctx)?;
            done += 1;
        }
        ctx.progress(done, total);
    }
    Ok(())
}

/// Run a stage through the entry point matching its declared granularity
pub fn run_stage<T: Transformer + ?Sized>(
    stage: &mut T,
    documents: &mut Vec<Document>,
    ctx: &StageContext<'_>,
) -> Result<()> {
    match stage.granularity() {
        Granularity::FileSet => stage.process_all(documents, ctx),
        Granularity::Document => for_each_document(stage, documents, ctx),
        Granularity::Waypoint => for_each_waypoint(stage, documents, ctx),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CancelToken, NullSink};

    struct Upper;

    impl Transformer for Upper {
        fn id(&self) -> TransformerId {
            TransformerId::new("upper")
        }
        fn title(&self) -> &str {
            "Upper"
        }
        fn execution_order(&self) -> ExecutionOrder {
            ExecutionOrder::DECORATE
        }
        fn process_waypoint(&mut self, waypoint: &mut Waypoint, _ctx: &StageContext<'_>) -> Result<()> {
            waypoint.name = waypoint.name.to_uppercase();
            Ok(())
        }
    }

    fn documents() -> Vec<Document> {
        vec![
            Document::new("a.gpx").with_waypoints(vec![Waypoint::new("gc1", 0.0, 0.0)]),
            Document::new("b.gpx").with_waypoints(vec![
                Waypoint::new("gc2", 0.0, 0.0),
                Waypoint::new("wp3", 0.0, 0.0),
            ]),
        ]
    }

    #[test]
    fn test_offset_orders_relative_to_phase() {
        let before = ExecutionOrder::PUBLISH.offset(-100);
        assert!(before < ExecutionOrder::PUBLISH);
        assert!(before > ExecutionOrder::DECORATE);
    }

    #[test]
    fn test_default_cascade_reaches_every_waypoint() {
        let options = RunOptions::default();
        let cancel = CancelToken::new();
        let ctx = StageContext::new("Upper", &options, &NullSink, &cancel);

        let mut docs = documents();
        Upper.process_all(&mut docs, &ctx).unwrap();
        let names: Vec<_> = docs.iter().flat_map(|d| &d.waypoints).map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["GC1", "GC2", "WP3"]);
    }

    #[test]
    fn test_run_stage_uses_declared_granularity() {
        let options = RunOptions::default();
        let cancel = CancelToken::new();
        let ctx = StageContext::new("Upper", &options, &NullSink, &cancel);

        let mut docs = documents();
        run_stage(&mut Upper, &mut docs, &ctx).unwrap();
        assert_eq!(docs[1].waypoints[1].name, "WP3");
        assert_eq!(docs[0].waypoints[0].name, "GC1");
    }

    #[test]
    fn test_cancelled_before_first_waypoint() {
        let options = RunOptions::default();
        let cancel = CancelToken::new();
        cancel.cancel();
        let ctx = StageContext::new("Upper", &options, &NullSink, &cancel);

        let mut docs = documents();
        let result = run_stage(&mut Upper, &mut docs, &ctx);
        assert!(matches!(result, Err(crate::PipelineError::Terminated)));
        assert_eq!(docs[0].waypoints[0].name, "gc1");
    }

    #[test]
    fn test_candidate_set_contains() {
        let set = CandidateSet::new(vec![Candidate {
            id: TransformerId::new("dedup"),
            title: "Dedup".to_string(),
            order: ExecutionOrder::DEDUPLICATE,
            capabilities: Capabilities::default(),
            discovery_index: 0,
        }]);
        assert!(set.contains(&TransformerId::new("dedup")));
        assert!(!set.contains(&TransformerId::new("merge")));
        assert_eq!(set.len(), 1);
    }
}
