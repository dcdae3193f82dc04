//! File merge: flattens every document into one cache file and one waypoint file

use crate::utils::plural;
use crate::{
    Capabilities, Document, ExecutionOrder, Granularity, Result, RunOptions, StageContext,
    Transformer, TransformerId,
};

pub const MERGE_FILES_ID: &str = "merge-files";

/// Output file holding every waypoint with a geocache facet
pub const GEOCACHES_FILE: &str = "geocaches.gpx";

/// Output file holding every other waypoint
pub const WAYPOINTS_FILE: &str = "waypoints.gpx";

#[derive(Default)]
pub struct MergeFiles;

impl MergeFiles {
    pub fn new() -> Self {
        Self
    }

    /// Replace `documents` with the two canonical documents
    ///
    /// Waypoints are moved, not copied, in document × waypoint order. With no
    /// waypoints at all the list ends up empty so nothing overwrites earlier
    /// output with empty files.
    pub fn merge(documents: &mut Vec<Document>) {
        let total: usize = documents.iter().map(|d| d.waypoints.len()).sum();
        let created = documents.iter().filter_map(|d| d.created).max();

        let mut geocaches = Document::new(GEOCACHES_FILE);
        let mut waypoints = Document::new(WAYPOINTS_FILE);
        geocaches.created = created;
        waypoints.created = created;

        for document in std::mem::take(documents) {
            for waypoint in document.waypoints {
                if waypoint.is_geocache() {
                    geocaches.waypoints.push(waypoint);
                } else {
                    waypoints.waypoints.push(waypoint);
                }
            }
        }

        if total > 0 {
            documents.push(geocaches);
            documents.push(waypoints);
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for MergeFiles {
    fn id(&self) -> TransformerId {
        TransformerId::new(MERGE_FILES_ID)
    }

    fn title(&self) -> &str {
        "Merge files"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::PUBLISH.offset(-10)
    }

    fn granularity(&self) -> Granularity {
        Granularity::FileSet
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            conditional: true,
            ..Default::default()
        }
    }

    /// Never flatten the viewer cache
    fn is_enabled(&self, options: &RunOptions) -> bool {
        !options.viewer_cache_only
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        ctx.check_cancelled()?;
        let inputs = documents.len();
        Self::merge(documents);

        match documents.as_slice() {
            [geocaches, waypoints] => ctx.info(format!(
                "Merged {} into {} and {}",
                plural(inputs, "file", "files"),
                plural(geocaches.waypoints.len(), "cache", "caches"),
                plural(waypoints.waypoints.len(), "waypoint", "waypoints"),
            )),
            _ => ctx.warn("Nothing to merge, no output files written"),
        }
        Ok(())
    }
}
