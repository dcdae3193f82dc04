//! Duplicate removal across documents
//!
//! For every waypoint code that appears more than once, only the copy with
//! the latest timestamp survives. The timestamp is the waypoint's own refresh
//! time, else its document's creation time, else the minimum possible time.
//! Equal timestamps keep the copy seen last in document × waypoint order.
//! Repeated codes inside one document are collapsed the same way. Waypoints
//! without a name have no identity and are always kept.

use crate::utils::count_phrase;
use crate::{Document, ExecutionOrder, Granularity, Result, StageContext, Transformer, TransformerId};
use std::collections::{BTreeSet, HashMap};
use time::OffsetDateTime;

pub const DEDUPLICATE_ID: &str = "deduplicate";

/// Location and timestamp of the current winner for one code
struct Winner {
    document: usize,
    waypoint: usize,
    timestamp: Option<OffsetDateTime>,
}

/// Counts of removed duplicates
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DedupSummary {
    pub removed_geocaches: usize,
    pub removed_waypoints: usize,
}

impl DedupSummary {
    pub fn total(&self) -> usize {
        self.removed_geocaches + self.removed_waypoints
    }
}

#[derive(Default)]
pub struct Deduplicate;

impl Deduplicate {
    pub fn new() -> Self {
        Self
    }

    /// Remove duplicates in place and report what was removed
    pub fn deduplicate(documents: &mut [Document], ctx: &StageContext<'_>) -> Result<DedupSummary> {
        let mut winners: HashMap<String, Winner> = HashMap::new();
        let mut duplicated: BTreeSet<usize> = BTreeSet::new();
        let mut seen = 0usize;

        for (d, document) in documents.iter().enumerate() {
            for (w, waypoint) in document.waypoints.iter().enumerate() {
                ctx.poll_cancelled(seen)?;
                seen += 1;

                let code = waypoint.code();
                if code.is_empty() {
                    continue;
                }
                let timestamp = waypoint.refreshed.or(document.created);
                let candidate = Winner {
                    document: d,
                    waypoint: w,
                    timestamp,
                };
                match winners.get_mut(&code) {
                    Some(current) => {
                        if current.document != d {
                            duplicated.insert(current.document);
                            duplicated.insert(d);
                        }
                        // None sorts first, so missing times lose; ties go to the later copy
                        if candidate.timestamp >= current.timestamp {
                            *current = candidate;
                        }
                    }
                    None => {
                        winners.insert(code, candidate);
                    }
                }
            }
        }

        for &d in &duplicated {
            let document = &documents[d];
            if document.created.is_none() {
                ctx.warn(format!(
                    "{} has no creation time; its duplicates may be replaced by older copies",
                    document.display_name()
                ));
            }
        }

        let mut summary = DedupSummary::default();
        for (d, document) in documents.iter_mut().enumerate() {
            let mut index = 0;
            document.waypoints.retain(|waypoint| {
                let w = index;
                index += 1;
                let code = waypoint.code();
                let keep = code.is_empty()
                    || winners
                        .get(&code)
                        .is_some_and(|winner| winner.document == d && winner.waypoint == w);
                if !keep {
                    if waypoint.is_geocache() {
                        summary.removed_geocaches += 1;
                    } else {
                        summary.removed_waypoints += 1;
                    }
                }
                keep
            });
        }

        Ok(summary)
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for Deduplicate {
    fn id(&self) -> TransformerId {
        TransformerId::new(DEDUPLICATE_ID)
    }

    fn title(&self) -> &str {
        "Remove duplicates"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::DEDUPLICATE
    }

    fn granularity(&self) -> Granularity {
        Granularity::FileSet
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        let summary = Self::deduplicate(documents, ctx)?;
        tracing::debug!("Dedup summary: {:?}", summary);
        if let Some(phrase) = count_phrase(&[
            (summary.removed_geocaches, "duplicate cache", "duplicate caches"),
            (summary.removed_waypoints, "waypoint", "waypoints"),
        ]) {
            ctx.info(format!("Removed {phrase}"));
        }
        Ok(())
    }
}
