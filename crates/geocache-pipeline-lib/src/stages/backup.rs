//! Backup and restore of editor extension data
//!
//! User edits live in waypoint extension slots. [`EditorBackup::save`]
//! persists them per waypoint code, [`RestoreEdits`] puts them back onto
//! freshly loaded waypoints early in the next run, and [`StripExtensions`]
//! removes every slot before anything is published.
//!
//! Slot lifecycle: absent → present (unsaved) → present (persisted). Persisted
//! rows outlive the waypoint's presence in the loaded set and only go away
//! through [`EditorBackup::remove_customizations`].

use crate::remote::GeocacheService;
use crate::storage::Storage;
use crate::utils::{count_phrase, plural};
use crate::{
    Capabilities, Document, ExecutionOrder, ExtensionData, Granularity, Result, RunOptions,
    StageContext, Transformer, TransformerId, Waypoint,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

/// Table of extension slots, keyed by waypoint code
pub const EXTENSIONS_TABLE: &str = "extensions";

/// Table of full waypoint copies, keyed by waypoint code
pub const CACHED_WAYPOINTS_TABLE: &str = "cached_waypoints";

/// Document that receives editor-only placeholders in viewer cache mode
pub const EDITOR_CACHE_FILE: &str = "editor-cache.gpx";

pub const RESTORE_EDITS_ID: &str = "restore-edits";
pub const STRIP_EXTENSIONS_ID: &str = "strip-extensions";

/// Marker slot for placeholders that exist only because of saved edits
pub fn editor_only_marker() -> TransformerId {
    TransformerId::new("editor-only")
}

type Slots = BTreeMap<TransformerId, ExtensionData>;

/// Slots worth persisting: everything but the editor-only marker
fn persistent_slots(waypoint: &Waypoint) -> Slots {
    let marker = editor_only_marker();
    waypoint
        .extensions
        .iter()
        .filter(|(id, _)| **id != marker)
        .map(|(id, data)| (id.clone(), data.clone()))
        .collect()
}

/// Outcome of one save pass
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SaveSummary {
    /// Codes with extension rows written
    pub saved: usize,
    /// Codes with a cached waypoint copy written
    pub cached: usize,
}

/// Save side of the editor backups
pub struct EditorBackup {
    storage: Arc<dyn Storage>,
}

impl EditorBackup {
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }

    /// Persist the extension slots of every waypoint in `documents`
    ///
    /// Runs as one transaction: rows of every code present in `documents`
    /// are deleted, then rows for waypoints that still carry slots are
    /// inserted together with a cached copy of the waypoint, once per code.
    /// Rows of codes absent from `documents` are left alone.
    pub fn save(&self, documents: &[Document]) -> Result<SaveSummary> {
        let mut present: HashSet<String> = HashSet::new();
        let mut rows: Vec<(String, String, String)> = Vec::new();

        for waypoint in documents.iter().flat_map(|d| &d.waypoints) {
            let code = waypoint.code();
            if !present.insert(code.clone()) {
                continue;
            }

            let slots = persistent_slots(waypoint);
            if slots.is_empty() {
                continue;
            }

            let mut copy = waypoint.clone();
            copy.extensions.clear();
            rows.push((code, serde_json::to_string(&slots)?, serde_json::to_string(&copy)?));
        }

        let mut tx = self.storage.begin();
        tx.delete_where(EXTENSIONS_TABLE, move |key| present.contains(key));
        for (code, slots, copy) in &rows {
            tx.put(EXTENSIONS_TABLE, code, slots.as_str());
            tx.put(CACHED_WAYPOINTS_TABLE, code, copy.as_str());
        }
        self.storage.commit(tx)?;

        let summary = SaveSummary {
            saved: rows.len(),
            cached: rows.len(),
        };
        tracing::info!("Saved edits for {}", plural(summary.saved, "waypoint", "waypoints"));
        Ok(summary)
    }

    /// Forget every saved edit and the cached copy of one code
    pub fn remove_customizations(&self, code: &str) -> Result<()> {
        let code = code.to_uppercase();
        let key = code.clone();
        let mut tx = self.storage.begin();
        tx.delete_where(EXTENSIONS_TABLE, move |k| k == key);
        tx.delete_where(CACHED_WAYPOINTS_TABLE, move |k| k == code);
        self.storage.commit(tx)?;
        Ok(())
    }

    /// Codes that have saved edits, sorted
    pub fn saved_codes(&self) -> Result<Vec<String>> {
        Ok(self.storage.keys(EXTENSIONS_TABLE)?)
    }
}

/// Load side: re-attaches saved edits to the loaded waypoints
///
/// Codes with saved edits that are missing from the load become editor-only
/// placeholders in viewer cache mode. The placeholder body comes from the
/// cached copy, or from the remote service unless local-only mode is set.
pub struct RestoreEdits {
    storage: Arc<dyn Storage>,
    service: Arc<dyn GeocacheService>,
}

impl RestoreEdits {
    pub fn new(storage: Arc<dyn Storage>, service: Arc<dyn GeocacheService>) -> Self {
        Self { storage, service }
    }

    /// Body for a placeholder; `None` after reporting why there is none
    fn placeholder_body(&self, code: &str, ctx: &StageContext<'_>) -> Result<Option<Waypoint>> {
        if let Some(json) = self.storage.get(CACHED_WAYPOINTS_TABLE, code)? {
            match serde_json::from_str::<Waypoint>(&json) {
                Ok(waypoint) => return Ok(Some(waypoint)),
                Err(e) => ctx.warn(format!("Cached copy of {code} is unreadable: {e}")),
            }
        }

        if ctx.options.local_storage_only {
            ctx.warn(format!("No local copy of edited cache {code}"));
            return Ok(None);
        }

        match self.service.fetch_by_code(code) {
            Ok(Some(waypoint)) => {
                let mut copy = waypoint.clone();
                copy.extensions.clear();
                self.storage
                    .put(CACHED_WAYPOINTS_TABLE, code, &serde_json::to_string(&copy)?)?;
                Ok(Some(waypoint))
            }
            Ok(None) => {
                ctx.warn(format!("Edited cache {code} was not found online"));
                Ok(None)
            }
            Err(e) => {
                ctx.warn(format!("Could not fetch edited cache {code}: {e}"));
                Ok(None)
            }
        }
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for RestoreEdits {
    fn id(&self) -> TransformerId {
        TransformerId::new(RESTORE_EDITS_ID)
    }

    fn title(&self) -> &str {
        "Restore saved edits"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::RESTORE_EDITS
    }

    fn granularity(&self) -> Granularity {
        Granularity::FileSet
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        let codes = self.storage.keys(EXTENSIONS_TABLE)?;
        if codes.is_empty() {
            return Ok(());
        }

        let mut index: HashMap<String, Vec<(usize, usize)>> = HashMap::new();
        for (d, document) in documents.iter().enumerate() {
            for (w, waypoint) in document.waypoints.iter().enumerate() {
                index.entry(waypoint.code()).or_default().push((d, w));
            }
        }

        let mut restored = 0;
        let mut placeholders = Vec::new();
        for (i, code) in codes.iter().enumerate() {
            ctx.poll_cancelled(i)?;
            ctx.progress(i, codes.len());

            let Some(json) = self.storage.get(EXTENSIONS_TABLE, code)? else {
                continue;
            };
            let slots: Slots = match serde_json::from_str(&json) {
                Ok(slots) => slots,
                Err(e) => {
                    ctx.warn(format!("Saved edits of {code} are unreadable: {e}"));
                    continue;
                }
            };

            match index.get(code) {
                // Saved edits win over whatever the fresh copy carries
                Some(locations) => {
                    for &(d, w) in locations {
                        documents[d].waypoints[w].extensions.extend(slots.clone());
                    }
                    restored += 1;
                }
                None if ctx.options.viewer_cache_only => {
                    if let Some(mut waypoint) = self.placeholder_body(code, ctx)? {
                        waypoint.extensions = slots;
                        waypoint.set_extension(editor_only_marker(), ExtensionData::Text(code.clone()));
                        placeholders.push(waypoint);
                    }
                }
                None => {
                    tracing::debug!("Edited cache {} is not part of this run", code);
                }
            }
        }

        let added = placeholders.len();
        if added > 0 {
            documents.push(Document::new(EDITOR_CACHE_FILE).with_waypoints(placeholders));
        }

        if let Some(phrase) = count_phrase(&[
            (restored, "cache", "caches"),
            (added, "editor-only cache", "editor-only caches"),
        ]) {
            ctx.info(format!("Restored edits for {phrase}"));
        }
        Ok(())
    }
}

/// Cleanup: removes every extension slot so bookkeeping never gets published
#[derive(Default)]
pub struct StripExtensions;

impl StripExtensions {
    pub fn new() -> Self {
        Self
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for StripExtensions {
    fn id(&self) -> TransformerId {
        TransformerId::new(STRIP_EXTENSIONS_ID)
    }

    fn title(&self) -> &str {
        "Strip editor data"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::PUBLISH.offset(-100)
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            conditional: true,
            ..Default::default()
        }
    }

    /// The viewer cache keeps its slots so they can be edited and saved
    fn is_enabled(&self, options: &RunOptions) -> bool {
        !options.viewer_cache_only
    }

    fn process_waypoint(&mut self, waypoint: &mut Waypoint, _ctx: &StageContext<'_>) -> Result<()> {
        waypoint.extensions.clear();
        Ok(())
    }
}
