//! Handling of disabled caches: either drop them or mark their names

use crate::storage::{SETTINGS_TABLE, Storage, load_json};
use crate::utils::plural;
use crate::{
    CandidateSet, Capabilities, Document, ExecutionOrder, Granularity, Result, StageContext,
    Transformer, TransformerId, Waypoint,
};
use serde::{Deserialize, Serialize};

pub const REMOVE_DISABLED_ID: &str = "remove-disabled";
pub const PREFIX_DISABLED_ID: &str = "prefix-disabled";

/// Drops every unavailable or archived cache
#[derive(Default)]
pub struct RemoveDisabled;

impl RemoveDisabled {
    pub fn new() -> Self {
        Self
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for RemoveDisabled {
    fn id(&self) -> TransformerId {
        TransformerId::new(REMOVE_DISABLED_ID)
    }

    fn title(&self) -> &str {
        "Remove disabled caches"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::FILTER
    }

    fn granularity(&self) -> Granularity {
        Granularity::FileSet
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        let mut removed = 0;
        for document in documents.iter_mut() {
            ctx.check_cancelled()?;
            let before = document.waypoints.len();
            document
                .waypoints
                .retain(|w| !w.geocache.as_ref().is_some_and(|g| g.is_disabled()));
            removed += before - document.waypoints.len();
        }

        if removed > 0 {
            ctx.info(format!(
                "{} removed",
                plural(removed, "disabled cache", "disabled caches")
            ));
        }
        Ok(())
    }
}

/// Persisted settings of [`PrefixDisabled`]
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixSettings {
    pub prefix: String,
}

impl Default for PrefixSettings {
    fn default() -> Self {
        Self {
            prefix: "X".to_string(),
        }
    }
}

/// Prefixes the names of disabled caches so they stand out on the device
///
/// Steps aside whenever [`RemoveDisabled`] is registered, enabled or not.
#[derive(Default)]
pub struct PrefixDisabled {
    settings: PrefixSettings,
}

impl PrefixDisabled {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_settings(settings: PrefixSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &PrefixSettings {
        &self.settings
    }

    fn prefix_name(&self, waypoint: &mut Waypoint) -> bool {
        let Some(geocache) = waypoint.geocache.as_mut() else {
            return false;
        };
        if !geocache.is_disabled() || geocache.name.starts_with(&self.settings.prefix) {
            return false;
        }
        geocache.name = format!("{}{}", self.settings.prefix, geocache.name);
        true
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for PrefixDisabled {
    fn id(&self) -> TransformerId {
        TransformerId::new(PREFIX_DISABLED_ID)
    }

    fn title(&self) -> &str {
        "Prefix disabled caches"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::DECORATE
    }

    fn granularity(&self) -> Granularity {
        Granularity::Document
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities {
            configurable: true,
            related_conditional: true,
            ..Default::default()
        }
    }

    fn configure(&mut self, storage: &dyn Storage) -> Result<()> {
        let stored = load_json::<PrefixSettings>(storage, SETTINGS_TABLE, PREFIX_DISABLED_ID)?;
        if let Some(settings) = stored {
            tracing::debug!("Disabled cache prefix: {:?}", settings.prefix);
            self.settings = settings;
        }
        Ok(())
    }

    fn is_enabled_given(&self, candidates: &CandidateSet) -> bool {
        !candidates.contains(&TransformerId::new(REMOVE_DISABLED_ID))
    }

    fn process_document(&mut self, document: &mut Document, ctx: &StageContext<'_>) -> Result<()> {
        let mut prefixed = 0;
        for (i, waypoint) in document.waypoints.iter_mut().enumerate() {
            ctx.poll_cancelled(i)?;
            if self.prefix_name(waypoint) {
                prefixed += 1;
            }
        }
        if prefixed > 0 {
            ctx.info(format!(
                "{}: {} prefixed",
                document.display_name(),
                plural(prefixed, "disabled cache", "disabled caches")
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CancelToken, CollectingSink};
    use crate::storage::{MemoryStorage, save_json};
    use crate::{Geocache, RunOptions, run_stage};

    fn cache(code: &str, available: bool) -> Waypoint {
        let mut geocache = Geocache::new(format!("{code} name"), "Traditional Cache");
        geocache.available = available;
        Waypoint::new(code, 0.0, 0.0).with_geocache(geocache)
    }

    fn documents() -> Vec<Document> {
        vec![Document::new("a.gpx").with_waypoints(vec![
            cache("GC1", true),
            cache("GC2", false),
            Waypoint::new("WP1", 0.0, 0.0),
            cache("GC3", false),
        ])]
    }

    fn run(stage: &mut dyn Transformer, documents: &mut Vec<Document>) -> CollectingSink {
        let options = RunOptions::default();
        let cancel = CancelToken::new();
        let sink = CollectingSink::new();
        let title = stage.title().to_string();
        let ctx = StageContext::new(&title, &options, &sink, &cancel);
        run_stage(stage, documents, &ctx).unwrap();
        sink
    }

    #[test]
    fn test_remove_disabled() {
        let mut documents = documents();
        let sink = run(&mut RemoveDisabled::new(), &mut documents);
        let names: Vec<_> = documents[0].waypoints.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(names, ["GC1", "WP1"]);
        assert_eq!(sink.messages(), ["2 disabled caches removed"]);
    }

    #[test]
    fn test_prefix_disabled_is_idempotent() {
        let mut documents = documents();
        let mut stage = PrefixDisabled::new();
        let sink = run(&mut stage, &mut documents);
        assert_eq!(sink.messages(), ["a.gpx: 2 disabled caches prefixed"]);
        assert_eq!(documents[0].waypoints[1].geocache.as_ref().unwrap().name, "XGC2 name");
        assert_eq!(documents[0].waypoints[0].geocache.as_ref().unwrap().name, "GC1 name");

        let sink = run(&mut PrefixDisabled::new(), &mut documents);
        assert!(sink.messages().is_empty());
        assert_eq!(documents[0].waypoints[1].geocache.as_ref().unwrap().name, "XGC2 name");
    }

    #[test]
    fn test_prefix_is_configurable() {
        let storage = MemoryStorage::new();
        save_json(
            &storage,
            SETTINGS_TABLE,
            PREFIX_DISABLED_ID,
            &PrefixSettings {
                prefix: "[off] ".to_string(),
            },
        )
        .unwrap();

        let mut stage = PrefixDisabled::new();
        stage.configure(&storage).unwrap();
        assert_eq!(stage.settings().prefix, "[off] ");

        let mut documents = documents();
        run(&mut stage, &mut documents);
        assert_eq!(documents[0].waypoints[3].geocache.as_ref().unwrap().name, "[off] GC3 name");
    }

    #[test]
    fn test_prefix_steps_aside_for_remove_disabled() {
        let stage = PrefixDisabled::new();
        let remove = RemoveDisabled::new();
        let with_remove = CandidateSet::new(vec![crate::Candidate {
            id: remove.id(),
            title: remove.title().to_string(),
            order: remove.execution_order(),
            capabilities: remove.capabilities(),
            discovery_index: 0,
        }]);
        assert!(!stage.is_enabled_given(&with_remove));
        assert!(stage.is_enabled_given(&CandidateSet::default()));
    }
}
