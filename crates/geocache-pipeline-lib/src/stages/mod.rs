//! Built-in pipeline stages

pub mod backup;
pub mod coordinates;
pub mod dedup;
pub mod disabled;
pub mod load;
pub mod merge;
pub mod publish;

pub use backup::{EditorBackup, RestoreEdits, SaveSummary, StripExtensions};
pub use coordinates::CoordinateOverride;
pub use dedup::{DedupSummary, Deduplicate};
pub use disabled::{PrefixDisabled, PrefixSettings, RemoveDisabled};
pub use load::LoadFiles;
pub use merge::MergeFiles;
pub use publish::{
    Destination, DirectoryTarget, PostPublishAction, Publish, PublisherTarget, Subscription,
    TargetChange, TargetWatch,
};

use crate::TransformerRegistry;
use crate::remote::GeocacheService;
use crate::storage::Storage;
use std::path::PathBuf;
use std::sync::Arc;

/// Collaborators of the standard stage set
#[derive(Clone)]
pub struct StandardStages {
    pub inputs: Vec<PathBuf>,
    pub storage: Arc<dyn Storage>,
    pub service: Arc<dyn GeocacheService>,
    /// Publishing is skipped when absent
    pub publish: Option<(Arc<dyn PublisherTarget>, Destination)>,
    /// Drop disabled caches instead of prefixing them
    pub remove_disabled: bool,
}

impl StandardStages {
    /// Registry of the standard stages in their usual registration order
    pub fn registry(&self) -> TransformerRegistry {
        let mut registry = TransformerRegistry::new();

        let inputs = self.inputs.clone();
        registry.register(move || Box::new(LoadFiles::new(inputs.clone())));

        let (storage, service) = (self.storage.clone(), self.service.clone());
        registry.register(move || Box::new(RestoreEdits::new(storage.clone(), service.clone())));

        registry.register(|| Box::new(Deduplicate::new()));
        registry.register(|| Box::new(CoordinateOverride::new()));
        if self.remove_disabled {
            registry.register(|| Box::new(RemoveDisabled::new()));
        }
        registry.register(|| Box::new(PrefixDisabled::new()));
        registry.register(|| Box::new(StripExtensions::new()));
        registry.register(|| Box::new(MergeFiles::new()));

        if let Some((target, destination)) = &self.publish {
            let (target, destination) = (target.clone(), destination.clone());
            registry.register(move || Box::new(Publish::new(target.clone(), destination.clone())));
        }
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CancelToken, CollectingSink};
    use crate::remote::{OfflineService, RemoteError, SearchQuery};
    use crate::storage::MemoryStorage;
    use crate::{Document, Geocache, RunOptions, Scheduler, Waypoint, WaypointEditor};
    use time::macros::datetime;

    /// Knows exactly one cache
    struct OneCacheService;

    impl GeocacheService for OneCacheService {
        fn fetch_by_code(&self, code: &str) -> Result<Option<Waypoint>, RemoteError> {
            Ok((code == "GC9").then(|| {
                Waypoint::new("GC9", 47.0, 8.0).with_geocache(Geocache::new("Far away", "Multi-cache"))
            }))
        }

        fn search(&self, _query: &SearchQuery) -> Result<Vec<Waypoint>, RemoteError> {
            Ok(Vec::new())
        }
    }

    fn cache(code: &str) -> Waypoint {
        Waypoint::new(code, 51.0, 0.0).with_geocache(Geocache::new(format!("{code} name"), "Traditional Cache"))
    }

    fn input() -> Vec<Document> {
        vec![
            Document::new("old.gpx")
                .with_created(datetime!(2024-01-01 0:00 UTC))
                .with_waypoints(vec![cache("GC1"), Waypoint::new("WP1", 51.1, 0.1)]),
            Document::new("new.gpx")
                .with_created(datetime!(2024-02-01 0:00 UTC))
                .with_waypoints(vec![cache("GC1"), Waypoint::new("WP2", 51.2, 0.2)]),
        ]
    }

    fn stages(remove_disabled: bool) -> StandardStages {
        StandardStages {
            inputs: Vec::new(),
            storage: Arc::new(MemoryStorage::new()),
            service: Arc::new(OfflineService),
            publish: Some((Arc::new(DirectoryTarget::new()), Destination::new("out"))),
            remove_disabled,
        }
    }

    #[test]
    fn test_standard_plan_order() {
        let plan = crate::ExecutionPlan::resolve(stages(false).registry().instantiate(), &RunOptions::default());
        assert_eq!(
            plan.titles(),
            [
                "Load GPX files",
                "Restore saved edits",
                "Remove duplicates",
                "Apply corrected coordinates",
                "Prefix disabled caches",
                "Strip editor data",
                "Merge files",
                "Publish",
            ]
        );
    }

    #[test]
    fn test_viewer_cache_plan_skips_output_stages() {
        let options = RunOptions {
            viewer_cache_only: true,
            ..Default::default()
        };
        let plan = crate::ExecutionPlan::resolve(stages(true).registry().instantiate(), &options);
        assert_eq!(
            plan.titles(),
            [
                "Load GPX files",
                "Restore saved edits",
                "Remove duplicates",
                "Apply corrected coordinates",
                "Remove disabled caches",
            ]
        );
    }

    #[test]
    fn test_publish_run_applies_edits_and_strips_them() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut edited = cache("GC1");
        CoordinateOverride::new().edit(&mut edited, "51.5,0.5").unwrap();
        EditorBackup::new(storage.clone())
            .save(&[Document::new("edits.gpx").with_waypoints(vec![edited])])
            .unwrap();

        let out = tempfile::tempdir().unwrap();
        let mut setup = stages(false);
        setup.storage = storage.clone();
        setup.publish = Some((Arc::new(DirectoryTarget::new()), Destination::new(out.path())));

        let sink = Arc::new(CollectingSink::new());
        let scheduler = Scheduler::new(setup.registry(), sink.clone()).with_settings(storage);
        let outcome = scheduler
            .run(input(), &RunOptions::default(), &CancelToken::new())
            .unwrap();
        let documents = outcome.documents().unwrap();

        let names: Vec<_> = documents.iter().map(|d| d.display_name()).collect();
        assert_eq!(names, [merge::GEOCACHES_FILE, merge::WAYPOINTS_FILE]);
        assert_eq!(documents[0].waypoints.len(), 1);
        assert_eq!(documents[0].waypoints[0].latitude, 51.5);
        let codes: Vec<_> = documents[1].waypoints.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(codes, ["WP1", "WP2"]);
        assert!(documents.iter().flat_map(|d| &d.waypoints).all(|w| w.extensions.is_empty()));
        assert!(out.path().join(merge::GEOCACHES_FILE).exists());
        assert!(sink.messages().contains(&"Removed 1 duplicate cache".to_string()));
        let published = format!("Published 2 files to {}", Destination::new(out.path()).name);
        assert!(sink.messages().contains(&published));
    }

    #[test]
    fn test_viewer_cache_run_adds_editor_only_placeholder() {
        let storage: Arc<dyn Storage> = Arc::new(MemoryStorage::new());
        let mut edited = cache("GC9");
        CoordinateOverride::new().edit(&mut edited, "47.5,8.5").unwrap();
        let backup = EditorBackup::new(storage.clone());
        backup
            .save(&[Document::new("edits.gpx").with_waypoints(vec![edited])])
            .unwrap();
        // Only the edits survive, so the body has to come from the service
        storage
            .delete(backup::CACHED_WAYPOINTS_TABLE, Box::new(|_: &str| true))
            .unwrap();

        let mut setup = stages(false);
        setup.storage = storage.clone();
        setup.service = Arc::new(OneCacheService);
        let options = RunOptions {
            viewer_cache_only: true,
            ..Default::default()
        };
        let scheduler = Scheduler::new(setup.registry(), Arc::new(CollectingSink::new()));
        let documents = scheduler
            .run(input(), &options, &CancelToken::new())
            .unwrap()
            .documents()
            .unwrap();

        let cache_doc = documents
            .iter()
            .find(|d| d.display_name() == backup::EDITOR_CACHE_FILE)
            .unwrap();
        let placeholder = &cache_doc.waypoints[0];
        assert_eq!(placeholder.name, "GC9");
        assert!(placeholder.extension(&backup::editor_only_marker()).is_some());
        assert_eq!((placeholder.latitude, placeholder.longitude), (47.5, 8.5));
        assert!(storage.get(backup::CACHED_WAYPOINTS_TABLE, "GC9").unwrap().is_some());
    }

    fn published_bytes(documents: &[Document]) -> Vec<Vec<u8>> {
        documents
            .iter()
            .map(|d| {
                let mut buffer = Vec::new();
                d.write_gpx(&mut buffer).unwrap();
                buffer
            })
            .collect()
    }

    #[test]
    fn test_runs_are_deterministic() {
        let run = || {
            let mut setup = stages(false);
            setup.publish = None;
            let scheduler = Scheduler::new(setup.registry(), Arc::new(CollectingSink::new()));
            scheduler
                .run(input(), &RunOptions::default(), &CancelToken::new())
                .unwrap()
                .documents()
                .unwrap()
        };
        let first = published_bytes(&run());
        assert_eq!(first.len(), 2);
        assert_eq!(first, published_bytes(&run()));
    }

    fn run_disabled_from_file(remove_disabled: bool) -> (Document, Vec<String>) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("query.gpx");
        let mut disabled = Geocache::new("Tower view", "Traditional Cache");
        disabled.available = false;
        Document::new("query.gpx")
            .with_waypoints(vec![
                Waypoint::new("GC1", 51.0, 0.0).with_geocache(disabled),
                cache("GC2"),
                Waypoint::new("WP1", 51.1, 0.1),
            ])
            .write_gpx(std::fs::File::create(&path).unwrap())
            .unwrap();

        let out = dir.path().join("out");
        let mut setup = stages(remove_disabled);
        setup.inputs = vec![path];
        setup.publish = Some((Arc::new(DirectoryTarget::new()), Destination::new(out.clone())));
        let sink = Arc::new(CollectingSink::new());
        Scheduler::new(setup.registry(), sink.clone())
            .run(Vec::new(), &RunOptions::default(), &CancelToken::new())
            .unwrap();

        let published = std::fs::File::open(out.join(merge::GEOCACHES_FILE)).unwrap();
        let published = Document::read_gpx(None, published).unwrap();
        (published, sink.messages())
    }

    #[test]
    fn test_loaded_disabled_cache_is_prefixed_in_published_file() {
        let (published, messages) = run_disabled_from_file(false);
        assert!(messages.contains(&"query.gpx: 1 disabled cache prefixed".to_string()));

        let geocache = published.waypoints[0].geocache.as_ref().unwrap();
        assert_eq!(geocache.name, "XTower view");
        assert!(geocache.is_disabled());
        assert_eq!(published.waypoints[1].geocache.as_ref().unwrap().name, "GC2 name");
    }

    #[test]
    fn test_loaded_disabled_cache_is_removed_from_published_file() {
        let (published, messages) = run_disabled_from_file(true);
        assert!(messages.contains(&"1 disabled cache removed".to_string()));
        let codes: Vec<_> = published.waypoints.iter().map(|w| w.name.as_str()).collect();
        assert_eq!(codes, ["GC2"]);
    }
}
