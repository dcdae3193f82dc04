//! Load stage: parses GPX files into documents

use crate::{Document, ExecutionOrder, Granularity, Result, StageContext, Transformer, TransformerId};
use rayon::prelude::*;
use std::path::PathBuf;

pub const LOAD_FILES_ID: &str = "load-files";

/// Appends one document per GPX file, in the order the paths were given
pub struct LoadFiles {
    paths: Vec<PathBuf>,
}

impl LoadFiles {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    fn read(path: &PathBuf) -> Result<Document> {
        let file = std::fs::File::open(path)?;
        let reader = std::io::BufReader::new(file);
        let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned());
        Document::read_gpx(file_name, reader)
    }
}

#[cfg_attr(feature = "profiling", profiling::all_functions)]
impl Transformer for LoadFiles {
    fn id(&self) -> TransformerId {
        TransformerId::new(LOAD_FILES_ID)
    }

    fn title(&self) -> &str {
        "Load GPX files"
    }

    fn execution_order(&self) -> ExecutionOrder {
        ExecutionOrder::LOAD
    }

    fn granularity(&self) -> Granularity {
        Granularity::FileSet
    }

    fn process_all(&mut self, documents: &mut Vec<Document>, ctx: &StageContext<'_>) -> Result<()> {
        ctx.check_cancelled()?;

        // Parse in parallel; collect keeps the path order
        let loaded: Result<Vec<Document>> = self.paths.par_iter().map(Self::read).collect();
        let loaded = loaded?;

        let waypoints: usize = loaded.iter().map(|d| d.waypoints.len()).sum();
        tracing::debug!("Loaded {} files with {} waypoints", loaded.len(), waypoints);
        ctx.info(format!(
            "Loaded {} with {}",
            crate::utils::plural(loaded.len(), "file", "files"),
            crate::utils::plural(waypoints, "waypoint", "waypoints")
        ));

        documents.extend(loaded);
        ctx.progress(self.paths.len(), self.paths.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::{CancelToken, CollectingSink};
    use crate::{RunOptions, Waypoint};

    #[test]
    fn test_loads_files_in_given_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut paths = Vec::new();
        for (file, code) in [("b.gpx", "GC2"), ("a.gpx", "GC1")] {
            let path = dir.path().join(file);
            let document = Document::new(file).with_waypoints(vec![Waypoint::new(code, 1.0, 2.0)]);
            document.write_gpx(std::fs::File::create(&path).unwrap()).unwrap();
            paths.push(path);
        }

        let options = RunOptions::default();
        let cancel = CancelToken::new();
        let sink = CollectingSink::new();
        let ctx = StageContext::new("Load", &options, &sink, &cancel);

        let mut documents = Vec::new();
        LoadFiles::new(paths).process_all(&mut documents, &ctx).unwrap();

        assert_eq!(documents.len(), 2);
        assert_eq!(documents[0].file_name.as_deref(), Some("b.gpx"));
        assert_eq!(documents[1].waypoints[0].name, "GC1");
        assert_eq!(sink.messages(), ["Loaded 2 files with 2 waypoints"]);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let options = RunOptions::default();
        let cancel = CancelToken::new();
        let sink = CollectingSink::new();
        let ctx = StageContext::new("Load", &options, &sink, &cancel);

        let mut documents = Vec::new();
        let result = LoadFiles::new(vec![PathBuf::from("/nonexistent/file.gpx")])
            .process_all(&mut documents, &ctx);
        assert!(matches!(result, Err(crate::PipelineError::Io(_))));
        assert!(documents.is_empty());
    }
}
