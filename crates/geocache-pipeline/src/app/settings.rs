use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[clap(author, version, about, long_about = None)]
/// Geocache Pipeline - Loads, cleans up, merges and publishes geocache GPX files
pub struct Settings {
    /// GPX files to load
    #[clap(short, long, value_name = "FILE")]
    pub gpx_files: Vec<PathBuf>,

    /// Directory to publish the resulting GPX files into
    #[clap(short, long, value_name = "DIR")]
    pub output: Option<PathBuf>,

    /// Storage file for saved edits and settings (defaults to the user config directory)
    #[clap(long, value_name = "FILE")]
    pub storage: Option<PathBuf>,

    /// Only build the viewer cache; nothing gets published
    #[clap(long, default_value = "false")]
    pub viewer_cache_only: bool,

    /// Never contact the geocache service
    #[clap(long, default_value = "false")]
    pub local_storage_only: bool,

    /// Remove disabled caches instead of prefixing their names
    #[clap(long, default_value = "false")]
    pub remove_disabled: bool,

    /// Prefix for the names of disabled caches (persisted for later runs)
    #[clap(long, value_name = "PREFIX")]
    pub disabled_prefix: Option<String>,

    /// Override the coordinates of a cache and save the edit, e.g. GC12345:51.5,-0.12
    #[clap(long, value_name = "CODE:LAT,LON")]
    pub set_coordinates: Vec<String>,

    /// Save the edits found in the loaded files for later runs
    #[clap(long, default_value = "false")]
    pub save_edits: bool,

    /// Forget every saved edit of a cache
    #[clap(long, value_name = "CODE")]
    pub forget: Vec<String>,
}

impl Settings {
    pub fn from_cli() -> Self {
        match Settings::try_parse() {
            Ok(args) => args,
            Err(e) => e.exit(),
        }
    }

    /// Parsed `CODE:LAT,LON` overrides as `(code, "LAT,LON")`
    pub fn coordinate_overrides(&self) -> Result<Vec<(String, String)>, String> {
        self.set_coordinates
            .iter()
            .map(|arg| match arg.split_once(':') {
                Some((code, coords)) if !code.trim().is_empty() => {
                    Ok((code.trim().to_uppercase(), coords.to_string()))
                }
                _ => Err(format!("expected CODE:LAT,LON, got '{arg}'")),
            })
            .collect()
    }

    /// Whether a viewer cache pass has to run before anything else
    pub fn needs_viewer_pass(&self) -> bool {
        self.viewer_cache_only || self.save_edits || !self.set_coordinates.is_empty()
    }
}
