/// `load_config` module: loads the optional YAML settings file into [`Settings`].
///
/// This is the only place where user-supplied YAML is parsed. Every field is
/// optional; anything left out keeps its default from `batchpdf-core`.
///
/// # Accepted schema
/// ```yaml
/// member_filter: '\.\d+$'   # regex over member file names
/// max_parallel: 8           # cap on concurrently assembled groups
/// separator: ", "           # placed between record lines before rendering
/// render:
///   title: "Fragments"
///   font_size_pt: 10.0
///   margin_mm: 20.0
///   rule_thickness_pt: 1.0
/// ```
///
/// # Errors
/// All errors use `anyhow::Error` for context-rich diagnostics, surfaced at the CLI boundary.
use anyhow::Result;
use batchpdf_core::config::Settings;
use std::fs;
use std::path::Path;
use tracing::{error, info};

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Settings> {
    let path_ref = path.as_ref();
    info!(config_path = ?path_ref, "Loading settings from file");

    let config_content = match fs::read_to_string(path_ref) {
        Ok(content) => {
            info!(config_path = ?path_ref, "Settings file read successfully");
            content
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to read settings file");
            return Err(anyhow::anyhow!(
                "Failed to read settings file {:?}: {}",
                path_ref,
                e
            ));
        }
    };

    // An empty document deserializes as null; treat it as all defaults.
    if config_content.trim().is_empty() {
        return Ok(Settings::default());
    }

    match serde_yaml::from_str::<Settings>(&config_content) {
        Ok(settings) => {
            info!(config_path = ?path_ref, "Parsed settings YAML successfully");
            Ok(settings)
        }
        Err(e) => {
            error!(error = ?e, config_path = ?path_ref, "Failed to parse settings YAML");
            Err(anyhow::anyhow!("Failed to parse settings YAML: {e}"))
        }
    }
}
