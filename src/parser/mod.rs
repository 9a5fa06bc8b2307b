pub mod types;
pub mod yaml;

use std::path::{Path, PathBuf};

pub use types::{Action, Flow, Step};
pub use yaml::{parse_flow_file, parse_yaml_content};

/// Flow files under `path`, or `path` itself when it is a file
///
/// Files under `shared/` directories and the harness config file are not
/// flows.
pub fn discover_flow_files(path: &Path) -> Vec<PathBuf> {
    if !path.is_dir() {
        return vec![path.to_path_buf()];
    }

    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(path)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| {
            let file = e.path();
            let is_yaml = file
                .extension()
                .map_or(false, |ext| ext == "yaml" || ext == "yml");
            let name = e.file_name().to_string_lossy();
            let in_shared = file
                .strip_prefix(path)
                .map_or(false, |rel| rel.components().any(|c| c.as_os_str() == "shared"));

            is_yaml && !in_shared && !name.starts_with("harness.")
        })
        .map(|e| e.path().to_path_buf())
        .collect();
    files.sort();
    files
}
