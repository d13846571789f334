// Evhub Directory Scanner
// Lists candidate input and heatmap nodes in the device directories

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Entries of `dir` whose file name starts with `prefix`, sorted by path.
/// A missing directory yields an empty list.
pub fn list_nodes(dir: &Path, prefix: &str) -> io::Result<Vec<PathBuf>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    let mut nodes = Vec::new();
    for entry in entries {
        let entry = entry?;
        let matches = entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with(prefix))
            .unwrap_or(false);
        if matches {
            nodes.push(entry.path());
        }
    }
    nodes.sort();
    Ok(nodes)
}

/// Where to look for nodes and how they are named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scanner {
    pub input_dir: PathBuf,
    pub video_dir: PathBuf,
    pub node_prefix: String,
    pub video_prefix: String,
}

/// Difference between the nodes on disk and the nodes already owned.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanDelta {
    pub added: Vec<PathBuf>,
    pub removed: Vec<PathBuf>,
}

fn diff(present: Vec<PathBuf>, known: &[PathBuf]) -> ScanDelta {
    let removed = known
        .iter()
        .filter(|path| !present.contains(path))
        .cloned()
        .collect();
    let added = present.into_iter().filter(|path| !known.contains(path)).collect();
    ScanDelta { added, removed }
}

impl Scanner {
    pub fn input_nodes(&self) -> io::Result<Vec<PathBuf>> {
        list_nodes(&self.input_dir, &self.node_prefix)
    }

    pub fn video_nodes(&self) -> io::Result<Vec<PathBuf>> {
        list_nodes(&self.video_dir, &self.video_prefix)
    }

    /// Compare the input directory against the paths in `known`.
    pub fn scan_inputs(&self, known: &[PathBuf]) -> io::Result<ScanDelta> {
        Ok(diff(self.input_nodes()?, known))
    }

    pub fn scan_videos(&self, known: &[PathBuf]) -> io::Result<ScanDelta> {
        Ok(diff(self.video_nodes()?, known))
    }
}
