//! Pruning of model output that is not needed once an iterate is archived.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::dataset::DATASET_EXTENSION;
use crate::error::SwrResult;

/// Substrings of file names that are always kept.
pub const KEEP_SUBSTRINGS: [&str; 5] = ["diagvar", "progvar", "_grid_", "_icemod", "namelist_"];

/// Exact file names that are always kept.
pub const KEEP_NAMES: [&str; 2] = ["namcouple", "fort.4"];

/// Rules deciding which files of an iterate survive reduction.
#[derive(Debug, Clone)]
pub struct KeepList {
    pub substrings: Vec<String>,
    pub names: Vec<String>,
    /// Coupling files `<variable>_*.nc` for these variables are kept so the
    /// iterate can still be compared and restarted from.
    pub coupling_variables: Vec<String>,
    pub keep_debug_output: bool,
}

impl KeepList {
    pub fn new(coupling_variables: &[String], keep_debug_output: bool) -> Self {
        Self {
            substrings: KEEP_SUBSTRINGS.iter().map(|s| s.to_string()).collect(),
            names: KEEP_NAMES.iter().map(|s| s.to_string()).collect(),
            coupling_variables: coupling_variables.to_vec(),
            keep_debug_output,
        }
    }

    pub fn keeps(&self, file_name: &str) -> bool {
        if self.substrings.iter().any(|s| file_name.contains(s.as_str())) {
            return true;
        }
        if self.names.iter().any(|n| n == file_name) {
            return true;
        }
        if self.keep_debug_output && (file_name.contains("debug") || file_name == "nout.000000") {
            return true;
        }
        let suffix = format!(".{DATASET_EXTENSION}");
        file_name.ends_with(&suffix)
            && self
                .coupling_variables
                .iter()
                .any(|v| file_name.starts_with(&format!("{v}_")))
    }
}

/// Deletes every file in `run_directory` the keep-list does not cover and
/// returns the removed paths. Subdirectories are left alone.
pub fn reduce_output(run_directory: &Path, keep: &KeepList) -> SwrResult<Vec<PathBuf>> {
    let mut removed = Vec::new();
    for entry in fs::read_dir(run_directory)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        if keep.keeps(name) {
            continue;
        }
        fs::remove_file(&path)?;
        removed.push(path);
    }
    removed.sort();
    debug!("Removed {} files from {}", removed.len(), run_directory.display());
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn touch(dir: &Path, name: &str) {
        fs::write(dir.join(name), b"").expect("touch");
    }

    #[test]
    fn keep_list_matches_known_outputs() {
        let keep = KeepList::new(&["A_SST".to_string()], false);
        assert!(keep.keeps("diagvar.nc"));
        assert!(keep.keeps("SWR1_1ts_grid_T.nc"));
        assert!(keep.keeps("namcouple"));
        assert!(keep.keeps("A_SST_oceanx_01.nc"));
        assert!(!keep.keeps("A_SST.txt"));
        assert!(!keep.keeps("debug.01.000000"));
        assert!(!keep.keeps("fort.4.bak"));

        let keep = KeepList::new(&[], true);
        assert!(keep.keeps("debug.01.000000"));
        assert!(keep.keeps("nout.000000"));
    }

    #[test]
    fn reduce_output_removes_everything_else() {
        let dir = tempfile::tempdir().expect("tempdir");
        for name in ["progvar.nc", "fort.4", "rstas.nc", "ifs.stat", "nout.000000", "O_SSTSST_oceanx_01.nc"] {
            touch(dir.path(), name);
        }
        fs::create_dir(dir.path().join("sub")).expect("subdir");

        let keep = KeepList::new(&["O_SSTSST".to_string()], false);
        let removed = reduce_output(dir.path(), &keep).expect("reduce");

        let names: Vec<_> = removed
            .iter()
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()))
            .collect();
        assert_eq!(names, vec!["ifs.stat", "nout.000000", "rstas.nc"]);
        assert!(dir.path().join("progvar.nc").exists());
        assert!(dir.path().join("O_SSTSST_oceanx_01.nc").exists());
        assert!(dir.path().join("sub").is_dir());
    }
}
