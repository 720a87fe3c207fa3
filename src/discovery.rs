use anyhow::{Context, Result};
use std::collections::HashSet;
use std::fs;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::parsers::{is_vcf_path, open_file, HEADER_SCAN_LINES, VCF_FORMAT_MARKER};

/// Finds VCF inputs for batch runs
pub struct FileDiscovery {
    recursive: bool,
}

impl FileDiscovery {
    pub fn new(recursive: bool) -> Self {
        Self { recursive }
    }

    /// Expand files and directories into a de-duplicated list of VCF inputs.
    ///
    /// Files named explicitly are kept as given so that boundary validation
    /// can report on them. Directory contents are sorted by path.
    pub fn discover(&self, paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        for path in paths {
            if path.is_file() {
                files.push(path.clone());
            } else if path.is_dir() {
                files.extend(self.discover_in_directory(path)?);
            } else {
                warn!("Skipping {}: no such file or directory", path.display());
            }
        }

        // Remove duplicates while preserving order
        let mut seen = HashSet::new();
        files.retain(|path| seen.insert(path.clone()));

        Ok(files)
    }

    fn discover_in_directory(&self, dir: &Path) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();

        if self.recursive {
            for entry in WalkDir::new(dir)
                .follow_links(true)
                .sort_by_file_name()
                .into_iter()
                .filter_map(|e| e.ok())
            {
                let path = entry.path();
                if path.is_file() && self.is_vcf_input(path) {
                    files.push(path.to_path_buf());
                }
            }
        } else {
            let entries = fs::read_dir(dir)
                .with_context(|| format!("Failed to read directory: {}", dir.display()))?;

            for entry in entries {
                let entry = entry.with_context(|| {
                    format!("Failed to read directory entry in: {}", dir.display())
                })?;
                let path = entry.path();

                if path.is_file() && self.is_vcf_input(&path) {
                    files.push(path);
                }
            }
            files.sort();
        }

        debug!("{}: {} VCF inputs", dir.display(), files.len());
        Ok(files)
    }

    fn is_vcf_input(&self, path: &Path) -> bool {
        if is_vcf_path(path) {
            return true;
        }

        // files without an extension are sniffed for the format marker
        path.extension().is_none() && self.has_vcf_header(path)
    }

    fn has_vcf_header(&self, path: &Path) -> bool {
        let reader = match open_file(path) {
            Ok(reader) => reader,
            Err(_) => return false,
        };

        reader
            .lines()
            .take(HEADER_SCAN_LINES)
            .map_while(|line| line.ok())
            .any(|line| line.starts_with(VCF_FORMAT_MARKER))
    }
}
