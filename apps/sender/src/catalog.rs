//! Files this sender offers, read from the configured paths.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Mutex, PoisonError};

use beam_session::FileCatalog;
use beam_transfer::LocalFile;
use tracing::{debug, info, warn};

/// In-memory catalog of shared files.
///
/// Each file gets a fresh UUID per run. A file becomes requestable once the
/// server confirms its registration.
pub struct LocalCatalog {
    files: Vec<LocalFile>,
    enabled: Mutex<HashSet<String>>,
}

impl LocalCatalog {
    /// Builds the catalog, skipping paths that are not readable files.
    pub fn from_paths(paths: &[PathBuf]) -> Self {
        let mut files = Vec::with_capacity(paths.len());
        for path in paths {
            if !path.is_file() {
                warn!(path = %path.display(), "shared path is not a file, skipping");
                continue;
            }
            let id = uuid::Uuid::new_v4().to_string();
            match LocalFile::from_path(id, path) {
                Ok(file) => {
                    debug!(id = %file.id, name = %file.name, size = file.size, "sharing file");
                    files.push(file);
                }
                Err(e) => warn!(path = %path.display(), "cannot share file: {e}"),
            }
        }
        Self {
            files,
            enabled: Mutex::new(HashSet::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Number of files the server has confirmed.
    pub fn enabled_count(&self) -> usize {
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[cfg(test)]
    fn is_enabled(&self, file_id: &str) -> bool {
        self.enabled
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(file_id)
    }
}

impl FileCatalog for LocalCatalog {
    fn listed_file(&self, file_id: &str) -> Option<LocalFile> {
        self.files.iter().find(|f| f.id == file_id).cloned()
    }

    fn listed_files(&self) -> Vec<LocalFile> {
        self.files.clone()
    }

    fn enable_files(&self, file_ids: &[String]) {
        let mut enabled = self.enabled.lock().unwrap_or_else(PoisonError::into_inner);
        let mut added = 0;
        for id in file_ids {
            if self.files.iter().any(|f| &f.id == id) {
                added += usize::from(enabled.insert(id.clone()));
            } else {
                debug!(file = %id, "server registered a file we do not list");
            }
        }
        if added > 0 {
            info!(added, total = enabled.len(), "files available to peers");
        }
    }
}
