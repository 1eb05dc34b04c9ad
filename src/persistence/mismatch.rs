//! Newline-delimited list of symbols whose funding intervals differ between
//! the two venues.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

#[derive(Debug, Clone)]
pub struct MismatchStore {
    path: PathBuf,
}

impl MismatchStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current list. A missing file is an empty list.
    pub fn load(&self) -> Result<BTreeSet<String>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No mismatch list yet");
                return Ok(BTreeSet::new());
            }
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {:?}", self.path));
            }
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect())
    }

    /// Replace the list.
    pub fn save(&self, symbols: &BTreeSet<String>) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }

        let mut content = symbols.iter().cloned().collect::<Vec<_>>().join("\n");
        if !content.is_empty() {
            content.push('\n');
        }
        std::fs::write(&self.path, content)
            .with_context(|| format!("Failed to write {:?}", self.path))?;

        info!(count = symbols.len(), path = ?self.path, "Mismatch list saved");
        Ok(())
    }
}
