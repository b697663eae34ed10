//! Storage sink: collision-free payload persistence partitioned by group key.
//!
//! Each payload lands at `root/<group>/<name>-<task id>.<ext>`. The task id
//! suffix makes destinations unique per task, so concurrent writers never
//! target the same path and the write path needs no locking. Writes go to a
//! temp file first and are renamed into place so a crash never leaves a
//! half-written payload at the final path.

mod sanitize;

pub use sanitize::sanitize_component;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::checksum;
use crate::resilience::FetchError;

/// Record of one persisted payload, carried in the final report.
#[derive(Debug, Clone)]
pub struct StoredPayload {
    pub path: PathBuf,
    pub bytes: u64,
    pub sha256: String,
}

/// Destination for fetched payloads.
#[derive(Debug, Clone)]
pub struct PayloadStore {
    root: PathBuf,
}

impl PayloadStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist one payload. Blocking; call from `spawn_blocking` in async code.
    ///
    /// `workspace` selects a staging directory for the temp file: isolated
    /// plans give each worker its own slot so staging writes never share a
    /// directory, shared plans stage next to the final path.
    pub fn persist(
        &self,
        group: &str,
        task_id: &str,
        name: &str,
        ext: &str,
        data: &[u8],
        workspace: Option<usize>,
    ) -> Result<StoredPayload, FetchError> {
        let dir = self.root.join(sanitize_component(group));
        fs::create_dir_all(&dir)?;

        let file_name = format!(
            "{}-{}.{}",
            sanitize_component(name),
            sanitize_component(task_id),
            ext
        );
        let final_path = dir.join(&file_name);

        let staging_dir = match workspace {
            Some(slot) => {
                let staging = self.root.join(format!(".staging-{}", slot));
                fs::create_dir_all(&staging)?;
                staging
            }
            None => dir.clone(),
        };
        let temp_path = staging_dir.join(format!("{}.part", file_name));

        {
            let mut f = fs::File::create(&temp_path)?;
            f.write_all(data)?;
            f.sync_all()?;
        }
        fs::rename(&temp_path, &final_path)?;

        tracing::debug!(path = %final_path.display(), bytes = data.len(), "payload stored");
        Ok(StoredPayload {
            path: final_path,
            bytes: data.len() as u64,
            sha256: checksum::sha256_bytes(data),
        })
    }
}

/// File extension derived from a locator's path, `bin` when indeterminate.
/// Locators are typically signed URLs whose path ends in the rendered format.
pub fn extension_from_locator(locator: &str) -> String {
    let from_path = url::Url::parse(locator).ok().and_then(|u| {
        u.path_segments()
            .and_then(|segments| segments.last().map(str::to_string))
            .and_then(|last| {
                last.rsplit_once('.')
                    .map(|(_, ext)| ext.to_ascii_lowercase())
            })
            .filter(|ext| !ext.is_empty() && ext.len() <= 8 && ext.chars().all(|c| c.is_ascii_alphanumeric()))
    });
    from_path.unwrap_or_else(|| "bin".to_string())
}
