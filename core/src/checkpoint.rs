//! Content-addressed file-snapshot checkpoint engine. Captures file bytes
//! before a write-shaped tool runs so they can be restored later, deduping
//! identical content across checkpoints by its sha256 digest.

use std::collections::HashMap;
use std::path::Path;

use dashmap::DashMap;
use sha2::{Digest, Sha256};

use crate::host::{Filesystem, HostError};
use crate::message::{FileSnapshotRef, MessageCheckpoint};

/// Tool names the Checkpoint Engine snapshots target paths for, immediately
/// before the tool executes.
pub const CHECKPOINTABLE_TOOLS: &[&str] =
    &["edit_file", "write_file", "replace_file_content", "create_file_or_folder", "delete_file_or_folder"];

pub fn is_checkpointable(tool_name: &str) -> bool {
    CHECKPOINTABLE_TOOLS.contains(&tool_name)
}

/// A single file's before-state, prior to being addressed by hash.
#[derive(Debug, Clone)]
pub struct FileSnapshot {
    pub content: Option<String>,
    pub previously_existed: bool,
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Holds content-addressed snapshot blobs shared across every
/// [`crate::message::MessageCheckpoint`] in a thread so identical content is
/// stored once.
#[derive(Default)]
pub struct CheckpointStore {
    blobs: DashMap<String, String>,
}

/// Report of a restore operation.
#[derive(Debug, Clone, Default)]
pub struct RestoreReport {
    pub success: bool,
    pub restored_files: Vec<String>,
    pub errors: Vec<String>,
}

impl CheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn put_blob(&self, content: &str) -> String {
        let hash = sha256_hex(content);
        self.blobs.entry(hash.clone()).or_insert_with(|| content.to_string());
        hash
    }

    pub fn get_blob(&self, hash: &str) -> Option<String> {
        self.blobs.get(hash).map(|v| v.clone())
    }

    /// Captures current content for every target path. Reads go through the
    /// host's [`Filesystem`]; a read error is treated as
    /// "file does not exist" rather than aborting the whole capture, so one
    /// unreadable path never blocks checkpointing the others.
    pub async fn capture(
        &self,
        fs: &dyn Filesystem,
        paths: &[String],
    ) -> HashMap<String, FileSnapshotRef> {
        let mut files = HashMap::new();
        for path in paths {
            let content = fs.read(Path::new(path)).await.ok().flatten();
            let previously_existed = content.is_some();
            let hash = content.as_deref().map(|c| self.put_blob(c));
            files.insert(path.clone(), FileSnapshotRef { hash, previously_existed });
        }
        files
    }

    /// Restores every file covered by `checkpoint` to its snapshotted bytes.
    /// A locked/unwritable path is recorded in `errors` without aborting the
    /// remaining restores — partial failure is possible and is reported
    /// rather than hidden.
    pub async fn restore(
        &self,
        fs: &dyn Filesystem,
        checkpoint: &MessageCheckpoint,
    ) -> RestoreReport {
        let mut report = RestoreReport { success: true, ..Default::default() };
        for (path, snapshot) in &checkpoint.files {
            let result = self.restore_one(fs, path, snapshot).await;
            match result {
                Ok(()) => report.restored_files.push(path.clone()),
                Err(e) => {
                    report.success = false;
                    report.errors.push(format!("{path}: {e}"));
                }
            }
        }
        report
    }

    async fn restore_one(
        &self,
        fs: &dyn Filesystem,
        path: &str,
        snapshot: &FileSnapshotRef,
    ) -> Result<(), HostError> {
        let p = Path::new(path);
        match &snapshot.hash {
            None => {
                if fs.exists(p).await? {
                    fs.delete(p).await?;
                }
                Ok(())
            }
            Some(hash) => {
                let content = self.get_blob(hash).ok_or_else(|| {
                    HostError::Other(format!("missing checkpoint blob for hash {hash}"))
                })?;
                fs.write(p, &content).await
            }
        }
    }
}
