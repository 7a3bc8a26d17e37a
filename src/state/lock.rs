use crate::CRATE_NAME;
use crate::error::{IssuanceError, IssueResult};
use fs4::tokio::AsyncFileExt;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tracing::{debug, error};

pub const LOCK_FILE: &str = ".lock";

/// Exclusive advisory lock on a work directory, held for as long as a session lives.
///
/// Only one session may drive the files of a work directory at a time. A second attempt
/// fails immediately instead of waiting.
#[must_use]
#[clippy::has_significant_drop]
#[derive(Debug)]
pub struct WorkDirLock {
    lock_file: File,
    path: PathBuf,
}

impl WorkDirLock {
    pub async fn acquire(work_dir: &Path) -> IssueResult<Self> {
        let path = work_dir.join(LOCK_FILE);
        let lock_file = File::create(&path)
            .await
            .map_err(|e| IssuanceError::storage(&path, e))?;
        let locked = lock_file
            .try_lock_exclusive()
            .map_err(|e| IssuanceError::storage(&path, e))?;
        if !locked {
            return Err(IssuanceError::State(format!(
                "another {CRATE_NAME} session is using {}",
                work_dir.display()
            )));
        }
        debug!("Locked work directory {}", work_dir.display());
        Ok(Self { lock_file, path })
    }
}

impl Drop for WorkDirLock {
    fn drop(&mut self) {
        if let Err(e) = self.lock_file.unlock() {
            error!("Failed to release lock {}: {e}", self.path.display());
        }
    }
}
