//! Cross-process lock for maintenance jobs (fs2 advisory `flock`).
//!
//! The retention runner inside `serve` and a manual `casebuilder retention
//! run` both take this lock, so two cleanup passes never interleave.

use anyhow::{Context, Result};
use fs2::FileExt;
use std::fs::{self, File};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct JobLock {
    path: PathBuf,
}

/// Releases the lock on drop.
pub struct JobLockGuard {
    file: File,
}

impl Drop for JobLockGuard {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

impl JobLock {
    /// Lock backed by the file at `path`; the parent directory is created.
    pub fn new(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("creating {}", parent.display()))?;
        }
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Wait until the lock is free.
    pub fn acquire(&self) -> Result<JobLockGuard> {
        let file = File::create(&self.path)?;
        file.lock_exclusive()?;
        Ok(JobLockGuard { file })
    }

    /// `None` if another process holds the lock.
    pub fn try_acquire(&self) -> Result<Option<JobLockGuard>> {
        let file = File::create(&self.path)?;
        match file.try_lock_exclusive() {
            Ok(()) => Ok(Some(JobLockGuard { file })),
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn try_acquire_fails_while_held() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = JobLock::new(&tmp.path().join("run").join("retention.lock")).unwrap();

        let guard = lock.try_acquire().unwrap();
        assert!(guard.is_some());

        // A second handle on the same file sees contention
        let other = JobLock::new(lock.path()).unwrap();
        assert!(other.try_acquire().unwrap().is_none());

        drop(guard);
        assert!(other.try_acquire().unwrap().is_some());
    }

    #[test]
    fn blocking_acquire_after_release() {
        let tmp = tempfile::tempdir().unwrap();
        let lock = JobLock::new(&tmp.path().join("retention.lock")).unwrap();
        {
            let _guard = lock.acquire().unwrap();
        }
        let _again = lock.acquire().unwrap();
    }
}
