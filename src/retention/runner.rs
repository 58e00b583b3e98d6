//! Scheduled retention runs inside `serve`.

use anyhow::Result;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{RetentionEngine, RetentionReport};
use crate::concurrency::JobLock;
use crate::config::{Config, parse_duration};

pub struct RetentionRunner {
    engine: RetentionEngine,
    lock: JobLock,
    interval: Duration,
    dry_run: bool,
}

impl RetentionRunner {
    pub fn new(config: &Config, engine: RetentionEngine, lock: JobLock) -> Result<Self> {
        let interval = parse_duration(&config.retention.interval)
            .map_err(|e| anyhow::anyhow!("Invalid retention interval: {}", e))?;

        Ok(Self {
            engine,
            lock,
            interval,
            dry_run: config.retention.dry_run,
        })
    }

    /// Run the schedule forever. Errors are logged and the next cycle
    /// proceeds as usual.
    pub async fn run(&self) -> Result<()> {
        info!(
            "Starting retention runner with interval: {:?}{}",
            self.interval,
            if self.dry_run { " (dry run)" } else { "" }
        );

        loop {
            sleep(self.interval).await;

            let start = Instant::now();
            match self.run_once().await {
                Ok(Some(report)) => {
                    debug!(
                        "Retention cycle finished in {:?} ({} deleted)",
                        start.elapsed(),
                        report.total_deleted()
                    );
                }
                Ok(None) => {}
                Err(e) => warn!("Retention cycle failed: {}", e),
            }
        }
    }

    /// One cycle. `None` when another process holds the job lock.
    pub async fn run_once(&self) -> Result<Option<RetentionReport>> {
        let Some(_guard) = self.lock.try_acquire()? else {
            debug!("Skipping retention cycle: job lock held by another process");
            return Ok(None);
        };

        let engine = self.engine.clone();
        let dry_run = self.dry_run;
        let report = tokio::task::spawn_blocking(move || engine.run(dry_run)).await??;

        for failure in report.failures() {
            warn!(
                "Retention for {} failed: {}",
                failure.data_type,
                failure.error.as_deref().unwrap_or("unknown error")
            );
        }
        Ok(Some(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::AuditLogger;
    use crate::db::Database;

    fn runner(dir: &std::path::Path, interval: &str) -> Result<RetentionRunner> {
        let db = Database::open_in_memory()?;
        let mut config = Config::default();
        config.retention.interval = interval.to_string();
        config.retention.dry_run = true;
        RetentionRunner::new(
            &config,
            RetentionEngine::new(db.clone(), AuditLogger::new(db)),
            JobLock::new(&dir.join("retention.lock"))?,
        )
    }

    #[test]
    fn rejects_bad_interval() {
        let tmp = tempfile::tempdir().unwrap();
        assert!(runner(tmp.path(), "soon").is_err());
        assert_eq!(runner(tmp.path(), "6h").unwrap().interval, Duration::from_secs(6 * 3600));
    }

    #[tokio::test]
    async fn run_once_produces_report() {
        let tmp = tempfile::tempdir().unwrap();
        let r = runner(tmp.path(), "1h").unwrap();
        let report = r.run_once().await.unwrap().unwrap();
        assert!(report.dry_run);
        assert_eq!(report.results.len(), 7);
    }

    #[tokio::test]
    async fn skips_when_lock_is_held() {
        let tmp = tempfile::tempdir().unwrap();
        let r = runner(tmp.path(), "1h").unwrap();
        let other = JobLock::new(&tmp.path().join("retention.lock")).unwrap();
        let _held = other.acquire().unwrap();

        assert!(r.run_once().await.unwrap().is_none());
    }
}
