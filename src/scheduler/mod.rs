//! Scheduler reconciliation.
//!
//! Owns the mapping from persisted backup configurations to live cron
//! timers and converges it on every sync pass: stale or re-scheduled
//! timers are destroyed before replacements are created, so at most one
//! live timer exists per configuration id at any time.

pub mod cron;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::backup;
use crate::config::AppConfig;
use crate::store::{BackupConfiguration, ConfigStore, RecordStore};

struct LiveTimer {
    cron_expr: String,
    handle: JoinHandle<()>,
}

#[derive(Default)]
struct Counters {
    timers_created: AtomicU64,
    timers_destroyed: AtomicU64,
    fires_skipped: AtomicU64,
}

/// Point-in-time snapshot of scheduler convergence counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStats {
    pub timers_created: u64,
    pub timers_destroyed: u64,
    pub fires_skipped: u64,
}

/// Shared by every timer task; kept separate from the timer map so a firing
/// backup never contends with a reconciliation pass.
struct ExecContext {
    app_config: AppConfig,
    records: Arc<dyn RecordStore>,
    in_flight: Mutex<HashSet<String>>,
    counters: Counters,
}

pub struct Scheduler {
    configs: Arc<dyn ConfigStore>,
    timers: Mutex<HashMap<String, LiveTimer>>,
    ctx: Arc<ExecContext>,
}

impl Scheduler {
    pub fn new(
        app_config: AppConfig,
        configs: Arc<dyn ConfigStore>,
        records: Arc<dyn RecordStore>,
    ) -> Self {
        Scheduler {
            configs,
            timers: Mutex::new(HashMap::new()),
            ctx: Arc::new(ExecContext {
                app_config,
                records,
                in_flight: Mutex::new(HashSet::new()),
                counters: Counters::default(),
            }),
        }
    }

    /// One reconciliation pass: load enabled configurations, derive their
    /// cron expressions, and converge the live-timer map. A single bad
    /// configuration is skipped with a log line, never aborting the pass.
    /// Repeated calls with unchanged storage are a no-op.
    pub async fn sync(&self) {
        let configs = match self.configs.list_scheduled().await {
            Ok(configs) => configs,
            Err(e) => {
                warn!(error = %e, "failed to load backup configurations; keeping current timers");
                return;
            }
        };

        let mut desired: HashMap<String, (String, cron::CronExpr, BackupConfiguration)> =
            HashMap::new();
        for config in configs {
            let Some(expr) = cron::derive_expression(&config.schedule) else {
                debug!(config_id = %config.id, "no derivable schedule, skipping");
                continue;
            };
            match cron::CronExpr::parse(&expr) {
                Ok(parsed) => {
                    desired.insert(config.id.clone(), (expr, parsed, config));
                }
                Err(e) => {
                    warn!(config_id = %config.id, error = %e, "invalid schedule, skipping");
                }
            }
        }

        let mut timers = self.timers.lock().await;

        // Destroy first: configurations that vanished, were disabled, or
        // whose derived expression no longer matches the cached one.
        timers.retain(|id, timer| {
            let keep = desired
                .get(id)
                .is_some_and(|(expr, _, _)| *expr == timer.cron_expr);
            if !keep {
                timer.handle.abort();
                self.ctx.counters.timers_destroyed.fetch_add(1, Ordering::SeqCst);
                info!(config_id = %id, "live timer destroyed");
            }
            keep
        });

        for (id, (expr, parsed, config)) in desired {
            if timers.contains_key(&id) {
                continue;
            }
            info!(config_id = %id, cron = %expr, "live timer created");
            let handle = tokio::spawn(timer_loop(self.ctx.clone(), parsed, config));
            timers.insert(
                id,
                LiveTimer {
                    cron_expr: expr,
                    handle,
                },
            );
            self.ctx.counters.timers_created.fetch_add(1, Ordering::SeqCst);
        }
    }

    /// Eager sync at startup, then a fixed-interval reconciliation tick.
    pub async fn run(&self) {
        let mut tick = tokio::time::interval(self.ctx.app_config.sync_interval);
        loop {
            tick.tick().await;
            self.sync().await;
        }
    }

    /// Runs one backup outside the cron schedule (manual trigger). Honors
    /// the same overlap guard as scheduled fires.
    pub async fn run_once(&self, config: &BackupConfiguration) {
        fire(&self.ctx, config).await;
    }

    /// Aborts every live timer. In-flight dump subprocesses are terminated
    /// best-effort along with their tasks.
    pub async fn shutdown(&self) {
        let mut timers = self.timers.lock().await;
        for (id, timer) in timers.drain() {
            timer.handle.abort();
            debug!(config_id = %id, "timer aborted at shutdown");
        }
    }

    pub async fn live_timer_count(&self) -> usize {
        self.timers.lock().await.len()
    }

    pub async fn cached_expression(&self, config_id: &str) -> Option<String> {
        self.timers
            .lock()
            .await
            .get(config_id)
            .map(|t| t.cron_expr.clone())
    }

    pub fn stats(&self) -> SchedulerStats {
        SchedulerStats {
            timers_created: self.ctx.counters.timers_created.load(Ordering::SeqCst),
            timers_destroyed: self.ctx.counters.timers_destroyed.load(Ordering::SeqCst),
            fires_skipped: self.ctx.counters.fires_skipped.load(Ordering::SeqCst),
        }
    }
}

async fn timer_loop(ctx: Arc<ExecContext>, expr: cron::CronExpr, config: BackupConfiguration) {
    loop {
        let Some(next) = expr.next_run(Utc::now()) else {
            warn!(config_id = %config.id, "schedule never fires again; timer going dormant");
            return;
        };
        let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
        tokio::time::sleep(wait).await;
        fire(&ctx, &config).await;
    }
}

/// One timer fire: overlap guard, pending record, pipeline run, record
/// transition. Errors are recorded and logged; nothing propagates out of a
/// fire.
async fn fire(ctx: &ExecContext, config: &BackupConfiguration) {
    {
        let mut in_flight = ctx.in_flight.lock().await;
        if !in_flight.insert(config.id.clone()) {
            ctx.counters.fires_skipped.fetch_add(1, Ordering::SeqCst);
            warn!(config_id = %config.id, "previous backup still running; fire skipped");
            return;
        }
    }

    execute(ctx, config).await;

    ctx.in_flight.lock().await.remove(&config.id);
}

async fn execute(ctx: &ExecContext, config: &BackupConfiguration) {
    let db_name = config.db_name().unwrap_or("unknown").to_string();

    let record_id = match ctx.records.create_pending(&config.owner_id, &db_name).await {
        Ok(id) => Some(id),
        Err(e) => {
            // The backup itself still runs; only the audit row is lost.
            warn!(config_id = %config.id, error = %e, "failed to create pending record");
            None
        }
    };

    match backup::run_backup(&ctx.app_config, config).await {
        Ok(artifact) => {
            let size = tokio::fs::metadata(&artifact.path)
                .await
                .map(|m| m.len())
                .unwrap_or(0);
            info!(config_id = %config.id, artifact = %artifact.path.display(), size, "backup succeeded");
            if let Some(id) = record_id {
                if let Err(e) = ctx
                    .records
                    .mark_completed(&id, &artifact.path.to_string_lossy(), size, Utc::now())
                    .await
                {
                    warn!(record_id = %id, error = %e, "failed to mark record completed");
                }
            }
        }
        Err(e) => {
            error!(config_id = %config.id, error = %e, "backup failed");
            if let Some(id) = record_id {
                let message = format!("{}: {e}", e.kind());
                if let Err(e) = ctx.records.mark_failed(&id, &message).await {
                    warn!(record_id = %id, error = %e, "failed to mark record failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::dump::write_fake_tool;
    use crate::store::memory::MemoryStore;
    use crate::store::{BackupStatus, DatabaseKind, Frequency, Schedule};
    use std::path::Path;
    use tempfile::TempDir;

    fn app_config(root: &Path) -> AppConfig {
        AppConfig {
            backup_root: root.to_path_buf(),
            mongodump_path: None,
            pg_dump_path: None,
            encryption_secret: Some("scheduler-secret".to_string()),
            database_url: None,
            sync_interval: Duration::from_secs(60),
        }
    }

    fn pg_config(id: &str, schedule: Schedule) -> BackupConfiguration {
        BackupConfiguration {
            id: id.to_string(),
            owner_id: "owner-1".to_string(),
            kind: DatabaseKind::Postgres,
            mongo_uri: None,
            mongo_db_name: None,
            pg_uri: Some("postgres://localhost/shop".to_string()),
            pg_db_name: Some("shop".to_string()),
            schedule,
            enabled: true,
        }
    }

    fn scheduler_with(store: Arc<MemoryStore>, root: &Path) -> Scheduler {
        Scheduler::new(app_config(root), store.clone(), store)
    }

    #[tokio::test]
    async fn sync_creates_one_timer_per_valid_config() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_config(pg_config("a", Schedule::Cron("0 * * * *".into())))
            .await;
        store
            .upsert_config(pg_config(
                "b",
                Schedule::Plan {
                    frequency: Some(Frequency::Daily),
                    time_of_day: Some("14:30".into()),
                    day_of_week: None,
                },
            ))
            .await;
        // Invalid expression: skipped without affecting the others.
        store
            .upsert_config(pg_config("c", Schedule::Cron("not a cron".into())))
            .await;

        let scheduler = scheduler_with(store, root.path());
        scheduler.sync().await;

        assert_eq!(scheduler.live_timer_count().await, 2);
        assert_eq!(scheduler.cached_expression("a").await.as_deref(), Some("0 * * * *"));
        assert_eq!(scheduler.cached_expression("b").await.as_deref(), Some("30 14 * * *"));
        assert_eq!(scheduler.cached_expression("c").await, None);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn repeated_sync_is_idempotent() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_config(pg_config("a", Schedule::Cron("0 * * * *".into())))
            .await;

        let scheduler = scheduler_with(store, root.path());
        scheduler.sync().await;
        scheduler.sync().await;
        scheduler.sync().await;

        let stats = scheduler.stats();
        assert_eq!(stats.timers_created, 1);
        assert_eq!(stats.timers_destroyed, 0);
        assert_eq!(scheduler.live_timer_count().await, 1);
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn disabling_removes_the_timer() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_config(pg_config("a", Schedule::Cron("0 * * * *".into())))
            .await;

        let scheduler = scheduler_with(store.clone(), root.path());
        scheduler.sync().await;
        assert_eq!(scheduler.live_timer_count().await, 1);

        store.set_enabled("a", false).await;
        scheduler.sync().await;

        assert_eq!(scheduler.live_timer_count().await, 0);
        assert_eq!(scheduler.stats().timers_destroyed, 1);
    }

    #[tokio::test]
    async fn deleting_removes_the_timer() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_config(pg_config("a", Schedule::Cron("0 * * * *".into())))
            .await;

        let scheduler = scheduler_with(store.clone(), root.path());
        scheduler.sync().await;

        store.remove_config("a").await;
        scheduler.sync().await;

        assert_eq!(scheduler.live_timer_count().await, 0);
    }

    #[tokio::test]
    async fn schedule_change_destroys_then_recreates() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        store
            .upsert_config(pg_config("a", Schedule::Cron("0 * * * *".into())))
            .await;

        let scheduler = scheduler_with(store.clone(), root.path());
        scheduler.sync().await;

        store
            .upsert_config(pg_config("a", Schedule::Cron("30 2 * * *".into())))
            .await;
        scheduler.sync().await;

        let stats = scheduler.stats();
        assert_eq!(stats.timers_destroyed, 1);
        assert_eq!(stats.timers_created, 2);
        assert_eq!(scheduler.live_timer_count().await, 1);
        assert_eq!(scheduler.cached_expression("a").await.as_deref(), Some("30 2 * * *"));
        scheduler.shutdown().await;
    }

    #[tokio::test]
    async fn manual_run_records_completion() {
        let root = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());

        let mut config = app_config(root.path());
        config.pg_dump_path = Some(write_fake_tool(
            tools.path(),
            "pg_dump",
            "#!/bin/sh\nwhile [ $# -gt 0 ]; do\n  if [ \"$1\" = \"--file\" ]; then file=\"$2\"; shift; fi\n  shift\ndone\necho '-- dump' > \"$file\"\n",
        ));
        let scheduler = Scheduler::new(config, store.clone(), store.clone());

        let backup_config = pg_config("a", Schedule::Cron("0 * * * *".into()));
        scheduler.run_once(&backup_config).await;

        assert_eq!(store.record_count().await, 1);
        let record = store.record("record-0").await.unwrap();
        assert_eq!(record.status, BackupStatus::Completed);
        assert!(record.size_bytes > 0);
        assert!(record.artifact_path.as_deref().unwrap().ends_with("shop.sql.enc"));
        assert!(record.completed_at.is_some());
    }

    #[tokio::test]
    async fn failed_run_records_error_kind() {
        let root = TempDir::new().unwrap();
        let tools = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());

        let mut config = app_config(root.path());
        config.pg_dump_path = Some(write_fake_tool(
            tools.path(),
            "pg_dump",
            "#!/bin/sh\necho 'no such database' >&2\nexit 1\n",
        ));
        let scheduler = Scheduler::new(config, store.clone(), store.clone());

        scheduler
            .run_once(&pg_config("a", Schedule::Cron("0 * * * *".into())))
            .await;

        let record = store.record("record-0").await.unwrap();
        assert_eq!(record.status, BackupStatus::Failed);
        let message = record.error_message.unwrap();
        assert!(message.starts_with("DUMP_FAILED"), "got: {message}");
    }

    #[tokio::test]
    async fn overlapping_fire_is_skipped() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(MemoryStore::new());
        let scheduler = scheduler_with(store.clone(), root.path());

        let backup_config = pg_config("a", Schedule::Cron("0 * * * *".into()));
        // Simulate a still-running execution for the same id.
        scheduler
            .ctx
            .in_flight
            .lock()
            .await
            .insert("a".to_string());

        scheduler.run_once(&backup_config).await;

        assert_eq!(scheduler.stats().fires_skipped, 1);
        assert_eq!(store.record_count().await, 0);
    }
}
