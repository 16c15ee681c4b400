//! spad - The scheduled replica bounds service
//!
//! This is the main entry point for the spad service.
//! It wires together all the components:
//! - Configuration loading and manifest sync
//! - Store initialization
//! - Reconciler, work queue and worker pool
//! - Signal handling (reload and shutdown)

use anyhow::{Context, Result};
use clap::Parser;
use spa_config::{load_config, DaemonConfig};
use spa_core::{
    sync_manifest, ReconcileError, ReconcileReport, Reconciler, SyncSummary, WorkQueue,
};
use spa_store::{AuditEvent, AuditEventType, SqliteStore, Store, StoreError};
use spa_util::{database_path, default_config_path, format_duration, Backoff, TargetId};
use std::num::{NonZeroU64, NonZeroUsize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often due retries and resyncs are promoted and dispatched
const DISPATCH_INTERVAL: Duration = Duration::from_millis(250);

/// How long shutdown waits for in-flight reconciliations
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// spad - Time-window driven replica bounds for workload targets
#[derive(Parser, Debug)]
#[command(name = "spad")]
#[command(about = "Applies scheduled replica bounds to workload targets", long_about = None)]
struct Args {
    /// Configuration file path (default: ~/.config/spad/config.toml, or set SPA_CONFIG)
    #[arg(short, long, default_value_os_t = default_config_path())]
    config: PathBuf,

    /// Data directory override (or set SPA_DATA_DIR env var)
    #[arg(short, long, env = "SPA_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Number of concurrent reconciliation workers
    #[arg(short, long)]
    workers: Option<NonZeroUsize>,

    /// Seconds between periodic passes over a target
    #[arg(long)]
    resync_interval_seconds: Option<NonZeroU64>,
}

/// A finished reconciliation handed back by a worker
struct Completion {
    target: TargetId,
    result: Result<Result<ReconcileReport, ReconcileError>, JoinError>,
}

/// Main service state
struct Service {
    config_path: PathBuf,
    daemon: DaemonConfig,
    store: Arc<dyn Store>,
    reconciler: Arc<Reconciler>,
    queue: WorkQueue<TargetId>,
    backoff: Backoff<TargetId>,
}

impl Service {
    fn new(args: &Args) -> Result<Self> {
        // Load configuration
        let manifest = load_config(&args.config)
            .with_context(|| format!("Failed to load config from {:?}", args.config))?;

        info!(
            config_path = %args.config.display(),
            targets = manifest.targets.len(),
            schedules = manifest.schedules.len(),
            warnings = manifest.warnings.len(),
            "Configuration loaded"
        );

        let mut daemon = manifest.daemon.clone();
        if let Some(workers) = args.workers {
            daemon.workers = workers.get();
        }
        if let Some(seconds) = args.resync_interval_seconds {
            daemon.resync_interval = Duration::from_secs(seconds.get());
        }
        if let Some(data_dir) = &args.data_dir {
            daemon.data_dir = data_dir.clone();
        }

        // Create data directory
        std::fs::create_dir_all(&daemon.data_dir)
            .with_context(|| format!("Failed to create data directory {:?}", daemon.data_dir))?;

        // Initialize store
        let db_path = database_path(&daemon.data_dir);
        let store: Arc<dyn Store> = Arc::new(
            SqliteStore::open(&db_path)
                .with_context(|| format!("Failed to open database {:?}", db_path))?,
        );

        if !store.is_healthy() {
            anyhow::bail!("Store at {:?} is not responding", db_path);
        }

        info!(db_path = %db_path.display(), "Store initialized");

        // Log service start
        store.append_audit(AuditEvent::new(AuditEventType::DaemonStarted))?;

        let summary = sync_manifest(store.as_ref(), &manifest)
            .context("Failed to sync manifest into store")?;
        store.append_audit(AuditEvent::new(manifest_synced(&summary)))?;

        let reconciler = Arc::new(Reconciler::new(store.clone(), daemon.resync_interval));
        let backoff = Backoff::new(daemon.backoff_base, daemon.backoff_max);

        // Every stored target gets a first pass
        let mut queue = WorkQueue::new();
        for target in store.list_targets()? {
            queue.add(target);
        }

        info!(
            workers = daemon.workers,
            resync_interval = %format_duration(daemon.resync_interval),
            queued = queue.ready_len(),
            "Reconciler initialized"
        );

        Ok(Self {
            config_path: args.config.clone(),
            daemon,
            store,
            reconciler,
            queue,
            backoff,
        })
    }

    async fn run(mut self) -> Result<()> {
        let workers = Arc::new(Semaphore::new(self.daemon.workers));
        let (tx, mut completions) = mpsc::unbounded_channel::<Completion>();

        // Set up signal handlers
        let mut sigterm = signal(SignalKind::terminate())
            .context("Failed to create SIGTERM handler")?;
        let mut sigint = signal(SignalKind::interrupt())
            .context("Failed to create SIGINT handler")?;
        let mut sighup = signal(SignalKind::hangup())
            .context("Failed to create SIGHUP handler")?;

        let mut dispatch_timer = tokio::time::interval(DISPATCH_INTERVAL);

        info!("Service running");

        loop {
            tokio::select! {
                // Signal: SIGTERM or SIGINT - graceful shutdown
                _ = sigterm.recv() => {
                    info!("Received SIGTERM, shutting down gracefully");
                    break;
                }
                _ = sigint.recv() => {
                    info!("Received SIGINT, shutting down gracefully");
                    break;
                }

                // Signal: SIGHUP - reload the manifest
                _ = sighup.recv() => {
                    info!("Received SIGHUP, reloading configuration");
                    self.reload();
                    self.dispatch(&workers, &tx);
                }

                // Dispatch timer - promote due resyncs and retries
                _ = dispatch_timer.tick() => {
                    let promoted = self.queue.promote_due(Instant::now());
                    if promoted > 0 {
                        debug!(promoted, "Promoted delayed targets");
                    }
                    self.dispatch(&workers, &tx);
                }

                // Finished reconciliations
                Some(completion) = completions.recv() => {
                    self.complete(completion);
                    self.dispatch(&workers, &tx);
                }
            }
        }

        // Graceful shutdown
        info!(
            in_flight = self.queue.processing_len(),
            "Shutting down spad"
        );

        let drain = async {
            while self.queue.processing_len() > 0 {
                match completions.recv().await {
                    Some(completion) => self.queue.done(&completion.target),
                    None => break,
                }
            }
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            warn!("Timed out waiting for in-flight reconciliations");
        }

        // Log shutdown
        if let Err(e) = self
            .store
            .append_audit(AuditEvent::new(AuditEventType::DaemonStopped))
        {
            warn!(error = %e, "Failed to log service shutdown");
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Hand ready targets to idle workers
    fn dispatch(&mut self, workers: &Arc<Semaphore>, tx: &mpsc::UnboundedSender<Completion>) {
        while self.queue.ready_len() > 0 {
            let Ok(permit) = workers.clone().try_acquire_owned() else {
                break;
            };
            let Some(target) = self.queue.pop() else {
                break;
            };

            let reconciler = self.reconciler.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                let key = target.clone();
                let result = tokio::task::spawn_blocking(move || {
                    reconciler.reconcile(&key, spa_util::now())
                })
                .await;
                drop(permit);
                // The receiver only goes away once the service has shut down
                let _ = tx.send(Completion { target, result });
            });
        }
    }

    /// Record a finished pass and schedule the next one
    fn complete(&mut self, completion: Completion) {
        let Completion { target, result } = completion;
        self.queue.done(&target);
        let now = Instant::now();

        match result {
            Ok(Ok(report)) => {
                self.backoff.reset(&target);
                if let Some(reason) = &report.apply_failure {
                    warn!(
                        run_id = %report.run_id,
                        target = %target,
                        reason = %reason,
                        "Bounds rejected, retrying at next resync"
                    );
                }
                for evaluation in &report.outcomes {
                    debug!(
                        run_id = %report.run_id,
                        schedule = %evaluation.id,
                        outcome = evaluation.outcome.label(),
                        "Schedule evaluated"
                    );
                }
                self.queue.add_at(target, now + report.requeue_after);
            }
            Ok(Err(ReconcileError::Store(StoreError::NotFound(_)))) => {
                debug!(target = %target, "Target no longer exists");
                self.backoff.reset(&target);
                self.queue.forget(&target);
            }
            Ok(Err(e)) if e.is_retryable() => {
                let delay = self.backoff.next_delay(&target);
                warn!(
                    target = %target,
                    error = %e,
                    failures = self.backoff.failures(&target),
                    retry_in = %format_duration(delay),
                    "Reconciliation failed, retrying with backoff"
                );
                self.queue.add_at(target, now + delay);
            }
            Ok(Err(e)) => {
                error!(target = %target, error = %e, "Reconciliation failed");
                self.backoff.reset(&target);
                self.queue.add_at(target, now + self.daemon.resync_interval);
            }
            Err(e) => {
                error!(target = %target, error = %e, "Reconciliation worker failed");
                let delay = self.backoff.next_delay(&target);
                self.queue.add_at(target, now + delay);
            }
        }
    }

    /// Reload the manifest and queue every target it touched
    fn reload(&mut self) {
        let success = match self.resync_manifest() {
            Ok(summary) => {
                for target in &summary.removed {
                    self.queue.forget(target);
                    self.backoff.reset(target);
                }
                for target in &summary.changed {
                    self.queue.add(target.clone());
                }
                self.record(manifest_synced(&summary));
                true
            }
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Reload failed, keeping previous manifest");
                false
            }
        };
        self.record(AuditEventType::ConfigReloaded { success });
    }

    fn resync_manifest(&self) -> Result<SyncSummary> {
        let manifest = load_config(&self.config_path)
            .with_context(|| format!("Failed to load config from {:?}", self.config_path))?;

        if manifest.daemon.workers != self.daemon.workers
            || manifest.daemon.resync_interval != self.daemon.resync_interval
        {
            info!("Daemon settings changed; they take effect after a restart");
        }

        sync_manifest(self.store.as_ref(), &manifest).context("Failed to sync manifest into store")
    }

    fn record(&self, event: AuditEventType) {
        if let Err(e) = self.store.append_audit(AuditEvent::new(event)) {
            warn!(error = %e, "Failed to append audit event");
        }
    }
}

fn manifest_synced(summary: &SyncSummary) -> AuditEventType {
    AuditEventType::ManifestSynced {
        targets: summary.targets,
        schedules: summary.schedules,
        changed_targets: summary.changed.len(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "spad starting");

    // Create and run the service
    let service = Service::new(&args)?;
    service.run().await
}
