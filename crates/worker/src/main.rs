use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use browserq_worker::browser::webdriver::{WebDriverConfig, WebDriverLauncher};
use browserq_worker::queue::PgTaskQueue;
use browserq_worker::reclaim::{ResourceTracker, TrackedResourceReclaimer};
use browserq_worker::signals;
use browserq_worker::sink::{CallbackSink, FanoutSink, PgResultSink, ResultSink};
use browserq_worker::stats::{FileSnapshotSink, LogSnapshotSink, SnapshotSink, StatsReporter};
use browserq_worker::{Dispatcher, JobExecutor, WorkerConfig};

/// How long to wait for the stats task after the dispatcher stopped.
const STATS_STOP_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "browserq_worker=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Err(e) = run().await {
        tracing::error!(error = %format!("{e:#}"), "Worker failed to start");
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    // --- Configuration ---
    let config = WorkerConfig::from_env().context("Invalid configuration")?;
    tracing::info!(
        capacity = config.dispatcher.capacity,
        task_queue = %config.task_queue_key,
        result_queue = %config.result_queue_key,
        webdriver_url = %config.webdriver_url,
        "Loaded worker configuration"
    );

    // --- Database ---
    let pool = browserq_db::create_pool(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connection pool created");

    browserq_db::health_check(&pool)
        .await
        .context("Database health check failed")?;
    tracing::info!("Database health check passed");

    browserq_db::run_migrations(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    // --- Result sinks ---
    let mut sinks: Vec<Arc<dyn ResultSink>> = vec![Arc::new(PgResultSink::new(
        pool.clone(),
        config.result_queue_key.clone(),
    ))];
    if let Some(url) = &config.result_callback_url {
        sinks.push(Arc::new(
            CallbackSink::new(url.clone()).context("Failed to build callback client")?,
        ));
        tracing::info!(url = %url, "Result callback enabled");
    }
    let sink: Arc<dyn ResultSink> = Arc::new(FanoutSink::new(sinks));

    // --- Browser ---
    let launcher = WebDriverLauncher::new(&WebDriverConfig {
        url: config.webdriver_url.clone(),
        max_memory: config.chrome_max_memory.clone(),
    })
    .context("Failed to build WebDriver client")?;
    let tracker = Arc::new(ResourceTracker::new());
    let executor = Arc::new(JobExecutor::new(
        Arc::new(launcher),
        Arc::clone(&tracker),
        config.job.clone(),
    ));
    let reclaimer = Arc::new(TrackedResourceReclaimer::new(
        tracker,
        config.reclaim_process_pattern.clone(),
    ));

    // --- Dispatcher ---
    let queue = Arc::new(PgTaskQueue::new(pool.clone(), config.task_queue_key.clone()));
    let dispatcher = Dispatcher::new(config.dispatcher.clone(), queue, sink, executor, reclaimer);
    let dispatcher_handle = Arc::clone(&dispatcher)
        .start()
        .await
        .context("Task queue is unreachable")?;

    // --- Stats ---
    let stats_cancel = CancellationToken::new();
    let snapshot_sink: Arc<dyn SnapshotSink> = match &config.stats_file {
        Some(path) => Arc::new(FileSnapshotSink::new(path.clone())),
        None => Arc::new(LogSnapshotSink),
    };
    let stats_handle = tokio::spawn(
        StatsReporter::new(
            Arc::clone(dispatcher.registry()),
            snapshot_sink,
            config.stats_interval,
        )
        .run(stats_cancel.clone()),
    );

    // --- Signals ---
    let signal_handle = signals::spawn_shutdown_listener(Arc::clone(&dispatcher), stats_cancel.clone());

    // --- Wait for drain ---
    match dispatcher_handle.await {
        Ok(report) if report.drained => tracing::info!("All active jobs finished"),
        Ok(report) => tracing::warn!(
            abandoned = report.abandoned.len(),
            "Exiting with abandoned jobs"
        ),
        Err(e) => tracing::error!(error = %e, "Dispatcher task failed"),
    }

    stats_cancel.cancel();
    let _ = tokio::time::timeout(STATS_STOP_TIMEOUT, stats_handle).await;
    let _ = signal_handle.await;

    pool.close().await;
    tracing::info!("Worker stopped");
    Ok(())
}
