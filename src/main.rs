use std::io::Read;
use std::sync::Arc;

use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, fmt};

use mail_agent::agent::{CodingAgent, ProcessAgent};
use mail_agent::config::{QueueConfig, SmtpConfig, WorkerConfig};
use mail_agent::context::AppContext;
use mail_agent::git::{GitCli, PullRequestHost};
use mail_agent::jobs::{EmailJob, spawn_retry_promoter};
use mail_agent::mailer::{LogMailer, Mailer, SmtpMailer};
use mail_agent::store::{Database, LibSqlBackend};
use mail_agent::worker::spawn_worker;

const USAGE: &str = "\
usage: mail-agent [command]

commands:
  run                 process jobs until interrupted (default)
  enqueue             read one job as JSON from stdin and queue it
  stats               print queue sizes
  dead-letters [n]    list the most recent dead letters
  requeue <job-id>    move a dead letter back to pending";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Install rustls crypto provider before any TLS usage
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| "Failed to install rustls crypto provider")?;

    let _log_guard = init_tracing();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let command = args.first().map(String::as_str).unwrap_or("run");

    let queue_config = QueueConfig::from_env()?;
    let worker_config = WorkerConfig::from_env()?;

    // ── Database ─────────────────────────────────────────────────────────
    let db: Arc<dyn Database> = Arc::new(LibSqlBackend::new_local(&queue_config.db_path).await?);

    // ── Collaborators ────────────────────────────────────────────────────
    let agent: Arc<dyn CodingAgent> = Arc::new(ProcessAgent::new(&worker_config.agent_command));
    let git: Arc<dyn PullRequestHost> = Arc::new(GitCli::new(&worker_config.base_branch));
    let mailer: Arc<dyn Mailer> = match SmtpConfig::from_env()? {
        Some(smtp) => Arc::new(SmtpMailer::new(&smtp)?),
        None => Arc::new(LogMailer),
    };

    let ctx = AppContext::new(db, agent, git, mailer, queue_config, worker_config);

    match command {
        "run" => run(ctx).await,
        "enqueue" => {
            let mut payload = String::new();
            std::io::stdin().read_to_string(&mut payload)?;
            let job = EmailJob::from_payload(&payload)?;
            ctx.queue.enqueue(&job).await?;
            println!("{}", job.id);
            Ok(())
        }
        "stats" => {
            let stats = ctx.queue.stats().await?;
            println!(
                "pending: {}\nretry:   {}\ndead:    {}",
                stats.pending, stats.retry, stats.dead
            );
            Ok(())
        }
        "dead-letters" => {
            let limit = match args.get(1) {
                Some(n) => n.parse::<usize>()?,
                None => 20,
            };
            for dead in ctx.queue.list_dead_letters(limit).await? {
                println!(
                    "{}  {}  {}",
                    dead.job_id,
                    dead.failed_at.to_rfc3339(),
                    dead.last_error
                );
            }
            Ok(())
        }
        "requeue" => {
            let id = args.get(1).ok_or(USAGE)?.parse::<uuid::Uuid>()?;
            let job = ctx.queue.requeue_dead_letter(id).await?;
            println!("requeued {} (session {})", job.id, job.session_id);
            Ok(())
        }
        _ => {
            eprintln!("{USAGE}");
            std::process::exit(2);
        }
    }
}

async fn run(ctx: AppContext) -> Result<(), Box<dyn std::error::Error>> {
    eprintln!("📬 mail-agent v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Database: {}", ctx.queue_config.db_path.display());
    eprintln!("   Queues: {}:{{pending,retry,dead}}", ctx.queue_config.prefix);
    eprintln!("   Projects: {}", ctx.worker_config.projects_dir.display());
    eprintln!("   Agent: {}", ctx.worker_config.agent_command);

    let (promoter, promoter_stop) =
        spawn_retry_promoter(Arc::clone(&ctx.queue), ctx.queue_config.promote_interval);
    let (worker, worker_stop) = spawn_worker(&ctx);

    shutdown_signal().await;
    tracing::info!("Shutdown requested, finishing in-flight job");

    worker_stop.store(true, std::sync::atomic::Ordering::Relaxed);
    promoter_stop.store(true, std::sync::atomic::Ordering::Relaxed);
    worker.await?;
    promoter.await?;

    tracing::info!("Stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on unix.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

/// Console logging filtered by `RUST_LOG` (default `info`), plus a daily
/// rolling file under `MAIL_AGENT_LOG_DIR` when set. The returned guard
/// flushes the file writer on drop.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match std::env::var("MAIL_AGENT_LOG_DIR") {
        Ok(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "mail-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        Err(_) => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
