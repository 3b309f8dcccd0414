use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use chrono::Utc;
use tracing::{debug, error, info};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

use dt_core::channels::{EmailConfig, EmailTransport};
use dt_core::config::AppConfig;
use dt_core::llm::{GenerationInvoker, LlamaCli};
use dt_core::pipeline::RequestProcessor;
use dt_core::pipeline::types::{Request, local_request_id};
use dt_core::resources::ResourceGate;
use dt_core::store::StateStore;
use dt_core::web::HttpSiteFetcher;
use dt_core::workspace::{LessonRecorder, Workspace};

/// What the binary was asked to do.
enum Mode {
    /// Poll forever.
    Run,
    /// One polling cycle.
    Once,
    /// Answer a question locally and print it.
    Ask(String),
}

impl Mode {
    fn from_args(args: &[String]) -> anyhow::Result<Self> {
        match args.first().map(String::as_str) {
            None | Some("run") => Ok(Self::Run),
            Some("once") => Ok(Self::Once),
            Some("ask") => {
                let question = args[1..].join(" ");
                anyhow::ensure!(!question.trim().is_empty(), "usage: dt-core ask <question...>");
                Ok(Self::Ask(question))
            }
            Some(other) => anyhow::bail!("unknown mode '{other}' (expected run, once or ask)"),
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before any TLS usage
    let _ = rustls::crypto::ring::default_provider().install_default();

    let config = AppConfig::from_env().context("reading configuration")?;
    let _log_guard = init_tracing(config.log_dir.as_deref());

    let args: Vec<String> = std::env::args().skip(1).collect();
    let mode = Mode::from_args(&args)?;

    let processor = build_processor(&config)?;

    match mode {
        Mode::Ask(question) => {
            let request = Request::new(local_request_id(Utc::now()), question);
            let answer = processor.answer(&request).await;
            debug!(source = answer.source.label(), "Local answer ready");
            println!("=== ANSWER START ===");
            println!("{}", answer.text);
            println!("=== ANSWER END ===");
        }
        Mode::Once => {
            let transport = email_transport()?;
            let report = processor
                .run_cycle(&transport)
                .await
                .context("polling cycle failed")?;
            info!(?report, "Cycle finished");
        }
        Mode::Run => {
            let transport = email_transport()?;
            info!(
                version = env!("CARGO_PKG_VERSION"),
                poll_secs = config.poll_interval.as_secs(),
                state_dir = %config.state_dir.display(),
                "dt-core polling started"
            );
            loop {
                match processor.run_cycle(&transport).await {
                    Ok(report) => debug!(?report, "Cycle finished"),
                    Err(e) => error!(error = %e, "Cycle failed, retrying next poll"),
                }
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = tokio::signal::ctrl_c() => {
                        info!("Shutting down");
                        break;
                    }
                }
            }
        }
    }

    Ok(())
}

/// Console logging, plus a daily log file when `log_dir` is set.
fn init_tracing(log_dir: Option<&Path>) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "dt-core.log"));
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact().with_target(false))
        .with(file_layer)
        .init();

    guard
}

fn email_transport() -> anyhow::Result<EmailTransport> {
    let config = EmailConfig::from_env().context("email transport is not configured")?;
    Ok(EmailTransport::new(config))
}

fn build_processor(config: &AppConfig) -> anyhow::Result<RequestProcessor> {
    let llama = LlamaCli::new(config.llama_bin.clone(), config.model_path.clone())
        .with_temperature(config.llama_temperature);
    let invoker = GenerationInvoker::new(Arc::new(llama), ResourceGate::new(config.gate.clone()));

    let store = StateStore::new(config.state_dir.clone());
    let workspace = Arc::new(Workspace::new(config.memory_dir.clone(), store.lessons_path()));

    let fetcher = HttpSiteFetcher::new().context("building HTTP client")?;

    Ok(RequestProcessor::new(
        invoker,
        Arc::clone(&workspace),
        workspace as Arc<dyn LessonRecorder>,
        Arc::new(fetcher),
        store,
    )
    .with_min_send_interval(config.min_send_interval)
    .with_answer_marker(config.answer_marker.clone()))
}
