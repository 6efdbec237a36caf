use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, bail};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use clap::{Parser, Subcommand};
use tokio::signal;
use tokio::sync::{mpsc, watch};
use tracing_subscriber::EnvFilter;

use resync_core::app::{
    ConnectivityMonitor, GenerationClient, OperationPoller, PollProgress, RequestExecutor,
    SubmitOutcome, Submitter, SyncEngine, SyncOutcome, SyncRuntime, cancel_pair,
};
use resync_core::config::Config;
use resync_core::domain::{
    ArtifactId, ArtifactPayload, ArtifactRecord, AspectRatio, EditParams, ExtendParams,
    GenerationRequest, ImageParams, MediaInput, ScriptParams, ScriptPlatform, VideoAspectRatio,
    VideoParams, VideoResolution,
};
use resync_core::impls::{
    EnvCredentials, FileBackend, HttpGenerationService, ScriptedService, TcpProbe,
};
use resync_core::ports::{ConnectivityEvent, GenerationService, SystemClock, UlidGenerator};
use resync_core::store::{Store, StoreHandle};

#[derive(Parser)]
#[command(name = "resync")]
#[command(version)]
#[command(about = "Offline-resilient generation queue")]
struct Cli {
    /// Treat the network as down: submissions go to the sync queue.
    #[arg(long, global = true)]
    offline: bool,

    /// Use the in-process scripted service instead of the remote API.
    #[arg(long, global = true)]
    simulate: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate now, or queue the request when offline.
    Submit {
        #[command(subcommand)]
        request: SubmitCommand,

        /// Write the decoded media (or script text) here.
        #[arg(long, global = true)]
        output: Option<PathBuf>,
    },
    /// All artifacts, oldest first.
    List,
    /// Requests waiting for a sync pass.
    Queue,
    /// Requests that were given up on.
    DeadLetters,
    /// Run one sync pass now.
    Sync,
    /// Give up on a queued request.
    Abandon {
        id: ArtifactId,
        #[arg(long, default_value = "abandoned by user")]
        reason: String,
    },
    /// Put a dead letter back in the queue.
    Resurrect { id: ArtifactId },
    /// Store counts as JSON.
    Stats,
    /// Follow connectivity and sync on every recovery until Ctrl+C.
    Watch,
}

#[derive(Subcommand)]
enum SubmitCommand {
    Image {
        prompt: String,
        #[arg(long, default_value = "1:1")]
        aspect_ratio: AspectRatio,
    },
    Edit {
        prompt: String,
        #[arg(long)]
        image: PathBuf,
    },
    Video {
        prompt: String,
        /// Optional starting frame.
        #[arg(long)]
        image: Option<PathBuf>,
        #[arg(long, default_value = "16:9")]
        aspect_ratio: VideoAspectRatio,
        #[arg(long, default_value = "720p")]
        resolution: VideoResolution,
    },
    Extend {
        prompt: String,
        /// Source URI of a previously generated video.
        #[arg(long)]
        video_uri: String,
        #[arg(long, default_value = "16:9")]
        aspect_ratio: VideoAspectRatio,
        #[arg(long, default_value = "720p")]
        resolution: VideoResolution,
    },
    Script {
        topic: String,
        #[arg(long, default_value = "tiktok")]
        platform: ScriptPlatform,
    },
}

#[derive(Clone, Copy)]
struct Mode {
    offline: bool,
    simulate: bool,
}

struct App {
    store: Arc<Store>,
    monitor: Arc<ConnectivityMonitor>,
    submitter: Submitter,
    engine: Arc<SyncEngine>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    let config = Config::from_env().context("failed to load configuration")?;

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level)),
        )
        .init();

    let Cli {
        offline,
        simulate,
        command,
    } = Cli::parse();
    let mode = Mode { offline, simulate };
    let app = build(mode, &config).await?;

    match command {
        Command::Submit { request, output } => {
            let request = to_request(request).await?;
            submit(&app, request, output.as_deref()).await?;
        }
        Command::List => {
            for record in app.store.artifacts_by_time().await? {
                print_artifact(&record);
            }
        }
        Command::Queue => {
            for record in app.store.requests_by_time().await? {
                println!(
                    "{}  {:<15} retries={}  {}  {}",
                    record.id,
                    record.request_type(),
                    record.retry_count,
                    record.created_at.to_rfc3339(),
                    record.request.prompt_text()
                );
            }
        }
        Command::DeadLetters => {
            for dead in app.store.dead_letters().await? {
                println!(
                    "{}  {:<15} {}",
                    dead.id(),
                    dead.record.request_type(),
                    dead.reason
                );
            }
        }
        Command::Sync => match app.engine.process_sync_queue().await? {
            SyncOutcome::Completed(report) => {
                println!("{}", serde_json::to_string_pretty(&report)?)
            }
            SyncOutcome::Skipped => println!("a sync pass is already running"),
        },
        Command::Abandon { id, reason } => {
            print_artifact(&app.engine.abandon(id, reason).await?);
        }
        Command::Resurrect { id } => {
            let record = app.engine.resurrect(id).await?;
            println!("{} re-queued", record.id);
        }
        Command::Stats => {
            println!("{}", serde_json::to_string_pretty(&app.store.counts().await?)?);
        }
        Command::Watch => watch_connectivity(app, mode, &config).await,
    }

    Ok(())
}

async fn build(mode: Mode, config: &Config) -> anyhow::Result<App> {
    let mut backend = FileBackend::new(config.store_path.clone());
    if let Some(quota) = config.store_quota() {
        backend = backend.with_quota(quota);
    }
    let store = StoreHandle::new(Arc::new(backend))
        .store()
        .await
        .with_context(|| format!("failed to open store at {}", config.store_path.display()))?;

    let service: Arc<dyn GenerationService> = if mode.simulate {
        Arc::new(ScriptedService::new())
    } else {
        Arc::new(HttpGenerationService::new(
            config.api_base_url.clone(),
            config.request_timeout,
        )?)
    };
    let client = Arc::new(
        GenerationClient::new(service, Arc::new(EnvCredentials), config.retry.clone())
            .with_service_id(config.service_id.clone()),
    );
    let poller = Arc::new(OperationPoller::new(Arc::clone(&client), config.poll_interval));

    let initially_online = if mode.offline {
        false
    } else if mode.simulate {
        true
    } else {
        probe(config).is_reachable().await
    };
    let monitor = Arc::new(ConnectivityMonitor::new(initially_online, config.recovery_window));
    tracing::debug!(online = initially_online, "initial connectivity");

    let executor = Arc::new(RequestExecutor::new(client, poller, Arc::clone(&monitor)));
    let ids = Arc::new(UlidGenerator::new(SystemClock));
    let submitter = Submitter::new(
        Arc::clone(&store),
        Arc::clone(&executor),
        Arc::new(SystemClock),
        ids.clone(),
    );
    let engine = Arc::new(
        SyncEngine::new(Arc::clone(&store), executor, ids)
            .with_retry_budget(config.sync_retry_budget),
    );

    Ok(App {
        store,
        monitor,
        submitter,
        engine,
    })
}

fn probe(config: &Config) -> TcpProbe {
    TcpProbe::new(
        config.probe_target.clone(),
        config.probe_interval,
        config.probe_interval.min(std::time::Duration::from_secs(3)),
    )
}

async fn submit(app: &App, request: GenerationRequest, output: Option<&Path>) -> anyhow::Result<()> {
    let (cancel, token) = cancel_pair();
    let progress = |p: PollProgress| tracing::info!("{}", p.message());

    let outcome = tokio::select! {
        outcome = app.submitter.submit_with_progress(request, &progress, &token) => outcome?,
        _ = signal::ctrl_c() => {
            cancel.cancel();
            bail!("interrupted");
        }
    };

    match outcome {
        SubmitOutcome::Queued(record) => {
            print_artifact(&record);
            println!("offline: queued for the next sync pass");
        }
        SubmitOutcome::Completed(record) => {
            print_artifact(&record);
            if let (Some(path), Some(payload)) = (output, record.payload.as_ref()) {
                write_payload(path, payload).await?;
                println!("wrote {}", path.display());
            }
        }
    }
    Ok(())
}

async fn watch_connectivity(app: App, mode: Mode, config: &Config) {
    let (events_tx, events_rx) = mpsc::channel(16);
    let (probe_shutdown_tx, probe_shutdown_rx) = watch::channel(false);

    let probe_task = if mode.offline || mode.simulate {
        None
    } else {
        Some(probe(config).spawn(events_tx.clone(), probe_shutdown_rx))
    };
    if mode.simulate {
        let _ = events_tx.send(ConnectivityEvent::Online).await;
    }

    tracing::info!(online = app.monitor.is_online(), "watching connectivity");
    let runtime = SyncRuntime::spawn(app.monitor, app.engine, events_rx);

    shutdown_signal().await;

    let _ = probe_shutdown_tx.send(true);
    if let Some(task) = probe_task {
        let _ = task.await;
    }
    runtime.shutdown_and_join().await;
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "failed to listen for Ctrl+C");
        return;
    }
    tracing::info!("shutdown signal received");
}

async fn to_request(command: SubmitCommand) -> anyhow::Result<GenerationRequest> {
    Ok(match command {
        SubmitCommand::Image {
            prompt,
            aspect_ratio,
        } => GenerationRequest::GenerateImage(ImageParams {
            prompt,
            aspect_ratio,
        }),
        SubmitCommand::Edit { prompt, image } => GenerationRequest::EditImage(EditParams {
            prompt,
            image: read_media(&image).await?,
        }),
        SubmitCommand::Video {
            prompt,
            image,
            aspect_ratio,
            resolution,
        } => {
            let image = match image {
                Some(path) => Some(read_media(&path).await?),
                None => None,
            };
            GenerationRequest::GenerateVideo(VideoParams {
                prompt,
                image,
                aspect_ratio,
                resolution,
            })
        }
        SubmitCommand::Extend {
            prompt,
            video_uri,
            aspect_ratio,
            resolution,
        } => GenerationRequest::ExtendVideo(ExtendParams {
            prompt,
            video_uri,
            aspect_ratio,
            resolution,
        }),
        SubmitCommand::Script { topic, platform } => {
            GenerationRequest::GenerateScript(ScriptParams { topic, platform })
        }
    })
}

async fn read_media(path: &Path) -> anyhow::Result<MediaInput> {
    let bytes = tokio::fs::read(path)
        .await
        .with_context(|| format!("failed to read {}", path.display()))?;
    let mime_type = match path.extension().and_then(|e| e.to_str()).map(str::to_ascii_lowercase) {
        Some(ext) if ext == "png" => "image/png",
        Some(ext) if ext == "jpg" || ext == "jpeg" => "image/jpeg",
        Some(ext) if ext == "webp" => "image/webp",
        _ => bail!("unsupported image type: {}", path.display()),
    };
    Ok(MediaInput {
        data_base64: STANDARD.encode(bytes),
        mime_type: mime_type.to_string(),
    })
}

async fn write_payload(path: &Path, payload: &ArtifactPayload) -> anyhow::Result<()> {
    let bytes = match payload {
        ArtifactPayload::Image { data_base64, .. } | ArtifactPayload::Video { data_base64, .. } => {
            STANDARD.decode(data_base64).context("payload is not valid base64")?
        }
        ArtifactPayload::Script { text } => text.clone().into_bytes(),
    };
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

fn print_artifact(record: &ArtifactRecord) {
    println!(
        "{}  {:<9} {:<6} {}",
        record.id, record.status, record.kind, record.prompt_text
    );
    if let Some(message) = &record.error_message {
        println!("    error: {message}");
    }
    if let Some(ArtifactPayload::Script { text }) = &record.payload {
        println!("{text}");
    }
}
