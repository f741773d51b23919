use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loqa_live::{
    base64_pcm_to_wav, create_router, AppState, Config, LoggingObserver, OutputKind, Persona,
    SessionController, SystemDevices, Transport, WebSocketTransport,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "loqa-live", version, about = "Live voice conversations with a remote speech model")]
struct Cli {
    /// Config file (extension optional; missing file means defaults)
    #[arg(long, global = true, default_value = "config/loqa-live")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Hold one conversation until Ctrl-C
    Talk {
        /// Persona id (default: first configured persona)
        #[arg(long)]
        persona: Option<String>,

        /// Replay a WAV file instead of capturing the microphone
        #[arg(long)]
        input: Option<PathBuf>,

        /// Discard model audio instead of playing it
        #[arg(long)]
        no_playback: bool,
    },

    /// Run the HTTP control API
    Serve,

    /// List configured personas
    Personas,

    /// Convert a base64 PCM dump to a WAV file
    Wav {
        /// File containing base64-encoded 16-bit little-endian PCM
        #[arg(long)]
        input: PathBuf,

        #[arg(long)]
        output: PathBuf,

        #[arg(long, default_value_t = 24000)]
        sample_rate: u32,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    info!("Loqa Live v{}", env!("CARGO_PKG_VERSION"));
    info!("Loaded config: {}", cfg.service.name);

    match cli.command {
        Command::Talk {
            persona,
            input,
            no_playback,
        } => talk(&cfg, persona, input, no_playback).await,
        Command::Serve => serve(&cfg).await,
        Command::Personas => {
            for persona in cfg.persona_catalog().list() {
                println!("{:<16} {:<20} {}", persona.id, persona.name, persona.description);
            }
            Ok(())
        }
        Command::Wav {
            input,
            output,
            sample_rate,
        } => {
            let encoded = std::fs::read_to_string(&input)
                .with_context(|| format!("Failed to read {}", input.display()))?;
            let wav = base64_pcm_to_wav(encoded.trim(), sample_rate)?;
            std::fs::write(&output, &wav)
                .with_context(|| format!("Failed to write {}", output.display()))?;
            info!("Wrote {} ({} bytes, {}Hz)", output.display(), wav.len(), sample_rate);
            Ok(())
        }
    }
}

fn model_transport(cfg: &Config) -> Arc<dyn Transport> {
    let api_key = cfg.api_key();
    if api_key.is_none() {
        warn!("{} is not set; connecting without an API key", cfg.model.api_key_env);
    }
    Arc::new(WebSocketTransport::new(
        cfg.model.endpoint.clone(),
        api_key,
        cfg.model.outbound_queue_depth,
    ))
}

fn pick_persona(cfg: &Config, id: Option<String>) -> Result<Persona> {
    let catalog = cfg.persona_catalog();
    match id {
        Some(id) => catalog
            .get(&id)
            .cloned()
            .with_context(|| format!("Unknown persona: {}", id)),
        None => Ok(catalog.default_persona().clone()),
    }
}

async fn talk(cfg: &Config, persona: Option<String>, input: Option<PathBuf>, no_playback: bool) -> Result<()> {
    let persona = pick_persona(cfg, persona)?;
    let source = cfg.audio_source(input)?;
    let output = if no_playback {
        OutputKind::Virtual
    } else {
        cfg.audio.output
    };

    let mut controller = SessionController::new(
        cfg.session_config(),
        model_transport(cfg),
        Arc::new(SystemDevices::new(source, output)),
        Arc::new(LoggingObserver),
    );

    controller
        .start_session(&persona)
        .await
        .context("Failed to start session")?;
    info!("Talking to {}. Press Ctrl-C to stop.", persona.name);

    let interrupted = tokio::signal::ctrl_c().await;

    let stats = controller.stop_session().await;
    interrupted.context("Failed to listen for Ctrl-C")?;

    if let Some(stats) = stats {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    }
    Ok(())
}

async fn serve(cfg: &Config) -> Result<()> {
    let source = cfg.audio_source(None)?;
    let state = AppState::new(
        cfg.session_config(),
        model_transport(cfg),
        Arc::new(SystemDevices::new(source, cfg.audio.output)),
        cfg.persona_catalog(),
    );

    let addr = format!("{}:{}", cfg.service.http.bind, cfg.service.http.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("HTTP server listening on {}", addr);

    axum::serve(listener, create_router(state.clone()))
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await
        .context("HTTP server failed")?;

    state.controller.lock().await.stop_session().await;
    Ok(())
}
