use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use speechgate::credential::{self, LICENSE_KEY_PHRASE};
use speechgate::{
    CancellationSignal, Config, EngineEvent, EngineFactory, EngineKind, RecognitionEngine, SessionController,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "speechgate")]
#[command(about = "Drive speech recognition sessions against a packaged model")]
struct Args {
    /// Config file (extension optional)
    #[arg(short, long, default_value = "config/speechgate")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Transcribe until the engine stops or Ctrl-C
    Transcribe {
        /// WAV file instead of the microphone
        #[arg(long)]
        wav: Option<PathBuf>,

        /// Engine script, overriding engine.script_path
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Drive an explicit transcriber for a fixed duration
    Listen {
        /// Seconds to listen
        #[arg(short, long, default_value = "10")]
        duration: u64,

        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Wait for the first keyword recognition result
    Recognize {
        #[arg(long)]
        script: Option<PathBuf>,
    },

    /// Encrypt an engine key into a config credential triple
    Seal {
        /// Engine key to encrypt
        #[arg(long)]
        secret: String,

        /// Key phrase; defaults to the license key phrase
        #[arg(long)]
        key_phrase: Option<String>,
    },

    /// Check that the configured credential decrypts
    VerifyCredential,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    if let Command::Seal { secret, key_phrase } = &args.command {
        init_logging("info");
        return seal(secret, key_phrase.as_deref());
    }

    let cfg = Config::load(&args.config)?;
    init_logging(&cfg.log_level);

    info!("speechgate v{}", env!("CARGO_PKG_VERSION"));
    info!("Model: {} ({})", cfg.engine.model_name, cfg.engine.model_path.display());

    match args.command {
        Command::Transcribe { wav, script } => transcribe(&cfg, wav, script).await,
        Command::Listen { duration, script } => listen(&cfg, duration, script).await,
        Command::Recognize { script } => recognize(&cfg, script).await,
        Command::VerifyCredential => {
            cfg.credential_policy()?
                .resolve()
                .context("Credential verification failed")?;
            info!("Credential verified");
            Ok(())
        }
        Command::Seal { secret, key_phrase } => seal(&secret, key_phrase.as_deref()),
    }
}

fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn create_engine(cfg: &Config, script: Option<PathBuf>) -> Result<Arc<dyn RecognitionEngine>> {
    let script = script
        .or_else(|| cfg.engine.script_path.clone())
        .context("No engine script configured (engine.script_path or --script)")?;

    let engine = EngineFactory::create(EngineKind::Scripted(script))?;
    info!("Using {} engine", engine.name());
    Ok(engine)
}

/// Cancellation signal triggered by Ctrl-C
fn ctrl_c_signal() -> CancellationSignal {
    let signal = CancellationSignal::new();
    let trigger = signal.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, cancelling");
            trigger.cancel();
        }
    });
    signal
}

fn print_event(event: &EngineEvent) {
    match event {
        Ok(result) => match result.data() {
            Some(data) => println!("[{}] {}", result.status(), data),
            None => println!("[{}]", result.status()),
        },
        Err(fault) => eprintln!("engine error: {fault}"),
    }
}

async fn transcribe(cfg: &Config, wav: Option<PathBuf>, script: Option<PathBuf>) -> Result<()> {
    let controller = SessionController::new(create_engine(cfg, script)?);

    let mut options = cfg.session_options(ctrl_c_signal())?;
    if let Some(wav) = wav {
        options = options.with_wav_path(wav);
    }

    let (transcription, mut events) = controller.transcribe_stream(options)?;
    while let Some(event) = events.recv().await {
        print_event(&event);
    }

    info!("Transcription {} finished ({:?})", transcription.handle(), transcription.state());
    Ok(())
}

async fn listen(cfg: &Config, duration: u64, script: Option<PathBuf>) -> Result<()> {
    let controller = SessionController::new(create_engine(cfg, script)?);
    let signal = ctrl_c_signal();

    let transcriber = controller.create_transcriber(cfg.session_options(signal.clone())?, |event| {
        print_event(&event)
    })?;
    transcriber.start();

    tokio::select! {
        _ = tokio::time::sleep(Duration::from_secs(duration)) => info!("Listened for {}s", duration),
        _ = signal.cancelled() => info!("Listening cancelled"),
    }

    transcriber.stop();
    let stats = transcriber.stats();
    transcriber.dispose();

    match serde_json::to_string_pretty(&stats) {
        Ok(json) => println!("{json}"),
        Err(e) => warn!("Failed to render stats: {}", e),
    }
    Ok(())
}

async fn recognize(cfg: &Config, script: Option<PathBuf>) -> Result<()> {
    let controller = SessionController::new(create_engine(cfg, script)?);

    let result = controller
        .recognize_once(cfg.recognition_options(ctrl_c_signal()))
        .await?;
    print_event(&Ok(result));
    Ok(())
}

fn seal(secret: &str, key_phrase: Option<&str>) -> Result<()> {
    let triple = credential::seal(secret, key_phrase.unwrap_or(LICENSE_KEY_PHRASE))?;
    let (auth_tag, iv, cipher_text) = triple.to_hex();

    println!("[credential]");
    println!("mode = \"encrypted\"");
    println!("auth_tag = \"{auth_tag}\"");
    println!("iv = \"{iv}\"");
    println!("cipher_text = \"{cipher_text}\"");
    Ok(())
}
