#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::fs;
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{Level as TraceLevel, info, warn};
use tracing_subscriber::FmtSubscriber;

use glyphmark::config::{ConfigPatch, MarkerConfig};
use glyphmark::constants::glyph::MAX_SCALE;
use glyphmark::dom::{Document, Fixture};
use glyphmark::encoder::Encoder;
use glyphmark::renderer::Glyph;
use glyphmark::runtime::{self, HostEvent};
use glyphmark::{MarkerContext, resolver};

#[derive(Parser, Debug)]
#[command(
    name = "glyphmark",
    version,
    about = "Deterministic visual markers for screenshot-driven automation agents"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print the visual code of a label
    Encode { label: String },
    /// Export the marker glyph of a label as PNG
    Render(RenderArgs),
    /// Assign labels to unlabeled interactive elements of a fixture and print them
    Discover { fixture: PathBuf },
    /// Load a fixture and serve the command channel until Ctrl-C
    Serve(ServeArgs),
}

#[derive(Args, Debug)]
struct RenderArgs {
    label: String,
    /// Output PNG path
    #[arg(short, long)]
    output: PathBuf,
    /// Pixel scale of the glyph
    #[arg(long, default_value_t = 8, value_parser = clap::value_parser!(u32).range(1..=MAX_SCALE as i64))]
    scale: u32,
}

#[derive(Args, Debug)]
struct ServeArgs {
    fixture: PathBuf,
    /// Agent port, overrides config file and environment
    #[arg(long)]
    port: Option<u16>,
    /// Label unlabeled interactive elements before serving
    #[arg(long)]
    discover: bool,
}

fn init_logging() -> Result<()> {
    let log_level = match std::env::var("LOG_LEVEL")
        .unwrap_or_else(|_| "info".to_string())
        .to_lowercase()
        .as_str()
    {
        "trace" => TraceLevel::TRACE,
        "debug" => TraceLevel::DEBUG,
        "warn" => TraceLevel::WARN,
        "error" => TraceLevel::ERROR,
        _ => TraceLevel::INFO,
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber).context("Failed to install tracing subscriber")
}

fn load_document(path: &Path) -> Result<Document> {
    let fixture = Fixture::load(path)?;
    Document::from_fixture(&fixture).context(format!("Invalid fixture {}", path.display()))
}

fn encode(label: &str) -> Result<()> {
    let code = Encoder::default().encode(label)?;
    println!("{}", serde_json::to_string(&code)?);
    Ok(())
}

fn render(args: &RenderArgs) -> Result<()> {
    let code = Encoder::default().encode(&args.label)?;
    let png = Glyph::new(code)
        .to_png(args.scale)
        .context("Failed to encode marker PNG")?;
    fs::write(&args.output, png)
        .context(format!("Failed to write {}", args.output.display()))?;
    info!(label = %args.label, code = %code, path = %args.output.display(), "Marker written");
    Ok(())
}

fn discover(path: &Path) -> Result<()> {
    let mut doc = load_document(path)?;
    let config = MarkerConfig::load()?;
    let assigned = resolver::discover(&mut doc, &config.label_attributes)?;
    for assignment in &assigned {
        let tag = doc.get(assignment.node).map(|el| el.tag.as_str()).unwrap_or("?");
        println!("{}\t{}", tag, assignment.label);
    }
    info!(count = assigned.len(), "Discovery complete");
    Ok(())
}

async fn serve(args: &ServeArgs) -> Result<()> {
    let mut doc = load_document(&args.fixture)?;
    let patch = ConfigPatch {
        port: args.port,
        ..ConfigPatch::default()
    };

    let (mut ctx, inbound) = MarkerContext::from_config_file(&MarkerConfig::config_path())?;
    ctx.init(&mut doc, patch);
    if args.discover {
        ctx.discover(&mut doc)?;
    }

    let (host_tx, host_rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => warn!(error = %e, "Failed to listen for Ctrl-C, shutting down"),
        }
        let _ = host_tx.send(HostEvent::Shutdown);
    });

    runtime::run(&mut doc, &mut ctx, inbound, host_rx).await;
    ctx.dispose(&mut doc);
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Encode { label } => encode(&label),
        Commands::Render(args) => render(&args),
        Commands::Discover { fixture } => discover(&fixture),
        Commands::Serve(args) => {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .context("Failed to build tokio runtime")?;
            rt.block_on(serve(&args))
        }
    }
}
