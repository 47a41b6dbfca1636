use std::fs;
use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use imagegate_contracts::chat::render_error_body;
use imagegate_contracts::events::EventWriter;
use imagegate_contracts::images::{ImageMode, ImageRequest};
use imagegate_engine::error::ErrorKind;
use imagegate_engine::{GatewayConfig, ImageGateway, ImageResolver, ReqwestTransport};
use serde_json::{json, Value};
use tokio::runtime::Runtime;
use tracing::debug;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "imagegate", version, about = "Image generation gateway")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Resolve one image reference and describe it.
    Resolve(ResolveArgs),
    /// Run a single image request against a provider.
    Run(RunArgs),
    /// Serve one OpenAI chat-completion body.
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct ResolveArgs {
    #[arg(long)]
    reference: String,
    #[arg(long)]
    out: Option<PathBuf>,
    #[arg(long)]
    allow_private_network: bool,
    #[arg(long)]
    max_bytes: Option<u64>,
    #[arg(long)]
    timeout_secs: Option<u64>,
}

#[derive(Debug, Parser)]
struct RunArgs {
    #[arg(long)]
    provider: String,
    #[arg(long)]
    prompt: String,
    #[arg(long = "image")]
    images: Vec<String>,
    #[arg(long)]
    edit: bool,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    size: Option<String>,
    #[arg(long, default_value_t = 1)]
    n: u32,
    #[arg(long)]
    events: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    /// Path to the JSON body, or `-` for stdin.
    #[arg(long)]
    body: String,
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    events: Option<PathBuf>,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("imagegate error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    init_tracing();
    let runtime = Runtime::new().context("failed to start async runtime")?;
    let config = GatewayConfig::from_env();
    debug!(default_provider = %config.default_provider, "configuration loaded");

    match cli.command {
        Command::Resolve(args) => runtime.block_on(run_resolve(args, config)),
        Command::Run(args) => runtime.block_on(run_image_request(args, config)),
        Command::Chat(args) => runtime.block_on(run_chat(args, config)),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run_resolve(args: ResolveArgs, mut config: GatewayConfig) -> Result<i32> {
    if args.allow_private_network {
        config.allow_private_network = true;
    }
    if let Some(max_bytes) = args.max_bytes.filter(|value| *value > 0) {
        config.max_image_bytes = max_bytes;
    }
    if let Some(secs) = args.timeout_secs.filter(|value| *value > 0) {
        config.request_timeout = Duration::from_secs(secs);
    }

    let resolver = ImageResolver::new(Arc::new(ReqwestTransport::new()?), config.resolve_options());
    let resolved = resolver.resolve(&args.reference).await?;

    let mut summary = json!({
        "source": resolved.source,
        "media_type": resolved.media_type,
        "byte_len": resolved.byte_len,
    });
    if let Some(out) = args.out.as_ref() {
        if let Some(parent) = out.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        fs::write(out, &resolved.bytes)
            .with_context(|| format!("failed to write {}", out.display()))?;
        summary["out"] = json!(out.to_string_lossy());
    }
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(0)
}

async fn run_image_request(args: RunArgs, config: GatewayConfig) -> Result<i32> {
    let gateway = ImageGateway::from_config(config, event_writer(args.events))?;
    let mut request = ImageRequest::new(args.prompt);
    request.mode = if args.edit {
        ImageMode::Edit
    } else {
        ImageMode::Generate
    };
    request.provider = Some(args.provider);
    request.model = args.model;
    request.size = args.size;
    request.n = args.n.max(1);
    request.images = args.images;

    let response = gateway.handle(&request).await?;
    println!("{}", serde_json::to_string_pretty(&response)?);
    Ok(0)
}

async fn run_chat(args: ChatArgs, config: GatewayConfig) -> Result<i32> {
    let raw = read_body(&args.body)?;
    let body: Value = match serde_json::from_str(&raw) {
        Ok(body) => body,
        Err(err) => {
            let envelope = render_error_body(
                ErrorKind::InvalidRequest.code(),
                &format!("request body is not valid JSON: {err}"),
            );
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            return Ok(1);
        }
    };

    let gateway = ImageGateway::from_config(config, event_writer(args.events))?;
    match gateway
        .chat_completion(&body, args.provider.as_deref())
        .await
    {
        Ok(completion) => {
            println!("{}", serde_json::to_string_pretty(&completion)?);
            Ok(0)
        }
        Err(err) => {
            let envelope = render_error_body(err.kind().code(), &err.to_string());
            println!("{}", serde_json::to_string_pretty(&envelope)?);
            Ok(1)
        }
    }
}

fn read_body(source: &str) -> Result<String> {
    if source == "-" {
        let mut raw = String::new();
        io::stdin()
            .read_to_string(&mut raw)
            .context("failed to read request body from stdin")?;
        return Ok(raw);
    }
    fs::read_to_string(source).with_context(|| format!("failed to read {source}"))
}

fn event_writer(path: Option<PathBuf>) -> Option<EventWriter> {
    path.map(|path| EventWriter::new(path, Uuid::new_v4().to_string()))
}
