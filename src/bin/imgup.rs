//! CLI binary for folio-imgup.
//!
//! A thin shim over the library crate that maps CLI flags
//! to `PipelineConfig` / `ProcessRequest` and prints results.

use anyhow::{Context, Result};
use clap::Parser;
use folio_imgup::pipeline::encode::encode_webp;
use folio_imgup::pipeline::hash::decode_placeholder;
use folio_imgup::pipeline::transform::surface_size;
use folio_imgup::{
    decode_to_data_url, inspect, process, Acl, ContentDisposition, CropRegion, PerceptualHash,
    PipelineConfig, PipelineObserver, ProcessRequest, SourceFile, Stage, TransformParams,
    UserNotice,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn yellow(s: &str) -> String {
    format!("\x1b[33m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}

// ── CLI observer using indicatif ─────────────────────────────────────────────

/// Spinner plus one log line per finished stage.
struct CliObserver {
    bar: ProgressBar,
}

impl CliObserver {
    fn new() -> Arc<Self> {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"]);
        bar.set_style(style);
        bar.set_prefix("imgup");
        bar.set_message("Reading image…");
        bar.enable_steady_tick(Duration::from_millis(80));
        Arc::new(Self { bar })
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }
}

impl PipelineObserver for CliObserver {
    fn on_stage_start(&self, stage: Stage) {
        self.bar.set_message(format!("{stage}…"));
    }

    fn on_stage_complete(&self, stage: Stage, elapsed_ms: u64) {
        self.bar.println(format!(
            "  {} {:<10} {}",
            green("✓"),
            stage,
            dim(&format!("{elapsed_ms}ms"))
        ));
    }

    fn on_failure(&self, stage: Stage, notice: &UserNotice) {
        self.bar.println(format!(
            "  {} {:<10} {}: {}",
            red("✗"),
            stage,
            red(notice.title),
            notice.description
        ));
    }

    fn on_hash_failure(&self, notice: &UserNotice) {
        self.bar.println(format!(
            "  {} {:<10} {}: {}",
            yellow("⚠"),
            Stage::Hash,
            yellow(notice.title),
            notice.description
        ));
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # Rotate, crop and upload
  imgup --endpoint https://api.example.com/image --rotate 90 --crop 0,0,1080,1080 photo.jpg

  # Cropper-style square crop at 1.5× zoom, no upload, keep the payload
  imgup --aspect 1:1 --zoom 1.5 --no-upload -o square.webp photo.jpg

  # Size, type, dimensions and blurhash only
  imgup --inspect-only photo.jpg

  # Turn a stored blurhash back into a data URL placeholder
  imgup --decode-hash 'LEHV6nWB2yk8pyo0adR*.7kCMdnj'

ENVIRONMENT VARIABLES:
  IMGUP_ENDPOINT   Base URL of the upload-authorization service
  RUST_LOG         Overrides the log filter (e.g. folio_imgup=debug)
"#;

/// Crop, rotate, blurhash and upload portfolio images.
#[derive(Parser, Debug)]
#[command(
    name = "imgup",
    version,
    about = "Crop, rotate, blurhash and upload portfolio images",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Image file to process (PNG, JPEG or WebP).
    #[arg(required_unless_present = "decode_hash")]
    input: Option<PathBuf>,

    /// Base URL of the upload-authorization service.
    #[arg(long, env = "IMGUP_ENDPOINT")]
    endpoint: Option<String>,

    /// Clockwise rotation in degrees.
    #[arg(long, env = "IMGUP_ROTATE", default_value_t = 0.0, allow_hyphen_values = true)]
    rotate: f64,

    /// Mirror left to right (applied before rotation).
    #[arg(long)]
    flip_h: bool,

    /// Mirror top to bottom (applied before rotation).
    #[arg(long)]
    flip_v: bool,

    /// Crop rectangle on the rotated image: x,y,width,height.
    #[arg(long, conflicts_with = "aspect")]
    crop: Option<String>,

    /// Centred crop with this aspect ratio (e.g. 16:9, 1:1, 1.5).
    #[arg(long)]
    aspect: Option<String>,

    /// Cropper zoom (≥ 1); shrinks the --aspect crop around the centre.
    #[arg(long, default_value_t = 1.0)]
    zoom: f64,

    /// Name the payload is derived from (defaults to the input file name).
    #[arg(long)]
    name: Option<String>,

    /// Blurhash components along X (1–9).
    #[arg(long, env = "IMGUP_COMPONENTS_X", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=9))]
    components_x: u32,

    /// Blurhash components along Y (1–9).
    #[arg(long, env = "IMGUP_COMPONENTS_Y", default_value_t = 4,
          value_parser = clap::value_parser!(u32).range(1..=9))]
    components_y: u32,

    /// Largest accepted input file in bytes.
    #[arg(long, env = "IMGUP_MAX_BYTES", default_value_t = folio_imgup::config::DEFAULT_MAX_INPUT_BYTES)]
    max_bytes: u64,

    /// Access control for the stored object.
    #[arg(long, env = "IMGUP_ACL", value_enum)]
    acl: Option<AclArg>,

    /// How storage should serve the object.
    #[arg(long, env = "IMGUP_CONTENT_DISPOSITION", value_enum)]
    content_disposition: Option<DispositionArg>,

    /// Correlation id forwarded with the upload.
    #[arg(long)]
    custom_id: Option<String>,

    /// Per-request timeout for each upload phase, in seconds.
    #[arg(long, env = "IMGUP_TIMEOUT", default_value_t = 60)]
    timeout: u64,

    /// Write the encoded WebP payload to this file.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Write the decoded blurhash placeholder (WebP) to this file.
    #[arg(long)]
    placeholder: Option<PathBuf>,

    /// Placeholder size as WIDTHxHEIGHT.
    #[arg(long, default_value = "32x32")]
    placeholder_size: String,

    /// Stop after hashing; nothing is sent over the network.
    #[arg(long)]
    no_upload: bool,

    /// Print file metadata and blurhash only.
    #[arg(long)]
    inspect_only: bool,

    /// Decode a blurhash to a data URL and exit.
    #[arg(long)]
    decode_hash: Option<String>,

    /// Print a JSON summary instead of text.
    #[arg(long, env = "IMGUP_JSON")]
    json: bool,

    /// Disable the progress spinner.
    #[arg(long, env = "IMGUP_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "IMGUP_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "IMGUP_QUIET")]
    quiet: bool,
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum AclArg {
    PublicRead,
    Private,
}

impl From<AclArg> for Acl {
    fn from(v: AclArg) -> Self {
        match v {
            AclArg::PublicRead => Acl::PublicRead,
            AclArg::Private => Acl::Private,
        }
    }
}

#[derive(clap::ValueEnum, Clone, Copy, Debug)]
enum DispositionArg {
    Inline,
    Attachment,
}

impl From<DispositionArg> for ContentDisposition {
    fn from(v: DispositionArg) -> Self {
        match v {
            DispositionArg::Inline => ContentDisposition::Inline,
            DispositionArg::Attachment => ContentDisposition::Attachment,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    // The spinner already reports every stage, so library INFO logs are
    // suppressed while it is shown.
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let (pw, ph) = parse_size(&cli.placeholder_size)?;

    // ── Decode-only mode ─────────────────────────────────────────────────
    if let Some(ref hash) = cli.decode_hash {
        let url = decode_to_data_url(hash, pw, ph).context("Failed to decode blurhash")?;
        println!("{url}");
        return Ok(());
    }

    let input = cli
        .input
        .clone()
        .context("An input file is required")?;

    // ── Inspect-only mode ────────────────────────────────────────────────
    if cli.inspect_only {
        let meta = inspect(&input).await.context("Failed to inspect image")?;
        if cli.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&meta).context("Failed to serialise metadata")?
            );
        } else {
            println!("File:         {}", meta.name);
            println!("Type:         {}", meta.mime_type);
            println!("Size:         {} bytes", meta.bytes);
            println!("Dimensions:   {}x{}", meta.width, meta.height);
            println!("Blurhash:     {}", meta.hash.as_deref().unwrap_or("-"));
        }
        return Ok(());
    }

    // ── Build config ─────────────────────────────────────────────────────
    let observer = if show_progress {
        Some(CliObserver::new())
    } else {
        None
    };
    let config = build_config(&cli, pw, ph, observer.clone())?;

    let source = SourceFile::from_path(&input)
        .await
        .with_context(|| format!("Failed to read {}", input.display()))?;
    let request = build_request(&cli, &source, &config).await?;

    // Ctrl-C cancels whichever stage is running.
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_signal.cancel();
        }
    });

    // ── Run pipeline ─────────────────────────────────────────────────────
    let result = process(&source, &request, &config, &cancel).await;
    if let Some(ref obs) = observer {
        obs.finish();
    }
    let output = match result {
        Ok(output) => output,
        Err(e) if e.is_cancelled() => {
            if !cli.quiet {
                eprintln!("{}", dim("Cancelled."));
            }
            std::process::exit(130);
        }
        Err(e) => {
            if let Some(notice) = e.notice() {
                eprintln!("{} {}", red("✘"), bold(notice.title));
            }
            return Err(anyhow::Error::new(e).context("Image pipeline failed"));
        }
    };

    if let Some(ref path) = cli.output {
        tokio::fs::write(path, output.payload.bytes())
            .await
            .with_context(|| format!("Failed to write payload to {}", path.display()))?;
    }
    if let (Some(path), Some(hash)) = (&cli.placeholder, &output.hash) {
        write_placeholder(hash, &config, path).await?;
    }

    // ── Report ───────────────────────────────────────────────────────────
    if cli.json {
        let summary = serde_json::json!({
            "file_url": output.file_url,
            "hash": output.hash.as_ref().map(|h| h.as_str()),
            "hash_error": output.hash_error.as_ref().map(|e| e.to_string()),
            "file_name": output.payload.name(),
            "mime_type": output.payload.mime_type(),
            "width": output.width,
            "height": output.height,
            "stats": output.stats,
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&summary).context("Failed to serialise output")?
        );
    } else {
        if let Some(ref url) = output.file_url {
            println!("{url}");
        }
        if let Some(ref hash) = output.hash {
            println!("{hash}");
        }
        if !cli.quiet {
            eprintln!(
                "{}  {}  {}x{}  {} bytes  {}ms",
                green("✔"),
                bold(output.payload.name()),
                output.width,
                output.height,
                output.stats.payload_bytes,
                output.stats.total_ms
            );
        }
    }

    Ok(())
}

/// Map CLI args to `PipelineConfig`.
fn build_config(
    cli: &Cli,
    placeholder_w: u32,
    placeholder_h: u32,
    observer: Option<Arc<CliObserver>>,
) -> Result<PipelineConfig> {
    let mut builder = PipelineConfig::builder()
        .max_input_bytes(cli.max_bytes)
        .hash_components(cli.components_x, cli.components_y)
        .placeholder_size(placeholder_w, placeholder_h)
        .request_timeout_secs(cli.timeout);

    if let Some(ref endpoint) = cli.endpoint {
        builder = builder.endpoint(endpoint.as_str());
    }
    if let Some(acl) = cli.acl {
        builder = builder.acl(acl.into());
    }
    if let Some(cd) = cli.content_disposition {
        builder = builder.content_disposition(cd.into());
    }
    if let Some(ref id) = cli.custom_id {
        builder = builder.custom_id(id.as_str());
    }
    if let Some(obs) = observer {
        builder = builder.observer(obs);
    }

    builder.build().context("Invalid configuration")
}

/// Map crop/rotation flags to a `ProcessRequest`.
///
/// `--aspect` needs the rotated surface size, so the source is decoded once
/// up front in that case.
async fn build_request(
    cli: &Cli,
    source: &SourceFile,
    config: &PipelineConfig,
) -> Result<ProcessRequest> {
    let params = TransformParams::rotated(cli.rotate)
        .with_flip(cli.flip_h, cli.flip_v)
        .with_zoom(cli.zoom);
    params.validate().context("Invalid transform")?;

    let mut request = ProcessRequest::default().with_params(params);
    if cli.no_upload {
        request = request.without_upload();
    }
    if let Some(ref name) = cli.name {
        request = request.named(name.as_str());
    }

    if let Some(ref crop) = cli.crop {
        request = request.with_crop(parse_crop(crop)?);
    } else if cli.aspect.is_some() || cli.zoom > 1.0 {
        source
            .ensure_within(config.max_input_bytes)
            .context("Input rejected")?;
        let raster = folio_imgup::load_raster(source, config)
            .await
            .context("Failed to decode image")?;
        let bounding = surface_size(raster.width(), raster.height(), params.rotation_degrees);
        let aspect = match cli.aspect {
            Some(ref a) => parse_aspect(a)?,
            None => bounding.0 as f64 / bounding.1.max(1) as f64,
        };
        let crop = CropRegion::for_zoom(bounding, aspect, cli.zoom).context("Invalid crop")?;
        request = request.with_crop(crop);
    }
    Ok(request)
}

async fn write_placeholder(
    hash: &PerceptualHash,
    config: &PipelineConfig,
    path: &Path,
) -> Result<()> {
    let placeholder = decode_placeholder(hash, config).context("Failed to decode placeholder")?;
    let (bytes, _) = encode_webp(&placeholder).context("Failed to encode placeholder")?;
    tokio::fs::write(path, bytes)
        .await
        .with_context(|| format!("Failed to write placeholder to {}", path.display()))
}

/// Parse `--crop x,y,width,height`.
fn parse_crop(s: &str) -> Result<CropRegion> {
    let parts: Vec<u32> = s
        .split(',')
        .map(|p| {
            p.trim()
                .parse::<u32>()
                .context(format!("Invalid crop value: '{}'", p.trim()))
        })
        .collect::<Result<Vec<_>>>()?;
    match parts.as_slice() {
        &[x, y, w, h] => Ok(CropRegion::new(x, y, w, h)),
        _ => anyhow::bail!("--crop expects x,y,width,height (got '{}')", s),
    }
}

/// Parse `--aspect` as `W:H` or a plain ratio.
fn parse_aspect(s: &str) -> Result<f64> {
    let ratio = match s.split_once(':') {
        Some((w, h)) => {
            let w: f64 = w.trim().parse().context("Invalid aspect width")?;
            let h: f64 = h.trim().parse().context("Invalid aspect height")?;
            w / h
        }
        None => s.trim().parse().context("Invalid aspect ratio")?,
    };
    if !ratio.is_finite() || ratio <= 0.0 {
        anyhow::bail!("Aspect ratio must be positive (got '{}')", s);
    }
    Ok(ratio)
}

/// Parse `WIDTHxHEIGHT`.
fn parse_size(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s
        .to_lowercase()
        .split_once('x')
        .map(|(w, h)| (w.trim().to_string(), h.trim().to_string()))
        .context(format!("Size must be WIDTHxHEIGHT (got '{}')", s))?;
    let w: u32 = w.parse().context("Invalid width")?;
    let h: u32 = h.parse().context("Invalid height")?;
    if w == 0 || h == 0 {
        anyhow::bail!("Size must be non-zero (got '{}')", s);
    }
    Ok((w, h))
}
