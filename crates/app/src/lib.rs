use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{ArgAction, Args, Parser};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use tracing_subscriber::prelude::*;

use blurline_core::config::{
    config_path, data_dir, BlurConfig, Container, GpuVendor, InterpolationMethod, Preset,
    VideoCodec,
};
use blurline_core::filters::ColorAdjust;
use blurline_core::logging::{LogSettings, DEFAULT_LOG_FILTER};
use blurline_core::media::{
    probe_video, DecoderSettings, EncoderSettings, FfmpegDecoder, FfmpegEncoder, VideoInfo,
};
use blurline_core::pipeline::{
    BlurPipeline, FrameFilter, PipelineConfig, PipelineSummary, ProgressObserver,
};
use blurline_core::weights::{generate, parse_fps, BlurWeighting, FpsRatioHeuristic, WindowSizing};

#[derive(Parser, Debug)]
#[command(
    name = "blurline",
    version,
    about = "Motion blur for video by weighted blending of neighbouring frames"
)]
struct Cli {
    #[arg(value_name = "INPUT", help = "Source video")]
    input: PathBuf,

    #[arg(short = 'o', long, value_name = "FILE", help = "Output video path")]
    output: PathBuf,

    #[arg(
        short = 'c',
        long = "config",
        value_name = "FILE",
        help = "Settings file (JSON or TOML) layered over the data-dir config"
    )]
    config: Option<PathBuf>,

    #[arg(long, value_parser = parse_lowercase::<Preset>, help = "gaming, cinematic, smooth, fast or quality")]
    preset: Option<Preset>,

    #[command(flatten)]
    overrides: ConfigOverrides,

    #[arg(
        short = 'v',
        long = "verbose",
        action = ArgAction::Count,
        help = "Increase log verbosity (-v: debug, -vv: trace)"
    )]
    verbose: u8,

    #[arg(
        long = "log-filter",
        value_name = "FILTER",
        help = "Explicit tracing filter (overrides RUST_LOG and -v)"
    )]
    log_filter: Option<String>,

    #[arg(long, value_name = "DIR")]
    data_dir: Option<PathBuf>,

    #[arg(long, help = "Print the resolved settings and ffmpeg command lines, then exit")]
    dry_run: bool,

    #[arg(long, help = "Store the resolved settings as the data-dir config.toml")]
    save_config: bool,
}

fn parse_lowercase<T>(value: &str) -> Result<T, String>
where
    T: FromStr<Err = anyhow::Error>,
{
    value.parse().map_err(|error: anyhow::Error| format!("{error:#}"))
}

/// Per-run overrides of individual settings. Unset flags leave the layered
/// configuration untouched.
#[derive(Args, Debug, Default)]
struct ConfigOverrides {
    #[arg(long, value_name = "BOOL", help_heading = "Blur")]
    blur: Option<bool>,
    #[arg(long, value_name = "AMOUNT", help_heading = "Blur")]
    blur_amount: Option<f64>,
    #[arg(long, value_name = "FPS", help_heading = "Blur")]
    blur_output_fps: Option<String>,
    #[arg(long, value_name = "SHAPE", value_parser = parse_lowercase::<BlurWeighting>, help_heading = "Blur")]
    blur_weighting: Option<BlurWeighting>,
    #[arg(long, value_name = "W,W,...", value_delimiter = ',', help_heading = "Blur")]
    custom_weights: Option<Vec<f32>>,

    #[arg(long, value_name = "BOOL", help_heading = "Interpolation")]
    interpolate: Option<bool>,
    #[arg(long, value_name = "FPS", help_heading = "Interpolation")]
    interpolated_fps: Option<String>,
    #[arg(long, value_name = "METHOD", value_parser = parse_lowercase::<InterpolationMethod>, help_heading = "Interpolation")]
    interpolation_method: Option<InterpolationMethod>,
    #[arg(long, value_name = "PIXELS", help_heading = "Interpolation")]
    interpolation_block_size: Option<u32>,
    #[arg(long, value_name = "BOOL", help_heading = "Interpolation")]
    pre_interpolation: Option<bool>,
    #[arg(long, value_name = "FPS", help_heading = "Interpolation")]
    pre_interpolated_fps: Option<String>,

    #[arg(long, value_name = "BOOL", help_heading = "Deduplication")]
    deduplicate: Option<bool>,
    #[arg(long, value_name = "FRAMES", help_heading = "Deduplication")]
    deduplicate_range: Option<usize>,
    #[arg(long, value_name = "THRESHOLD", help_heading = "Deduplication")]
    deduplicate_threshold: Option<f32>,

    #[arg(long, value_name = "BOOL", help_heading = "GPU")]
    gpu_decoding: Option<bool>,
    #[arg(long, value_name = "BOOL", help_heading = "GPU")]
    gpu_encoding: Option<bool>,
    #[arg(long, value_name = "VENDOR", value_parser = parse_lowercase::<GpuVendor>, help_heading = "GPU")]
    gpu_type: Option<GpuVendor>,

    #[arg(long, value_name = "VALUE", allow_hyphen_values = true, help_heading = "Color")]
    brightness: Option<f32>,
    #[arg(long, value_name = "VALUE", allow_hyphen_values = true, help_heading = "Color")]
    saturation: Option<f32>,
    #[arg(long, value_name = "VALUE", allow_hyphen_values = true, help_heading = "Color")]
    contrast: Option<f32>,
    #[arg(long, value_name = "VALUE", help_heading = "Color")]
    gamma: Option<f32>,
    #[arg(long, value_name = "FILTERGRAPH", help_heading = "Color")]
    ffmpeg_filters: Option<String>,

    #[arg(long, value_name = "0-51", help_heading = "Encoding")]
    quality: Option<u32>,
    #[arg(long, value_parser = parse_lowercase::<Container>, help_heading = "Encoding")]
    container: Option<Container>,
    #[arg(long, value_parser = parse_lowercase::<VideoCodec>, help_heading = "Encoding")]
    codec: Option<VideoCodec>,
    #[arg(long, value_name = "KBPS", help_heading = "Encoding")]
    bitrate: Option<u32>,
    #[arg(long, value_name = "PIX_FMT", help_heading = "Encoding")]
    pixel_format: Option<String>,
    #[arg(long, help_heading = "Encoding")]
    threads: Option<u32>,
    #[arg(long, value_name = "FACTOR", help_heading = "Encoding")]
    timescale: Option<f64>,
    #[arg(long, value_name = "BOOL", help_heading = "Encoding")]
    pitch_correction: Option<bool>,

    #[arg(long, value_name = "FRAMES")]
    queue_capacity: Option<usize>,
}

macro_rules! apply_overrides {
    ($overrides:expr, $config:expr; $($field:ident),+ $(,)?) => {
        $(
            if let Some(value) = &$overrides.$field {
                $config.$field = value.clone();
            }
        )+
    };
}

impl ConfigOverrides {
    fn apply(&self, config: &mut BlurConfig) {
        apply_overrides!(self, config;
            blur, blur_amount, blur_output_fps, blur_weighting, custom_weights,
            interpolate, interpolated_fps, interpolation_method, interpolation_block_size,
            pre_interpolation, pre_interpolated_fps,
            deduplicate, deduplicate_range, deduplicate_threshold,
            gpu_decoding, gpu_encoding, gpu_type,
            brightness, saturation, contrast, gamma, ffmpeg_filters,
            quality, container, codec, bitrate, pixel_format, threads, timescale,
            pitch_correction, queue_capacity,
        );
    }
}

pub async fn run_from_env() -> Result<()> {
    let cli = Cli::parse();
    let resolved_data_dir = data_dir(cli.data_dir.as_deref());

    init_logging(&LogSettings::from_env(
        Some(resolved_data_dir.as_path()),
        cli.verbose,
        cli.log_filter.as_deref(),
    ));
    log_startup_metadata(&resolved_data_dir);

    let config = resolve_config(
        &resolved_data_dir,
        cli.config.as_deref(),
        cli.preset,
        &cli.overrides,
    )?;
    if cli.save_config {
        let path = config_path(&resolved_data_dir);
        config.save_to_path(&path)?;
        info!(path = %path.display(), "Saved settings");
    }

    let job = Job::prepare(config, &cli.input, &cli.output)?;
    if cli.dry_run {
        print_plan(&job)?;
        return Ok(());
    }

    process(job).await
}

fn init_logging(settings: &LogSettings) {
    let filters = settings.filters();
    let console = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_filter(env_filter_or_default(&filters.console, "console"));

    let (file_layer, sink) = match settings.open_file_sink() {
        Ok(sink) => {
            let layer = tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(sink.appender)
                .with_filter(env_filter_or_default(&filters.file, "file"));
            (Some(layer), Ok(sink.dir))
        }
        Err(error) => (None, Err(error)),
    };

    let subscriber = tracing_subscriber::registry().with(console).with(file_layer);
    if let Err(error) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to initialize tracing subscriber: {error}. Continuing without structured tracing.");
        return;
    }

    match sink {
        Ok(dir) => debug!(log_dir = %dir.display(), source = ?filters.source, "Logging initialized"),
        Err(error) => warn!(
            error = %error,
            "Persistent file logging unavailable; continuing with console-only logging"
        ),
    }
}

fn env_filter_or_default(filter: &str, sink_name: &str) -> tracing_subscriber::EnvFilter {
    tracing_subscriber::EnvFilter::try_new(filter).unwrap_or_else(|error| {
        eprintln!("Ignoring invalid {sink_name} log filter '{filter}' ({error}); using '{DEFAULT_LOG_FILTER}'.");
        tracing_subscriber::EnvFilter::new(DEFAULT_LOG_FILTER)
    })
}

fn log_startup_metadata(data_dir: &Path) {
    let cfg_path = config_path(data_dir);
    info!(
        pid = std::process::id(),
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %data_dir.display(),
        config_path = %cfg_path.display(),
        "Runtime startup metadata"
    );
    match blurline_core::runtime::tool_version("ffmpeg") {
        Ok(version) => info!(
            bundled = blurline_core::runtime::is_bundled("ffmpeg"),
            %version,
            "Using ffmpeg"
        ),
        Err(error) => warn!(error = %format!("{error:#}"), "ffmpeg is not runnable"),
    }
}

/// Defaults, then the data-dir `config.toml`, then `--config`, then the
/// preset, then individual flags.
fn resolve_config(
    data_dir: &Path,
    config_file: Option<&Path>,
    preset: Option<Preset>,
    overrides: &ConfigOverrides,
) -> Result<BlurConfig> {
    let base_path = config_path(data_dir);
    let mut config = BlurConfig::load_from_path(&base_path)?;

    if let Some(path) = config_file {
        if !path.exists() {
            bail!("Config file does not exist: {}", path.display());
        }
        config = config.merge_file(path)?;
    }
    if let Some(preset) = preset {
        preset.apply(&mut config);
    }
    overrides.apply(&mut config);

    config.validate().context("Invalid settings")?;
    Ok(config)
}

/// Everything resolved before any ffmpeg process is started.
struct Job {
    config: BlurConfig,
    info: VideoInfo,
    decoder: DecoderSettings,
    encoder: EncoderSettings,
    weights: Vec<f32>,
    expected_frames: Option<u64>,
}

impl Job {
    fn prepare(config: BlurConfig, input: &Path, output: &Path) -> Result<Self> {
        check_output_path(input, output)?;

        let info = probe_video(input)?;
        let decoder = DecoderSettings::from_config(&config, input, &info)?;
        let encoder = EncoderSettings::from_config(&config, &decoder, &info, output)?;

        let window = blend_window(&config, info.fps)?;
        let weights = generate(config.blur_weighting, window, &config.custom_weights);
        let expected_frames = expected_frames(&info, decoder.fps);

        info!(
            input = %input.display(),
            output = %output.display(),
            width = decoder.width,
            height = decoder.height,
            source_fps = info.fps,
            blend_fps = decoder.fps,
            output_fps = encoder.output_fps.unwrap_or(encoder.input_fps),
            window,
            weighting = %config.blur_weighting,
            encoder = encoder.encoder(),
            frames = ?expected_frames,
            audio = info.has_audio,
            "Processing summary"
        );

        Ok(Self {
            config,
            info,
            decoder,
            encoder,
            weights,
            expected_frames,
        })
    }

    fn pipeline_config(&self) -> PipelineConfig {
        let config = PipelineConfig::new(self.weights.clone())
            .with_queue_capacity(self.config.queue_capacity);
        if self.config.deduplicate {
            config.with_dedup(
                self.config.deduplicate_range,
                self.config.deduplicate_threshold,
            )
        } else {
            config
        }
    }
}

fn check_output_path(input: &Path, output: &Path) -> Result<()> {
    if input == output {
        bail!("Output path must differ from the input: {}", output.display());
    }
    let parent = output
        .parent()
        .filter(|dir| !dir.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    if !parent.is_dir() {
        bail!("Output directory does not exist: {}", parent.display());
    }
    Ok(())
}

/// Number of frames blended per output frame. Disabled blur passes frames
/// through unchanged.
fn blend_window(config: &BlurConfig, source_fps: f64) -> Result<usize> {
    if !config.blur {
        return Ok(1);
    }
    let output_fps =
        parse_fps(&config.blur_output_fps, source_fps).context("invalid blur_output_fps")?;
    Ok(FpsRatioHeuristic.window_size(source_fps, output_fps, config.blur_amount))
}

/// Frames the decoder will emit once interpolation has raised the rate.
fn expected_frames(info: &VideoInfo, decode_fps: f64) -> Option<u64> {
    let source_frames = info.frame_count?;
    if info.fps <= 0.0 {
        return Some(source_frames);
    }
    Some((source_frames as f64 * decode_fps / info.fps).round() as u64)
}

fn print_plan(job: &Job) -> Result<()> {
    let settings =
        serde_json::to_string_pretty(&job.config).context("failed to serialize settings")?;
    println!("{settings}");
    println!();
    println!(
        "source: {}x{} @ {:.3} fps, {}",
        job.info.width, job.info.height, job.info.fps, job.info.codec_name
    );
    println!(
        "blend window: {} ({}) {:?}",
        job.weights.len(),
        job.config.blur_weighting,
        job.weights
    );
    println!();
    println!("decode: ffmpeg {}", shell_join(&job.decoder.build_ffmpeg_args()));
    println!("encode: ffmpeg {}", shell_join(&job.encoder.build_ffmpeg_args()));
    Ok(())
}

fn shell_join(args: &[String]) -> String {
    args.iter()
        .map(|arg| {
            if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '\'' || c == '"') {
                format!("'{}'", arg.replace('\'', r"'\''"))
            } else {
                arg.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

async fn process(job: Job) -> Result<()> {
    let pipeline = BlurPipeline::new(job.pipeline_config())?;

    let mut filters: Vec<Box<dyn FrameFilter>> = Vec::new();
    if let Some(adjust) = ColorAdjust::from_config(&job.config) {
        filters.push(Box::new(adjust));
    }

    let cancel = CancellationToken::new();
    let _stop_signal_watcher = spawn_signal_watcher(cancel.clone());

    let decoder = FfmpegDecoder::spawn(&job.decoder)?;
    let encoder = FfmpegEncoder::spawn(&job.encoder)?;
    let progress = ProgressPrinter::new(job.expected_frames);

    let started = Instant::now();
    let result = pipeline
        .run(decoder, filters, encoder, cancel, Some(Box::new(progress)))
        .await;
    eprintln!();

    let output = &job.encoder.output_path;
    match result {
        Ok(summary) if summary.cancelled => {
            remove_partial_output(output);
            bail!("Processing cancelled");
        }
        Ok(summary) => {
            log_completion(&summary, started.elapsed().as_secs_f64(), output);
            Ok(())
        }
        Err(error) => {
            remove_partial_output(output);
            Err(error.context("Processing failed"))
        }
    }
}

/// Cancels `cancel` on Ctrl-C or SIGTERM. The watcher stops once the
/// returned guard is dropped.
fn spawn_signal_watcher(cancel: CancellationToken) -> tokio_util::sync::DropGuard {
    let done = CancellationToken::new();
    let watcher_done = done.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = shutdown_signal() => {
                warn!("Received shutdown signal; stopping");
                cancel.cancel();
            }
            _ = watcher_done.cancelled() => {}
        }
    });
    done.drop_guard()
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(%error, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(error) => {
                warn!(%error, "Failed to install SIGTERM handler");
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

fn remove_partial_output(output: &Path) {
    if !output.exists() {
        return;
    }
    match std::fs::remove_file(output) {
        Ok(()) => info!(path = %output.display(), "Removed incomplete output"),
        Err(error) => warn!(path = %output.display(), %error, "Failed to remove incomplete output"),
    }
}

fn log_completion(summary: &PipelineSummary, elapsed: f64, output: &Path) {
    let average_fps = if elapsed > 0.0 {
        summary.frames_decoded as f64 / elapsed
    } else {
        0.0
    };
    info!(
        output = %output.display(),
        elapsed = %format_duration(elapsed),
        average_fps = %format!("{average_fps:.1}"),
        frames_decoded = summary.frames_decoded,
        duplicates_dropped = summary.duplicates_dropped,
        frames_written = summary.frames_emitted,
        "Processing complete"
    );
}

fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    let h = total / 3600;
    let m = (total % 3600) / 60;
    let s = total % 60;
    format!("{:02}:{:02}:{:02}", h, m, s)
}

const PROGRESS_BAR_WIDTH: usize = 30;

struct ProgressPrinter {
    started: Instant,
    total: Option<u64>,
}

impl ProgressPrinter {
    fn new(total: Option<u64>) -> Self {
        Self {
            started: Instant::now(),
            total,
        }
    }
}

impl ProgressObserver for ProgressPrinter {
    fn on_progress(&self, processed: u64) {
        eprint!(
            "\r{}    ",
            progress_line(processed, self.total, self.started.elapsed().as_secs_f64())
        );
    }
}

fn progress_line(processed: u64, total: Option<u64>, elapsed: f64) -> String {
    let fps = if elapsed > 0.0 {
        processed as f64 / elapsed
    } else {
        0.0
    };

    let Some(total) = total.filter(|total| *total > 0) else {
        return format!(
            "Frame {} | {:.1} fps | Elapsed: {}",
            processed,
            fps,
            format_duration(elapsed)
        );
    };

    let fraction = (processed as f64 / total as f64).clamp(0.0, 1.0);
    let filled = (fraction * PROGRESS_BAR_WIDTH as f64).round() as usize;
    let bar = "█".repeat(filled) + &"░".repeat(PROGRESS_BAR_WIDTH.saturating_sub(filled));
    let eta = if fps > 0.0 {
        let remaining = total.saturating_sub(processed) as f64;
        format!(" | ETA: {}", format_duration(remaining / fps))
    } else {
        String::new()
    };

    format!(
        "[{}] {:5.1}% | Frame {}/{} | {:.1} fps | Elapsed: {}{}",
        bar,
        fraction * 100.0,
        processed,
        total,
        fps,
        format_duration(elapsed),
        eta
    )
}



#[cfg(test)]
mod cli_tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args.iter().copied()).expect("valid command line")
    }

    #[test]
    fn parses_input_output_and_overrides() {
        let cli = parse(&[
            "blurline",
            "in.mp4",
            "-o",
            "out.mkv",
            "--preset",
            "Cinematic",
            "--blur-amount",
            "0.5",
            "--blur-weighting",
            "vegas",
            "--custom-weights",
            "1,2,3",
            "--brightness",
            "-0.2",
            "--codec",
            "hevc",
            "--interpolate",
            "false",
            "-vv",
        ]);

        assert_eq!(cli.input, PathBuf::from("in.mp4"));
        assert_eq!(cli.output, PathBuf::from("out.mkv"));
        assert_eq!(cli.preset, Some(Preset::Cinematic));
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.overrides.blur_amount, Some(0.5));
        assert_eq!(cli.overrides.blur_weighting, Some(BlurWeighting::Vegas));
        assert_eq!(cli.overrides.custom_weights, Some(vec![1.0, 2.0, 3.0]));
        assert_eq!(cli.overrides.brightness, Some(-0.2));
        assert_eq!(cli.overrides.codec, Some(VideoCodec::H265));
        assert_eq!(cli.overrides.interpolate, Some(false));
        assert!(!cli.dry_run);
    }

    #[test]
    fn output_is_required() {
        assert!(Cli::try_parse_from(["blurline", "in.mp4"]).is_err());
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let result = Cli::try_parse_from(["blurline", "in.mp4", "-o", "o.mp4", "--preset", "turbo"]);
        assert!(result.is_err());
    }

    #[test]
    fn shell_join_quotes_only_when_needed() {
        let args = vec![
            "-i".to_string(),
            "my clip.mp4".to_string(),
            "-vf".to_string(),
            "crop=10:10:0:0".to_string(),
        ];
        assert_eq!(shell_join(&args), "-i 'my clip.mp4' -vf crop=10:10:0:0");
    }
}
