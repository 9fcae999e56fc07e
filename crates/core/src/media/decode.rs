use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdout, Stdio};
use std::thread::JoinHandle;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, warn};

use super::probe::VideoInfo;
use super::{format_rate, spawn_stderr_drain, StderrTarget};
use crate::config::{BlurConfig, GpuVendor, InterpolationMethod};
use crate::frame::{FrameBuffer, PixelFormat};
use crate::pipeline::{DecodeStatus, FrameSource};
use crate::weights::parse_fps;

/// Everything needed to launch the decode subprocess.
#[derive(Debug, Clone, PartialEq)]
pub struct DecoderSettings {
    pub input: PathBuf,
    pub stream_index: usize,
    /// Frame size after the filter chain.
    pub width: u32,
    pub height: u32,
    /// Rate of the frames leaving the filter chain.
    pub fps: f64,
    pub hwaccel: Option<String>,
    pub video_filters: Vec<String>,
}

fn hwaccel_name(vendor: GpuVendor) -> &'static str {
    match vendor {
        GpuVendor::Nvidia => "cuda",
        GpuVendor::Amd if cfg!(windows) => "d3d11va",
        GpuVendor::Amd => "vaapi",
        GpuVendor::Intel => "qsv",
    }
}

fn minterpolate(fps: f64, method: InterpolationMethod, block_size: u32) -> String {
    match method {
        InterpolationMethod::Mci => format!(
            "minterpolate=fps={}:mi_mode=mci:mc_mode=aobmc:me_mode=bidir:vsbmc=1:mb_size={block_size}",
            format_rate(fps)
        ),
        InterpolationMethod::Blend => {
            format!("minterpolate=fps={}:mi_mode=blend", format_rate(fps))
        }
    }
}

/// Builds the `-vf` chain and returns it with the resulting frame rate.
///
/// Order: custom filters, pre-interpolation, interpolation, even-size crop.
/// Rate multipliers (`"5x"`) are relative to the source rate.
pub fn build_filter_chain(config: &BlurConfig, info: &VideoInfo) -> Result<(Vec<String>, f64)> {
    let mut filters = Vec::new();
    let mut fps = info.fps;

    let custom = config.ffmpeg_filters.trim();
    if !custom.is_empty() {
        filters.push(custom.to_string());
    }

    let mut passes = Vec::new();
    if config.pre_interpolation {
        passes.push(("pre_interpolated_fps", &config.pre_interpolated_fps));
    }
    if config.interpolate {
        passes.push(("interpolated_fps", &config.interpolated_fps));
    }
    for (field, expr) in passes {
        let target = parse_fps(expr, info.fps).with_context(|| format!("invalid {field}"))?;
        if target <= fps {
            warn!(
                field,
                target,
                current = fps,
                "Interpolation target does not raise the frame rate; skipping pass"
            );
            continue;
        }
        filters.push(minterpolate(
            target,
            config.interpolation_method,
            config.interpolation_block_size,
        ));
        fps = target;
    }

    let (width, height) = info.even_dimensions();
    if (width, height) != (info.width, info.height) {
        filters.push(format!("crop={width}:{height}:0:0"));
    }

    Ok((filters, fps))
}

impl DecoderSettings {
    pub fn from_config(config: &BlurConfig, input: &Path, info: &VideoInfo) -> Result<Self> {
        let (video_filters, fps) = build_filter_chain(config, info)?;
        let (width, height) = info.even_dimensions();
        Ok(Self {
            input: input.to_path_buf(),
            stream_index: info.stream_index,
            width,
            height,
            fps,
            hwaccel: config
                .gpu_decoding
                .then(|| hwaccel_name(config.gpu_type).to_string()),
            video_filters,
        })
    }

    pub fn build_ffmpeg_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec!["-nostdin".to_string()];

        // FFmpeg requires -hwaccel before -i
        if let Some(accel) = &self.hwaccel {
            args.extend(["-hwaccel".to_string(), accel.clone()]);
        }

        args.push("-i".to_string());
        args.push(self.input.to_string_lossy().into_owned());
        args.extend(["-map".to_string(), format!("0:{}", self.stream_index)]);

        if !self.video_filters.is_empty() {
            args.extend(["-vf".to_string(), self.video_filters.join(",")]);
        }

        args.extend([
            "-f".to_string(),
            "rawvideo".to_string(),
            "-pix_fmt".to_string(),
            PixelFormat::Yuv420p.ffmpeg_name().to_string(),
            "-vsync".to_string(),
            "cfr".to_string(),
            "-v".to_string(),
            "error".to_string(),
            "pipe:1".to_string(),
        ]);
        args
    }
}

/// Decodes video to packed yuv420p via an FFmpeg subprocess, one frame per
/// read. Drains stderr in a background thread to prevent pipe deadlock.
/// Kills FFmpeg on [`Drop`].
pub struct FfmpegDecoder {
    child: Child,
    stdout: ChildStdout,
    width: u32,
    height: u32,
    frame_size: usize,
    stderr_thread: Option<JoinHandle<()>>,
    buf: Vec<u8>,
    next_pts: i64,
    done: bool,
}

impl FfmpegDecoder {
    pub fn spawn(settings: &DecoderSettings) -> Result<Self> {
        let args = settings.build_ffmpeg_args();
        debug!(
            cmd = %format!("ffmpeg {}", args.join(" ")),
            "launching FFmpeg decoder"
        );

        let mut child = crate::runtime::command_for("ffmpeg")
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to launch ffmpeg; is it installed?")?;

        let stderr_thread = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_drain(stderr, StderrTarget::Decode));

        Self::from_child(child, settings.width, settings.height, stderr_thread)
    }

    fn from_child(
        mut child: Child,
        width: u32,
        height: u32,
        stderr_thread: Option<JoinHandle<()>>,
    ) -> Result<Self> {
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| anyhow!("ffmpeg stdout not available"))?;
        let frame_size = FrameBuffer::packed_len(width, height);

        Ok(Self {
            child,
            stdout,
            width,
            height,
            frame_size,
            stderr_thread,
            buf: vec![0u8; frame_size],
            next_pts: 0,
            done: false,
        })
    }
}

impl FrameSource for FfmpegDecoder {
    fn read_frame(&mut self, frame: &mut FrameBuffer) -> Result<DecodeStatus> {
        if self.done {
            return Ok(DecodeStatus::EndOfStream);
        }

        let mut total_read = 0;
        while total_read < self.frame_size {
            match self.stdout.read(&mut self.buf[total_read..]) {
                Ok(0) => {
                    self.done = true;
                    if total_read == 0 {
                        return Ok(DecodeStatus::EndOfStream);
                    }
                    warn!(
                        "partial frame at EOF ({total_read}/{} bytes), discarding",
                        self.frame_size
                    );
                    return Ok(DecodeStatus::Corrupt(format!(
                        "truncated frame: {total_read} of {} bytes",
                        self.frame_size
                    )));
                }
                Ok(n) => {
                    total_read += n;
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {
                    continue;
                }
                Err(e) => {
                    self.done = true;
                    return Err(e).context("failed to read frame from ffmpeg stdout");
                }
            }
        }

        frame.load_packed(self.width, self.height, &self.buf, self.next_pts)?;
        self.next_pts += 1;
        Ok(DecodeStatus::Frame)
    }

    fn finish(&mut self) -> Result<()> {
        let status = self.child.wait().context("failed to wait for ffmpeg")?;
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        if !status.success() {
            bail!("ffmpeg decoder exited with status {}", status);
        }
        debug!(frames = self.next_pts, "FFmpeg decoder finished");
        Ok(())
    }
}

impl Drop for FfmpegDecoder {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}
