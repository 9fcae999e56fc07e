//! Encoder subprocess fed with packed yuv420p frames on stdin. Audio is taken
//! from the original input and either copied or retimed to match the video.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Stdio};
use std::thread::JoinHandle;

use anyhow::{anyhow, bail, Context, Result};
use tracing::{debug, warn};

use super::decode::DecoderSettings;
use super::probe::VideoInfo;
use super::{format_rate, spawn_stderr_drain, StderrTarget};
use crate::config::{BlurConfig, Container, GpuVendor, VideoCodec};
use crate::frame::{FrameBuffer, PixelFormat};
use crate::pipeline::{FrameSink, SubmitError};
use crate::weights::parse_fps;

const ATEMPO_MIN: f64 = 0.5;
const ATEMPO_MAX: f64 = 2.0;

/// How the source audio reaches the output.
#[derive(Debug, Clone, PartialEq)]
pub enum AudioPlan {
    None,
    Copy,
    /// Re-encode through this `-af` chain.
    Filter(String),
}

impl AudioPlan {
    pub fn from_config(config: &BlurConfig, info: &VideoInfo) -> Self {
        if !info.has_audio {
            return AudioPlan::None;
        }
        let tempo = config.timescale;
        if (tempo - 1.0).abs() < 1e-6 {
            return AudioPlan::Copy;
        }
        match (config.pitch_correction, info.audio_sample_rate) {
            (false, Some(rate)) => {
                let shifted = (f64::from(rate) * tempo).round() as u64;
                AudioPlan::Filter(format!("asetrate={shifted},aresample={rate}"))
            }
            _ => AudioPlan::Filter(atempo_chain(tempo)),
        }
    }
}

/// `atempo` only accepts factors in [0.5, 2.0]; larger changes are chained.
fn atempo_chain(mut tempo: f64) -> String {
    let mut stages = Vec::new();
    while tempo > ATEMPO_MAX {
        stages.push(format!("atempo={ATEMPO_MAX}"));
        tempo /= ATEMPO_MAX;
    }
    while tempo < ATEMPO_MIN {
        stages.push(format!("atempo={ATEMPO_MIN}"));
        tempo /= ATEMPO_MIN;
    }
    stages.push(format!("atempo={}", format_rate(tempo)));
    stages.join(",")
}

/// ffmpeg encoder for a codec, using the vendor's hardware encoder when one exists.
pub fn encoder_name(codec: VideoCodec, gpu: Option<GpuVendor>) -> &'static str {
    use GpuVendor::{Amd, Intel, Nvidia};
    use VideoCodec::{Av1, Vp9, H264, H265};

    match (codec, gpu) {
        (H264, Some(Nvidia)) => "h264_nvenc",
        (H264, Some(Amd)) => "h264_amf",
        (H264, Some(Intel)) => "h264_qsv",
        (H265, Some(Nvidia)) => "hevc_nvenc",
        (H265, Some(Amd)) => "hevc_amf",
        (H265, Some(Intel)) => "hevc_qsv",
        (Av1, Some(Nvidia)) => "av1_nvenc",
        (Av1, Some(Amd)) => "av1_amf",
        (Av1, Some(Intel)) => "av1_qsv",
        (Vp9, Some(Intel)) => "vp9_qsv",
        (H264, _) => "libx264",
        (H265, _) => "libx265",
        (Av1, _) => "libsvtav1",
        (Vp9, _) => "libvpx-vp9",
    }
}

fn muxer_name(container: Container) -> &'static str {
    match container {
        Container::Mp4 => "mp4",
        Container::Mkv => "matroska",
        Container::Avi => "avi",
        Container::Mov => "mov",
    }
}

fn rate_control_args(encoder: &str, quality: u32, bitrate_kbps: u32) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();
    if bitrate_kbps > 0 {
        args.extend([
            "-b:v".into(),
            format!("{bitrate_kbps}k"),
            "-maxrate".into(),
            format!("{}k", bitrate_kbps * 6 / 5),
            "-bufsize".into(),
            format!("{}k", bitrate_kbps * 2),
        ]);
    } else if encoder.ends_with("_nvenc") {
        args.extend([
            "-rc".into(),
            "vbr".into(),
            "-cq".into(),
            quality.to_string(),
            "-b:v".into(),
            "0".into(),
        ]);
    } else if encoder.ends_with("_amf") {
        args.extend([
            "-rc".into(),
            "cqp".into(),
            "-qp_i".into(),
            quality.to_string(),
            "-qp_p".into(),
            quality.to_string(),
        ]);
    } else if encoder.ends_with("_qsv") {
        args.extend(["-global_quality".into(), quality.to_string()]);
    } else if encoder == "libvpx-vp9" {
        args.extend([
            "-crf".into(),
            quality.to_string(),
            "-b:v".into(),
            "0".into(),
        ]);
    } else {
        args.extend(["-crf".into(), quality.to_string()]);
    }

    let preset = match encoder {
        "libx264" | "libx265" => Some("medium"),
        "libsvtav1" => Some("8"),
        e if e.ends_with("_nvenc") => Some("p4"),
        _ => None,
    };
    if let Some(preset) = preset {
        args.extend(["-preset".into(), preset.into()]);
    }
    args
}

#[derive(Debug, Clone, PartialEq)]
pub struct EncoderSettings {
    /// Original input, used as the audio source.
    pub source_path: PathBuf,
    pub output_path: PathBuf,
    pub width: u32,
    pub height: u32,
    /// Rate declared for the raw frames on stdin.
    pub input_fps: f64,
    /// Rate the output is resampled to, when lower than `input_fps`.
    pub output_fps: Option<f64>,
    pub codec: VideoCodec,
    pub container: Container,
    pub gpu: Option<GpuVendor>,
    pub quality: u32,
    pub bitrate_kbps: u32,
    pub threads: u32,
    pub pixel_format: String,
    pub audio: AudioPlan,
}

impl EncoderSettings {
    pub fn from_config(
        config: &BlurConfig,
        decoder: &DecoderSettings,
        info: &VideoInfo,
        output_path: &Path,
    ) -> Result<Self> {
        let input_fps = decoder.fps * config.timescale;
        let output_fps = if config.blur {
            let target = parse_fps(&config.blur_output_fps, info.fps)
                .context("invalid blur_output_fps")?;
            (target < input_fps - 1e-6).then_some(target)
        } else {
            None
        };

        let gpu = config.gpu_encoding.then_some(config.gpu_type);
        if config.codec == VideoCodec::Vp9 && matches!(gpu, Some(GpuVendor::Nvidia | GpuVendor::Amd)) {
            warn!(gpu = %config.gpu_type, "No hardware VP9 encoder for this GPU; using libvpx-vp9");
        }

        Ok(Self {
            source_path: decoder.input.clone(),
            output_path: output_path.to_path_buf(),
            width: decoder.width,
            height: decoder.height,
            input_fps,
            output_fps,
            codec: config.codec,
            container: config.container,
            gpu,
            quality: config.quality,
            bitrate_kbps: config.bitrate,
            threads: config.threads,
            pixel_format: config.pixel_format.clone(),
            audio: AudioPlan::from_config(config, info),
        })
    }

    pub fn encoder(&self) -> &'static str {
        encoder_name(self.codec, self.gpu)
    }

    pub fn build_ffmpeg_args(&self) -> Vec<String> {
        let encoder = self.encoder();
        let effective_fps = self.output_fps.unwrap_or(self.input_fps);
        let gop = ((effective_fps * 2.0).round() as u64).max(1);

        let mut args: Vec<String> = vec![
            "-nostdin".into(),
            "-y".into(),
            "-f".into(),
            "rawvideo".into(),
            "-pix_fmt".into(),
            PixelFormat::Yuv420p.ffmpeg_name().into(),
            "-s".into(),
            format!("{}x{}", self.width, self.height),
            "-r".into(),
            format_rate(self.input_fps),
            "-i".into(),
            "pipe:0".into(),
        ];

        let with_audio = self.audio != AudioPlan::None;
        if with_audio {
            args.extend([
                "-i".into(),
                self.source_path.to_string_lossy().into_owned(),
            ]);
        }
        args.extend(["-map".into(), "0:v:0".into()]);
        if with_audio {
            args.extend(["-map".into(), "1:a?".into()]);
        }

        if let Some(fps) = self.output_fps {
            args.extend(["-vf".into(), format!("fps={}", format_rate(fps))]);
        }

        args.extend(["-c:v".into(), encoder.into()]);
        args.extend(rate_control_args(encoder, self.quality, self.bitrate_kbps));
        args.extend([
            "-g".into(),
            gop.to_string(),
            "-pix_fmt".into(),
            self.pixel_format.clone(),
        ]);
        if self.threads > 0 {
            args.extend(["-threads".into(), self.threads.to_string()]);
        }

        match &self.audio {
            AudioPlan::None => args.push("-an".into()),
            AudioPlan::Copy => args.extend(["-c:a".into(), "copy".into()]),
            AudioPlan::Filter(chain) => args.extend([
                "-af".into(),
                chain.clone(),
                "-c:a".into(),
                "aac".into(),
                "-b:a".into(),
                "192k".into(),
            ]),
        }

        args.extend([
            "-f".into(),
            muxer_name(self.container).into(),
            self.output_path.to_string_lossy().into_owned(),
        ]);
        args
    }
}

/// FFmpeg encode subprocess. Accepts packed yuv420p frames via stdin pipe,
/// drains stderr in a background thread, kills FFmpeg on [`Drop`].
///
/// The rawvideo pipe has no timestamps, so the sink keeps the stream at a
/// constant rate itself: frame `pts` lands at wire position `pts`. Gaps left
/// by dropped duplicates are filled by repeating the previous frame, and the
/// blend window's startup offset by repeating the first one.
pub struct FfmpegEncoder {
    child: Child,
    stdin: Option<ChildStdin>,
    stderr_thread: Option<JoinHandle<()>>,
    width: u32,
    height: u32,
    /// Last frame written, packed; resent to fill pts gaps.
    packed: Vec<u8>,
    next_pts: i64,
    frames_written: u64,
    frames_repeated: u64,
}

impl FfmpegEncoder {
    pub fn spawn(settings: &EncoderSettings) -> Result<Self> {
        let args = settings.build_ffmpeg_args();
        debug!(
            cmd = %format!("ffmpeg {}", args.join(" ")),
            "launching FFmpeg encoder"
        );

        let mut child = crate::runtime::command_for("ffmpeg")
            .args(&args)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()
            .context("failed to launch ffmpeg; is it installed?")?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| anyhow!("failed to open ffmpeg stdin"))?;
        let stderr_thread = child
            .stderr
            .take()
            .map(|stderr| spawn_stderr_drain(stderr, StderrTarget::Encode));

        debug!(
            width = settings.width,
            height = settings.height,
            input_fps = settings.input_fps,
            output_fps = ?settings.output_fps,
            encoder = settings.encoder(),
            quality = settings.quality,
            audio = ?settings.audio,
            "FFmpeg encoder started"
        );

        Ok(Self::from_parts(
            child,
            stdin,
            stderr_thread,
            settings.width,
            settings.height,
        ))
    }

    fn from_parts(
        child: Child,
        stdin: ChildStdin,
        stderr_thread: Option<JoinHandle<()>>,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            child,
            stdin: Some(stdin),
            stderr_thread,
            width,
            height,
            packed: Vec::with_capacity(FrameBuffer::packed_len(width, height)),
            next_pts: 0,
            frames_written: 0,
            frames_repeated: 0,
        }
    }

    /// Frames sent down the pipe, repeats included.
    pub fn frames_written(&self) -> u64 {
        self.frames_written
    }

    pub fn frames_repeated(&self) -> u64 {
        self.frames_repeated
    }

    fn write_packed(&mut self, copies: u64) -> Result<(), SubmitError> {
        let stdin = self.stdin.as_mut().ok_or_else(|| {
            io::Error::new(io::ErrorKind::BrokenPipe, "encoder stdin already closed")
        })?;
        for _ in 0..copies {
            stdin.write_all(&self.packed)?;
            self.frames_written += 1;
        }
        Ok(())
    }
}

impl FrameSink for FfmpegEncoder {
    fn submit(&mut self, frame: &FrameBuffer) -> Result<(), SubmitError> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(SubmitError::Rejected(format!(
                "frame is {}x{}, encoder expects {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            )));
        }

        let pts = frame.pts();
        if pts < self.next_pts {
            return Err(SubmitError::Rejected(format!(
                "pts {pts} is behind the stream position {}",
                self.next_pts
            )));
        }
        let gap = (pts - self.next_pts) as u64;

        if self.frames_written == 0 {
            // Nothing sent yet: the first frame also covers the lead-in.
            self.packed.clear();
            frame.write_packed(&mut self.packed);
            self.write_packed(gap + 1)?;
        } else {
            self.write_packed(gap)?;
            self.packed.clear();
            frame.write_packed(&mut self.packed);
            self.write_packed(1)?;
        }

        self.frames_repeated += gap;
        self.next_pts = pts + 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        drop(self.stdin.take());

        let status = self.child.wait().context("failed to wait for ffmpeg")?;
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
        if !status.success() {
            bail!("ffmpeg encoder exited with status {}", status);
        }

        debug!(
            frames = self.frames_written,
            repeated = self.frames_repeated,
            "FFmpeg encoder finished successfully"
        );
        Ok(())
    }
}

impl Drop for FfmpegEncoder {
    fn drop(&mut self) {
        drop(self.stdin.take());
        let _ = self.child.kill();
        let _ = self.child.wait();
        if let Some(handle) = self.stderr_thread.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(has_audio: bool) -> VideoInfo {
        VideoInfo {
            stream_index: 0,
            width: 1920,
            height: 1080,
            fps: 60.0,
            frame_count: Some(600),
            duration: Some(10.0),
            codec_name: "h264".to_string(),
            pix_fmt: "yuv420p".to_string(),
            has_audio,
            audio_sample_rate: has_audio.then_some(44100),
        }
    }

    fn decoder(fps: f64) -> DecoderSettings {
        DecoderSettings {
            input: std::env::temp_dir().join("source.mp4"),
            stream_index: 0,
            width: 1920,
            height: 1080,
            fps,
            hwaccel: None,
            video_filters: Vec::new(),
        }
    }

    fn settings(config: &BlurConfig) -> EncoderSettings {
        let output = std::env::temp_dir().join("output.mp4");
        EncoderSettings::from_config(config, &decoder(300.0), &info(true), &output).unwrap()
    }

    fn value_after<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
        args.windows(2)
            .find(|w| w[0] == flag)
            .map(|w| w[1].as_str())
    }

    #[test]
    fn default_settings_resample_interpolated_stream_to_output_rate() {
        let settings = settings(&BlurConfig::default());
        assert_eq!(settings.input_fps, 300.0);
        assert_eq!(settings.output_fps, Some(60.0));
        assert_eq!(settings.audio, AudioPlan::Copy);

        let args = settings.build_ffmpeg_args();
        assert_eq!(args[0], "-nostdin");
        assert_eq!(value_after(&args, "-s"), Some("1920x1080"));
        assert_eq!(value_after(&args, "-r"), Some("300"));
        assert_eq!(value_after(&args, "-vf"), Some("fps=60"));
        assert_eq!(value_after(&args, "-c:v"), Some("libx264"));
        assert_eq!(value_after(&args, "-crf"), Some("20"));
        assert_eq!(value_after(&args, "-preset"), Some("medium"));
        assert_eq!(value_after(&args, "-g"), Some("120"));
        assert_eq!(value_after(&args, "-c:a"), Some("copy"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "0:v:0"));
        assert!(args.windows(2).any(|w| w[0] == "-map" && w[1] == "1:a?"));
        assert_eq!(args[args.len() - 2], "mp4");
        assert_eq!(args.last().unwrap(), &std::env::temp_dir().join("output.mp4").to_string_lossy());
    }

    #[test]
    fn rawvideo_input_is_declared_before_pipe() {
        let args = settings(&BlurConfig::default()).build_ffmpeg_args();
        let pipe_idx = args.iter().position(|a| a == "pipe:0").unwrap();
        let pix_idx = args.iter().position(|a| a == "-pix_fmt").unwrap();
        assert!(pix_idx < pipe_idx);
        assert_eq!(args[pix_idx + 1], "yuv420p");
    }

    #[test]
    fn no_audio_stream_means_single_input() {
        let output = std::env::temp_dir().join("silent.mkv");
        let config = BlurConfig {
            container: Container::Mkv,
            ..Default::default()
        };
        let settings =
            EncoderSettings::from_config(&config, &decoder(60.0), &info(false), &output).unwrap();
        assert_eq!(settings.audio, AudioPlan::None);
        assert_eq!(settings.output_fps, None);

        let args = settings.build_ffmpeg_args();
        assert_eq!(args.iter().filter(|a| *a == "-i").count(), 1);
        assert!(args.contains(&"-an".to_string()));
        assert!(!args.contains(&"-vf".to_string()));
        assert_eq!(args[args.len() - 2], "matroska");
    }

    #[test]
    fn bitrate_overrides_quality() {
        let config = BlurConfig {
            bitrate: 10_000,
            ..Default::default()
        };
        let args = settings(&config).build_ffmpeg_args();
        assert_eq!(value_after(&args, "-b:v"), Some("10000k"));
        assert_eq!(value_after(&args, "-maxrate"), Some("12000k"));
        assert_eq!(value_after(&args, "-bufsize"), Some("20000k"));
        assert!(!args.contains(&"-crf".to_string()));
    }

    #[test]
    fn hardware_encoders_use_vendor_quality_flags() {
        let config = BlurConfig {
            gpu_encoding: true,
            codec: VideoCodec::H265,
            quality: 24,
            ..Default::default()
        };
        let args = settings(&config).build_ffmpeg_args();
        assert_eq!(value_after(&args, "-c:v"), Some("hevc_nvenc"));
        assert_eq!(value_after(&args, "-cq"), Some("24"));
        assert_eq!(value_after(&args, "-preset"), Some("p4"));
        assert!(!args.contains(&"-crf".to_string()));

        let config = BlurConfig {
            gpu_type: GpuVendor::Intel,
            ..config
        };
        let args = settings(&config).build_ffmpeg_args();
        assert_eq!(value_after(&args, "-c:v"), Some("hevc_qsv"));
        assert_eq!(value_after(&args, "-global_quality"), Some("24"));
    }

    #[test]
    fn encoder_names_cover_every_codec() {
        assert_eq!(encoder_name(VideoCodec::Av1, None), "libsvtav1");
        assert_eq!(encoder_name(VideoCodec::Vp9, None), "libvpx-vp9");
        assert_eq!(encoder_name(VideoCodec::Vp9, Some(GpuVendor::Nvidia)), "libvpx-vp9");
        assert_eq!(encoder_name(VideoCodec::H264, Some(GpuVendor::Amd)), "h264_amf");
    }

    #[test]
    fn timescale_speeds_up_video_and_retimes_audio() {
        let config = BlurConfig {
            timescale: 2.0,
            threads: 4,
            ..Default::default()
        };
        let settings = settings(&config);
        assert_eq!(settings.input_fps, 600.0);
        assert_eq!(settings.audio, AudioPlan::Filter("atempo=2".to_string()));

        let args = settings.build_ffmpeg_args();
        assert_eq!(value_after(&args, "-af"), Some("atempo=2"));
        assert_eq!(value_after(&args, "-c:a"), Some("aac"));
        assert_eq!(value_after(&args, "-threads"), Some("4"));
    }

    #[test]
    fn pitch_shift_uses_sample_rate() {
        let config = BlurConfig {
            timescale: 0.5,
            pitch_correction: false,
            ..Default::default()
        };
        assert_eq!(
            AudioPlan::from_config(&config, &info(true)),
            AudioPlan::Filter("asetrate=22050,aresample=44100".to_string())
        );
    }

    #[test]
    fn large_tempo_changes_are_chained() {
        assert_eq!(atempo_chain(5.0), "atempo=2,atempo=2,atempo=1.25");
        assert_eq!(atempo_chain(0.2), "atempo=0.5,atempo=0.5,atempo=0.8");
    }

    #[cfg(unix)]
    #[test]
    fn sink_writes_packed_frames_and_rejects_wrong_size() {
        let mut child = std::process::Command::new("cat")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn mock encoder process");
        let stdin = child.stdin.take().expect("mock child stdin must be piped");
        let mut encoder = FfmpegEncoder::from_parts(child, stdin, None, 4, 2);

        let frame = FrameBuffer::new(4, 2, 0).unwrap();
        encoder.submit(&frame).expect("matching frame should be written");

        let wrong = FrameBuffer::new(8, 2, 1).unwrap();
        assert!(matches!(encoder.submit(&wrong), Err(SubmitError::Rejected(_))));

        encoder.flush().expect("mock encoder should finish successfully");
        assert_eq!(encoder.frames_written(), 1);
    }

    #[cfg(unix)]
    fn encoder_writing_to(path: &Path, width: u32, height: u32) -> FfmpegEncoder {
        let mut child = std::process::Command::new("sh")
            .arg("-c")
            .arg("cat > \"$0\"")
            .arg(path)
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn mock encoder process");
        let stdin = child.stdin.take().expect("mock child stdin must be piped");
        FfmpegEncoder::from_parts(child, stdin, None, width, height)
    }

    #[cfg(unix)]
    fn luma_frame(luma: u8, pts: i64) -> FrameBuffer {
        let mut frame = FrameBuffer::new(4, 2, pts).unwrap();
        frame.fill(luma, 128, 128);
        frame
    }

    #[cfg(unix)]
    #[test]
    fn pts_gaps_are_filled_with_the_previous_frame() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = dir.path().join("wire.yuv");
        let mut encoder = encoder_writing_to(&raw, 4, 2);

        for (luma, pts) in [(10, 0), (20, 10), (30, 11)] {
            encoder.submit(&luma_frame(luma, pts)).expect("frame written");
        }
        encoder.flush().expect("mock encoder should finish successfully");
        assert_eq!(encoder.frames_written(), 12);
        assert_eq!(encoder.frames_repeated(), 9);

        let frame_len = FrameBuffer::packed_len(4, 2);
        let bytes = std::fs::read(&raw).expect("wire output");
        assert_eq!(bytes.len(), 12 * frame_len);
        let lumas: Vec<u8> = bytes.chunks(frame_len).map(|chunk| chunk[0]).collect();
        let mut expected = vec![10u8; 10];
        expected.extend([20, 30]);
        assert_eq!(lumas, expected);
    }

    #[cfg(unix)]
    #[test]
    fn first_frame_covers_the_lead_in() {
        let dir = tempfile::tempdir().expect("tempdir");
        let raw = dir.path().join("wire.yuv");
        let mut encoder = encoder_writing_to(&raw, 4, 2);

        encoder.submit(&luma_frame(70, 2)).expect("frame written");
        encoder.submit(&luma_frame(80, 3)).expect("frame written");
        assert!(matches!(
            encoder.submit(&luma_frame(90, 3)),
            Err(SubmitError::Rejected(_))
        ));
        encoder.flush().expect("mock encoder should finish successfully");

        let frame_len = FrameBuffer::packed_len(4, 2);
        let bytes = std::fs::read(&raw).expect("wire output");
        let lumas: Vec<u8> = bytes.chunks(frame_len).map(|chunk| chunk[0]).collect();
        assert_eq!(lumas, vec![70, 70, 70, 80]);
    }

    #[cfg(unix)]
    #[test]
    fn dead_encoder_reports_io_error() {
        let mut child = std::process::Command::new("true")
            .stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("failed to spawn mock encoder process");
        let stdin = child.stdin.take().expect("mock child stdin must be piped");
        child.wait().expect("mock child should exit");
        let mut encoder = FfmpegEncoder::from_parts(child, stdin, None, 4, 2);

        let frame = FrameBuffer::new(4, 2, 0).unwrap();
        assert!(matches!(encoder.submit(&frame), Err(SubmitError::Io(_))));
    }
}
