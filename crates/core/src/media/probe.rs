use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;

use anyhow::{anyhow, bail, Context, Result};
use serde::Deserialize;
use tracing::{debug, warn};

const FALLBACK_FPS: f64 = 30.0;

// ---------------------------------------------------------------------------
// ffprobe JSON model (serde)
// ---------------------------------------------------------------------------

#[derive(Deserialize, Debug)]
pub struct FfprobeOutput {
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Deserialize, Debug)]
struct FfprobeStream {
    index: usize,
    codec_name: Option<String>,
    codec_type: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    pix_fmt: Option<String>,
    r_frame_rate: Option<String>,
    avg_frame_rate: Option<String>,
    nb_frames: Option<String>,
    duration: Option<String>,
    sample_rate: Option<String>,
    #[serde(default)]
    disposition: HashMap<String, serde_json::Value>,
}

#[derive(Deserialize, Debug, Default)]
struct FfprobeFormat {
    duration: Option<String>,
}

/// What the pipeline needs to know about the input before starting.
#[derive(Debug, Clone, PartialEq)]
pub struct VideoInfo {
    pub stream_index: usize,
    pub width: u32,
    pub height: u32,
    pub fps: f64,
    /// Container-reported count, or an estimate from duration and rate.
    pub frame_count: Option<u64>,
    pub duration: Option<f64>,
    pub codec_name: String,
    pub pix_fmt: String,
    pub has_audio: bool,
    pub audio_sample_rate: Option<u32>,
}

impl VideoInfo {
    /// Largest even width and height not exceeding the source size.
    pub fn even_dimensions(&self) -> (u32, u32) {
        (self.width & !1, self.height & !1)
    }
}

fn parse_frame_rate(s: &str) -> Option<f64> {
    let parts: Vec<&str> = s.split('/').collect();
    if parts.len() == 2 {
        let num: f64 = parts[0].parse().ok()?;
        let den: f64 = parts[1].parse().ok()?;
        if den > 0.0 && num > 0.0 {
            return Some(num / den);
        }
        return None;
    }
    s.parse::<f64>().ok().filter(|fps| *fps > 0.0)
}

fn disposition_flag(stream: &FfprobeStream, key: &str) -> bool {
    stream
        .disposition
        .get(key)
        .and_then(|value| {
            value
                .as_bool()
                .or_else(|| value.as_i64().map(|n| n != 0))
                .or_else(|| value.as_str().map(|s| s != "0"))
        })
        .unwrap_or(false)
}

fn select_primary_video_stream(streams: &[FfprobeStream]) -> Option<&FfprobeStream> {
    streams
        .iter()
        .filter(|stream| stream.codec_type.as_deref() == Some("video"))
        .min_by_key(|stream| {
            let is_attached_picture = disposition_flag(stream, "attached_pic");
            let is_default = disposition_flag(stream, "default");
            (is_attached_picture, !is_default, stream.index)
        })
}

fn parse_seconds(value: Option<&str>) -> Option<f64> {
    value
        .and_then(|s| s.parse::<f64>().ok())
        .filter(|secs| secs.is_finite() && *secs > 0.0)
}

pub fn run_ffprobe(path: &Path) -> Result<FfprobeOutput> {
    let output = crate::runtime::command_for("ffprobe")
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_format",
            "-show_streams",
        ])
        .arg(path)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .context("failed to execute ffprobe; is FFmpeg installed?")?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        bail!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        );
    }

    parse_ffprobe_json(&output.stdout)
}

pub fn parse_ffprobe_json(json: &[u8]) -> Result<FfprobeOutput> {
    serde_json::from_slice(json).context("failed to parse ffprobe JSON")
}

pub fn extract_video_info(probe: &FfprobeOutput) -> Result<VideoInfo> {
    let video_stream = select_primary_video_stream(&probe.streams)
        .ok_or_else(|| anyhow!("no video stream found"))?;

    let width = video_stream
        .width
        .filter(|w| *w > 0)
        .ok_or_else(|| anyhow!("video stream missing width"))?;
    let height = video_stream
        .height
        .filter(|h| *h > 0)
        .ok_or_else(|| anyhow!("video stream missing height"))?;
    if width < 2 || height < 2 {
        bail!("video stream is too small to process ({width}x{height})");
    }

    let fps = [&video_stream.r_frame_rate, &video_stream.avg_frame_rate]
        .into_iter()
        .filter_map(|rate| rate.as_deref().and_then(parse_frame_rate))
        .next();
    let fps = match fps {
        Some(fps) => fps,
        None => {
            warn!("could not determine frame rate, defaulting to {FALLBACK_FPS}");
            FALLBACK_FPS
        }
    };

    let duration = parse_seconds(video_stream.duration.as_deref())
        .or_else(|| parse_seconds(probe.format.duration.as_deref()));
    let frame_count = video_stream
        .nb_frames
        .as_deref()
        .and_then(|n| n.parse::<u64>().ok())
        .filter(|n| *n > 0)
        .or_else(|| duration.map(|secs| (secs * fps).round() as u64));

    let audio = probe
        .streams
        .iter()
        .find(|stream| stream.codec_type.as_deref() == Some("audio"));

    Ok(VideoInfo {
        stream_index: video_stream.index,
        width,
        height,
        fps,
        frame_count,
        duration,
        codec_name: video_stream
            .codec_name
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        pix_fmt: video_stream
            .pix_fmt
            .clone()
            .unwrap_or_else(|| "unknown".to_string()),
        has_audio: audio.is_some(),
        audio_sample_rate: audio
            .and_then(|stream| stream.sample_rate.as_deref())
            .and_then(|rate| rate.parse().ok()),
    })
}

/// Probes `path` with ffprobe and summarizes its primary video stream.
pub fn probe_video(path: &Path) -> Result<VideoInfo> {
    if !path.exists() {
        bail!("input file does not exist: {}", path.display());
    }

    debug!(path = %path.display(), "running ffprobe");
    let probe = run_ffprobe(path)?;
    let info = extract_video_info(&probe)
        .with_context(|| format!("unsupported input: {}", path.display()))?;

    debug!(
        stream_index = info.stream_index,
        width = info.width,
        height = info.height,
        fps = info.fps,
        frames = ?info.frame_count,
        codec = %info.codec_name,
        pix_fmt = %info.pix_fmt,
        has_audio = info.has_audio,
        "video input probed"
    );
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_FFPROBE_JSON: &str = r#"{
        "streams": [
            {
                "index": 0,
                "codec_name": "h264",
                "codec_type": "video",
                "width": 1920,
                "height": 1080,
                "pix_fmt": "yuv420p",
                "r_frame_rate": "60/1",
                "avg_frame_rate": "60/1",
                "nb_frames": "3600",
                "duration": "60.000000",
                "disposition": {"default": 1}
            },
            {
                "index": 1,
                "codec_name": "aac",
                "codec_type": "audio",
                "sample_rate": "48000",
                "disposition": {"default": 1}
            }
        ],
        "format": {
            "format_name": "mov,mp4,m4a,3gp,3g2,mj2",
            "duration": "60.021333"
        }
    }"#;

    #[test]
    fn extracts_primary_stream_details() {
        let probe = parse_ffprobe_json(SAMPLE_FFPROBE_JSON.as_bytes()).unwrap();
        let info = extract_video_info(&probe).unwrap();

        assert_eq!(info.stream_index, 0);
        assert_eq!((info.width, info.height), (1920, 1080));
        assert_eq!(info.fps, 60.0);
        assert_eq!(info.frame_count, Some(3600));
        assert_eq!(info.duration, Some(60.0));
        assert_eq!(info.codec_name, "h264");
        assert!(info.has_audio);
        assert_eq!(info.audio_sample_rate, Some(48000));
    }

    #[test]
    fn estimates_frame_count_from_container_duration() {
        let json = r#"{
            "streams": [{
                "index": 0,
                "codec_name": "vp9",
                "codec_type": "video",
                "width": 1280, "height": 720,
                "r_frame_rate": "30000/1001"
            }],
            "format": {"duration": "10.010000"}
        }"#;
        let info = extract_video_info(&parse_ffprobe_json(json.as_bytes()).unwrap()).unwrap();
        assert!((info.fps - 29.97).abs() < 0.01);
        assert_eq!(info.frame_count, Some(300));
        assert!(!info.has_audio);
        assert_eq!(info.pix_fmt, "unknown");
    }

    #[test]
    fn prefers_non_attached_picture_video_stream() {
        let json = r#"{
            "streams": [
                {
                    "index": 0,
                    "codec_name": "mjpeg",
                    "codec_type": "video",
                    "width": 600, "height": 600,
                    "r_frame_rate": "90000/1",
                    "disposition": {"attached_pic": 1}
                },
                {
                    "index": 2,
                    "codec_name": "hevc",
                    "codec_type": "video",
                    "width": 2560, "height": 1440,
                    "r_frame_rate": "120/1",
                    "disposition": {"attached_pic": 0, "default": 1}
                }
            ]
        }"#;
        let info = extract_video_info(&parse_ffprobe_json(json.as_bytes()).unwrap()).unwrap();
        assert_eq!(info.stream_index, 2);
        assert_eq!(info.fps, 120.0);
        assert_eq!(info.frame_count, None);
    }

    #[test]
    fn falls_back_to_average_rate_then_default() {
        let json = r#"{
            "streams": [{
                "index": 0, "codec_type": "video", "width": 640, "height": 480,
                "r_frame_rate": "0/0", "avg_frame_rate": "25/1"
            }]
        }"#;
        let info = extract_video_info(&parse_ffprobe_json(json.as_bytes()).unwrap()).unwrap();
        assert_eq!(info.fps, 25.0);

        let json = r#"{
            "streams": [{
                "index": 0, "codec_type": "video", "width": 640, "height": 480,
                "r_frame_rate": "0/0"
            }]
        }"#;
        let info = extract_video_info(&parse_ffprobe_json(json.as_bytes()).unwrap()).unwrap();
        assert_eq!(info.fps, FALLBACK_FPS);
    }

    #[test]
    fn audio_only_input_is_rejected() {
        let json = r#"{
            "streams": [{"index": 0, "codec_name": "mp3", "codec_type": "audio"}],
            "format": {"format_name": "mp3"}
        }"#;
        let error = extract_video_info(&parse_ffprobe_json(json.as_bytes()).unwrap()).unwrap_err();
        assert!(error.to_string().contains("no video stream"));
    }

    #[test]
    fn odd_dimensions_round_down_to_even() {
        let json = r#"{
            "streams": [{
                "index": 0, "codec_type": "video", "width": 1281, "height": 721,
                "r_frame_rate": "30/1"
            }]
        }"#;
        let info = extract_video_info(&parse_ffprobe_json(json.as_bytes()).unwrap()).unwrap();
        assert_eq!(info.even_dimensions(), (1280, 720));
    }

    #[test]
    fn parse_frame_rate_handles_rationals() {
        assert!((parse_frame_rate("24000/1001").unwrap() - 23.976).abs() < 0.01);
        assert_eq!(parse_frame_rate("30/1"), Some(30.0));
        assert_eq!(parse_frame_rate("50"), Some(50.0));
        assert!(parse_frame_rate("0/0").is_none());
        assert!(parse_frame_rate("abc").is_none());
    }

    #[test]
    fn missing_input_is_reported_before_probing() {
        let error = probe_video(Path::new("/nonexistent/clip.mp4")).unwrap_err();
        assert!(error.to_string().contains("does not exist"));
    }
}
