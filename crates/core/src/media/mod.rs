//! ffmpeg/ffprobe subprocess glue: probing, decoding to raw yuv420p frames
//! and encoding them back out with the source audio.

pub mod decode;
pub mod encode;
pub mod probe;

use std::io::{BufRead, BufReader};
use std::process::ChildStderr;
use std::thread::{self, JoinHandle};

use tracing::debug;

use crate::logging::{FFMPEG_DECODE_TARGET, FFMPEG_ENCODE_TARGET};

pub use decode::{DecoderSettings, FfmpegDecoder};
pub use encode::{AudioPlan, EncoderSettings, FfmpegEncoder};
pub use probe::{probe_video, VideoInfo};

#[derive(Debug, Clone, Copy)]
enum StderrTarget {
    Decode,
    Encode,
}

/// Drains a child's stderr on a background thread so ffmpeg never blocks on a full pipe.
fn spawn_stderr_drain(stderr: ChildStderr, target: StderrTarget) -> JoinHandle<()> {
    thread::spawn(move || {
        let reader = BufReader::new(stderr);
        for line in reader.lines() {
            match (line, target) {
                (Ok(line), _) if line.is_empty() => {}
                (Ok(line), StderrTarget::Decode) => {
                    debug!(target: FFMPEG_DECODE_TARGET, "{}", line);
                }
                (Ok(line), StderrTarget::Encode) => {
                    debug!(target: FFMPEG_ENCODE_TARGET, "{}", line);
                }
                (Err(e), StderrTarget::Decode) => {
                    debug!(target: FFMPEG_DECODE_TARGET, "stderr read error: {}", e);
                    break;
                }
                (Err(e), StderrTarget::Encode) => {
                    debug!(target: FFMPEG_ENCODE_TARGET, "stderr read error: {}", e);
                    break;
                }
            }
        }
    })
}

/// Formats a frame rate for ffmpeg arguments without trailing zeros.
pub(crate) fn format_rate(fps: f64) -> String {
    let formatted = format!("{fps:.3}");
    formatted
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}
