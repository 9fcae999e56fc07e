//! Core crate for blurline: frame buffers, temporal blending and the
//! decode/blend/encode pipeline.

pub mod blend;
pub mod config;
pub mod dedup;
pub mod filters;
pub mod frame;
pub mod frame_queue;
pub mod logging;
pub mod media;
pub mod pipeline;
pub mod runtime;
pub mod weights;

pub use blend::TemporalBlender;
pub use config::BlurConfig;
pub use frame::FrameBuffer;
pub use pipeline::{BlurPipeline, PipelineConfig, PipelineSummary};
