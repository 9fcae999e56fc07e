use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{anyhow, bail, Context, Result};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::blend::TemporalBlender;
use crate::dedup::DuplicateFilter;
use crate::frame::FrameBuffer;
use crate::frame_queue::{BoundedFrameQueue, DEFAULT_QUEUE_CAPACITY, DEFAULT_WAIT_SLICE};
use crate::logging::STAGE_SUMMARY_TARGET;
use crate::weights::MAX_WINDOW;

pub const DEFAULT_PROGRESS_INTERVAL: u64 = 30;
const WEIGHT_SUM_TOLERANCE: f32 = 1e-3;

/// Outcome of a single [`FrameSource::read_frame`] call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeStatus {
    Frame,
    /// The source produced something that is not a usable picture. The
    /// pipeline skips it and keeps reading.
    Corrupt(String),
    EndOfStream,
}

pub trait FrameSource: Send + 'static {
    /// Decodes the next picture into `frame`, reusing its storage.
    fn read_frame(&mut self, frame: &mut FrameBuffer) -> Result<DecodeStatus>;

    /// Called once after the last successful read. Reports abnormal
    /// termination of the underlying decoder.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// In-place per-frame transform applied between decoding and queueing.
pub trait FrameFilter: Send {
    fn name(&self) -> &str;
    fn apply(&mut self, frame: &mut FrameBuffer) -> Result<()>;
}

#[derive(Debug, Error)]
pub enum SubmitError {
    /// The encoder refused this frame but can take the next one.
    #[error("encoder rejected frame: {0}")]
    Rejected(String),
    #[error("encoder I/O failed")]
    Io(#[from] std::io::Error),
}

pub trait FrameSink: Send + 'static {
    fn submit(&mut self, frame: &FrameBuffer) -> Result<(), SubmitError>;

    /// Signals end of stream and waits for buffered output to be written.
    fn flush(&mut self) -> Result<()>;
}

pub trait ProgressObserver: Send {
    fn on_progress(&self, processed: u64);
}

impl<F> ProgressObserver for F
where
    F: Fn(u64) + Send,
{
    fn on_progress(&self, processed: u64) {
        self(processed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DedupSettings {
    pub range: usize,
    pub threshold: f32,
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Normalized blend weights; the window size is their count.
    pub weights: Vec<f32>,
    pub queue_capacity: usize,
    pub dedup: Option<DedupSettings>,
    pub progress_interval: u64,
    pub wait_slice: Duration,
}

impl PipelineConfig {
    pub fn new(weights: Vec<f32>) -> Self {
        Self {
            weights,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            dedup: None,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            wait_slice: DEFAULT_WAIT_SLICE,
        }
    }

    pub fn with_dedup(mut self, range: usize, threshold: f32) -> Self {
        self.dedup = Some(DedupSettings { range, threshold });
        self
    }

    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    pub fn with_wait_slice(mut self, wait_slice: Duration) -> Self {
        self.wait_slice = wait_slice;
        self
    }

    pub fn with_progress_interval(mut self, interval: u64) -> Self {
        self.progress_interval = interval;
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineSummary {
    pub frames_decoded: u64,
    pub frames_corrupt: u64,
    pub frames_accepted: u64,
    pub duplicates_dropped: u64,
    pub frames_emitted: u64,
    pub encode_failures: u64,
    pub cancelled: bool,
}

#[derive(Debug, Default)]
struct DecodeStats {
    frames_decoded: u64,
    frames_corrupt: u64,
    decode_ms: f64,
    filter_ms: f64,
    push_wait_ms: f64,
}

#[derive(Debug, Default)]
struct ProcessingStats {
    frames_accepted: u64,
    duplicates_dropped: u64,
    frames_emitted: u64,
    encode_failures: u64,
    pop_wait_ms: f64,
    blend_ms: f64,
    submit_ms: f64,
}

/// Decode → queue → dedup → blend → encode, on two blocking workers.
pub struct BlurPipeline {
    config: PipelineConfig,
}

impl BlurPipeline {
    pub fn new(config: PipelineConfig) -> Result<Self> {
        let window = config.weights.len();
        if window == 0 || window > MAX_WINDOW {
            bail!("blend window must hold between 1 and {MAX_WINDOW} frames, got {window}");
        }
        if config
            .weights
            .iter()
            .any(|weight| !weight.is_finite() || *weight < 0.0)
        {
            bail!("blend weights must be finite and non-negative");
        }
        let sum: f32 = config.weights.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!("blend weights must sum to 1.0, got {sum}");
        }

        let mut config = config;
        config.progress_interval = config.progress_interval.max(1);
        Ok(Self { config })
    }

    pub fn window(&self) -> usize {
        self.config.weights.len()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs the pipeline to completion, cancellation, or the first fatal error.
    ///
    /// Cancellation through `cancel` is an orderly shutdown: the sink is still
    /// flushed and the returned summary has `cancelled` set.
    pub async fn run<S, K>(
        &self,
        source: S,
        filters: Vec<Box<dyn FrameFilter>>,
        sink: K,
        cancel: CancellationToken,
        progress: Option<Box<dyn ProgressObserver>>,
    ) -> Result<PipelineSummary>
    where
        S: FrameSource,
        K: FrameSink,
    {
        if cancel.is_cancelled() {
            return Ok(PipelineSummary {
                cancelled: true,
                ..Default::default()
            });
        }

        let run_cancel = cancel.child_token();
        let queue = Arc::new(BoundedFrameQueue::with_wait_slice(
            self.config.queue_capacity,
            run_cancel.clone(),
            self.config.wait_slice,
        ));
        let processing = ProcessingLoop::new(&self.config, sink, progress)?;
        let (error_tx, mut error_rx) = mpsc::unbounded_channel::<anyhow::Error>();

        let watcher = spawn_cancel_watcher(run_cancel.clone(), queue.clone());
        let decode_handle = spawn_decode_stage(
            source,
            filters,
            queue.clone(),
            run_cancel.clone(),
            error_tx.clone(),
        );
        let processing_handle =
            spawn_processing_stage(processing, queue, run_cancel.clone(), error_tx.clone());
        drop(error_tx);

        let mut first_error: Option<anyhow::Error> = None;

        let decode_stats = match decode_handle.await {
            Ok(stats) => stats,
            Err(join_error) => {
                run_cancel.cancel();
                first_error.get_or_insert_with(|| anyhow!("decode task panicked: {join_error}"));
                DecodeStats::default()
            }
        };
        let processing_stats = match processing_handle.await {
            Ok(stats) => stats,
            Err(join_error) => {
                run_cancel.cancel();
                first_error
                    .get_or_insert_with(|| anyhow!("processing task panicked: {join_error}"));
                ProcessingStats::default()
            }
        };

        while let Some(error) = error_rx.recv().await {
            if first_error.is_none() {
                first_error = Some(error);
            }
        }

        run_cancel.cancel();
        if let Err(join_error) = watcher.await {
            if first_error.is_none() {
                first_error = Some(anyhow!("cancel watcher failed: {join_error}"));
            }
        }

        if let Some(error) = first_error {
            return Err(error);
        }

        Ok(PipelineSummary {
            frames_decoded: decode_stats.frames_decoded,
            frames_corrupt: decode_stats.frames_corrupt,
            frames_accepted: processing_stats.frames_accepted,
            duplicates_dropped: processing_stats.duplicates_dropped,
            frames_emitted: processing_stats.frames_emitted,
            encode_failures: processing_stats.encode_failures,
            cancelled: cancel.is_cancelled(),
        })
    }
}

fn spawn_cancel_watcher(
    cancel: CancellationToken,
    queue: Arc<BoundedFrameQueue>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        cancel.cancelled().await;
        queue.interrupt();
    })
}

fn spawn_decode_stage<S>(
    mut source: S,
    mut filters: Vec<Box<dyn FrameFilter>>,
    queue: Arc<BoundedFrameQueue>,
    cancel: CancellationToken,
    error_tx: mpsc::UnboundedSender<anyhow::Error>,
) -> tokio::task::JoinHandle<DecodeStats>
where
    S: FrameSource,
{
    tokio::task::spawn_blocking(move || {
        let mut stats = DecodeStats::default();
        let result = run_decode_loop(&mut source, &mut filters, &queue, &cancel, &mut stats)
            .and_then(|()| {
                if cancel.is_cancelled() {
                    Ok(())
                } else {
                    source.finish().context("decoder did not finish cleanly")
                }
            });
        if let Err(error) = result {
            report_task_error(&error_tx, &cancel, error.context("decode stage failed"));
        }
        queue.signal_finished();
        stats
    })
}

fn spawn_processing_stage<K>(
    mut processing: ProcessingLoop<K>,
    queue: Arc<BoundedFrameQueue>,
    cancel: CancellationToken,
    error_tx: mpsc::UnboundedSender<anyhow::Error>,
) -> tokio::task::JoinHandle<ProcessingStats>
where
    K: FrameSink,
{
    tokio::task::spawn_blocking(move || {
        // Stops the producer if this stage unwinds.
        let _stop_producer = cancel.clone().drop_guard();
        if let Err(error) = processing.run(&queue, &cancel) {
            report_task_error(&error_tx, &cancel, error.context("processing stage failed"));
        }
        processing.into_stats()
    })
}

fn run_decode_loop<S>(
    source: &mut S,
    filters: &mut [Box<dyn FrameFilter>],
    queue: &BoundedFrameQueue,
    cancel: &CancellationToken,
    stats: &mut DecodeStats,
) -> Result<()>
where
    S: FrameSource,
{
    let mut frame = FrameBuffer::default();

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let t_decode = Instant::now();
        let status = source
            .read_frame(&mut frame)
            .with_context(|| format!("failed to decode frame {}", stats.frames_decoded))?;
        stats.decode_ms += elapsed_ms(t_decode);

        match status {
            DecodeStatus::Frame => {}
            DecodeStatus::EndOfStream => break,
            DecodeStatus::Corrupt(reason) => {
                stats.frames_corrupt += 1;
                warn!(
                    after_frame = stats.frames_decoded,
                    %reason,
                    "Skipping undecodable frame"
                );
                continue;
            }
        }
        stats.frames_decoded += 1;

        let t_filter = Instant::now();
        for filter in filters.iter_mut() {
            filter.apply(&mut frame).with_context(|| {
                format!("filter '{}' failed on frame pts {}", filter.name(), frame.pts())
            })?;
        }
        stats.filter_ms += elapsed_ms(t_filter);

        let t_push = Instant::now();
        if !queue.push(&frame)? {
            break;
        }
        stats.push_wait_ms += elapsed_ms(t_push);
    }

    let frames = stats.frames_decoded;
    if frames > 0 {
        tracing::info!(
            target: STAGE_SUMMARY_TARGET,
            frames,
            corrupt = stats.frames_corrupt,
            avg_decode_ms = format!("{:.1}", stats.decode_ms / frames as f64),
            avg_filter_ms = format!("{:.1}", stats.filter_ms / frames as f64),
            avg_push_wait_ms = format!("{:.1}", stats.push_wait_ms / frames as f64),
            total_decode_ms = format!("{:.0}", stats.decode_ms),
            "Decode stage summary"
        );
    }

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProcessingState {
    WaitFrame,
    DedupCheck,
    Accumulate,
    BlendEmit,
    ProgressUpdate,
    Drain,
    Terminate,
}

struct ProcessingLoop<K> {
    blender: TemporalBlender,
    weights: Vec<f32>,
    dedup: Option<(DuplicateFilter, DedupSettings)>,
    sink: K,
    progress: Option<Box<dyn ProgressObserver>>,
    progress_interval: u64,
    current: FrameBuffer,
    blended: FrameBuffer,
    last_reported: u64,
    stats: ProcessingStats,
}

impl<K: FrameSink> ProcessingLoop<K> {
    fn new(
        config: &PipelineConfig,
        sink: K,
        progress: Option<Box<dyn ProgressObserver>>,
    ) -> Result<Self> {
        Ok(Self {
            blender: TemporalBlender::new(config.weights.len())?,
            weights: config.weights.clone(),
            dedup: config
                .dedup
                .map(|settings| (DuplicateFilter::new(), settings)),
            sink,
            progress,
            progress_interval: config.progress_interval,
            current: FrameBuffer::default(),
            blended: FrameBuffer::default(),
            last_reported: 0,
            stats: ProcessingStats::default(),
        })
    }

    fn run(&mut self, queue: &BoundedFrameQueue, cancel: &CancellationToken) -> Result<()> {
        let mut state = ProcessingState::WaitFrame;

        loop {
            if cancel.is_cancelled()
                && !matches!(state, ProcessingState::Drain | ProcessingState::Terminate)
            {
                debug!(?state, "Cancellation observed; draining");
                state = ProcessingState::Drain;
            }

            state = match state {
                ProcessingState::WaitFrame => {
                    let t_pop = Instant::now();
                    let popped = queue.pop(&mut self.current);
                    self.stats.pop_wait_ms += elapsed_ms(t_pop);
                    if popped {
                        ProcessingState::DedupCheck
                    } else {
                        ProcessingState::Drain
                    }
                }
                ProcessingState::DedupCheck => {
                    let duplicate = match &mut self.dedup {
                        Some((filter, settings)) => filter.should_drop(
                            &self.current,
                            settings.range,
                            settings.threshold,
                        )?,
                        None => false,
                    };
                    if duplicate {
                        self.stats.duplicates_dropped += 1;
                        ProcessingState::WaitFrame
                    } else {
                        ProcessingState::Accumulate
                    }
                }
                ProcessingState::Accumulate => {
                    self.blender.push(&self.current)?;
                    self.stats.frames_accepted += 1;
                    ProcessingState::BlendEmit
                }
                ProcessingState::BlendEmit => {
                    if self.blender.is_ready() {
                        self.emit(cancel)?;
                    }
                    ProcessingState::ProgressUpdate
                }
                ProcessingState::ProgressUpdate => {
                    if self.stats.frames_accepted % self.progress_interval == 0 {
                        self.report_progress();
                    }
                    ProcessingState::WaitFrame
                }
                ProcessingState::Drain => {
                    self.drain(cancel)?;
                    ProcessingState::Terminate
                }
                ProcessingState::Terminate => break,
            };
        }

        self.log_summary();
        Ok(())
    }

    fn emit(&mut self, cancel: &CancellationToken) -> Result<()> {
        let t_blend = Instant::now();
        self.blender.blend_into(&self.weights, &mut self.blended)?;
        self.stats.blend_ms += elapsed_ms(t_blend);

        if cancel.is_cancelled() {
            return Ok(());
        }

        let pts = self.blended.pts();
        let t_submit = Instant::now();
        let submitted = self.sink.submit(&self.blended);
        self.stats.submit_ms += elapsed_ms(t_submit);

        match submitted {
            Ok(()) => self.stats.frames_emitted += 1,
            Err(SubmitError::Rejected(reason)) => {
                self.stats.encode_failures += 1;
                debug!(pts, %reason, "Encoder rejected blended frame; skipping");
            }
            Err(error @ SubmitError::Io(_)) => {
                return Err(anyhow::Error::new(error)
                    .context(format!("failed to submit blended frame pts {pts}")));
            }
        }
        Ok(())
    }

    fn report_progress(&mut self) {
        if let Some(progress) = &self.progress {
            progress.on_progress(self.stats.frames_accepted);
        }
        self.last_reported = self.stats.frames_accepted;
    }

    fn drain(&mut self, cancel: &CancellationToken) -> Result<()> {
        if self.stats.frames_accepted != self.last_reported {
            self.report_progress();
        }

        match self.sink.flush() {
            Ok(()) => Ok(()),
            Err(error) if cancel.is_cancelled() => {
                debug!(error = %format!("{error:#}"), "Ignoring encoder flush failure after cancellation");
                Ok(())
            }
            Err(error) => Err(error.context("failed to flush encoder")),
        }
    }

    fn log_summary(&self) {
        let stats = &self.stats;
        let accepted = stats.frames_accepted.max(1) as f64;
        tracing::info!(
            target: STAGE_SUMMARY_TARGET,
            accepted = stats.frames_accepted,
            duplicates = stats.duplicates_dropped,
            emitted = stats.frames_emitted,
            window = self.blender.window(),
            avg_pop_wait_ms = format!("{:.1}", stats.pop_wait_ms / accepted),
            avg_blend_ms = format!("{:.1}", stats.blend_ms / stats.frames_emitted.max(1) as f64),
            total_submit_ms = format!("{:.0}", stats.submit_ms),
            "Processing stage summary"
        );
        if stats.encode_failures > 0 {
            warn!(
                failures = stats.encode_failures,
                "Encoder rejected some blended frames"
            );
        }
    }

    fn into_stats(self) -> ProcessingStats {
        self.stats
    }
}

fn elapsed_ms(start: Instant) -> f64 {
    start.elapsed().as_secs_f64() * 1000.0
}

fn report_task_error(
    error_tx: &mpsc::UnboundedSender<anyhow::Error>,
    cancel: &CancellationToken,
    error: anyhow::Error,
) {
    cancel.cancel();
    let _ = error_tx.send(error);
}
