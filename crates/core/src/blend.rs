use thiserror::Error;

use crate::frame::{FrameBuffer, FrameError};
use crate::weights::{MAX_WINDOW, MIN_WINDOW};

#[derive(Debug, Error)]
pub enum BlendError {
    #[error("blend window must hold between 1 and 64 frames, got {0}")]
    WindowSize(usize),
    #[error("expected {expected} blend weights, got {actual}")]
    WeightCount { expected: usize, actual: usize },
    #[error("blend window holds {count} of {window} frames")]
    NotReady { count: usize, window: usize },
    #[error(transparent)]
    Frame(#[from] FrameError),
}

/// Circular window of the last K frames and the weighted average over it.
///
/// Slots are allocated on first use and overwritten in place afterwards. The
/// logical order used for blending is oldest to newest, so `weights[0]`
/// applies to the oldest frame in the window.
pub struct TemporalBlender {
    slots: Vec<FrameBuffer>,
    count: usize,
    write_pos: usize,
    accum: Vec<f32>,
}

impl TemporalBlender {
    pub fn new(window: usize) -> Result<Self, BlendError> {
        if !(MIN_WINDOW..=MAX_WINDOW).contains(&window) {
            return Err(BlendError::WindowSize(window));
        }
        Ok(Self {
            slots: (0..window).map(|_| FrameBuffer::default()).collect(),
            count: 0,
            write_pos: 0,
            accum: Vec::new(),
        })
    }

    pub fn window(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn is_ready(&self) -> bool {
        self.count == self.window()
    }

    /// Copies `frame` into the ring, overwriting the oldest frame once full.
    pub fn push(&mut self, frame: &FrameBuffer) -> Result<(), FrameError> {
        let window = self.window();
        self.slots[self.write_pos].copy_from(frame)?;
        self.write_pos = (self.write_pos + 1) % window;
        self.count = (self.count + 1).min(window);
        Ok(())
    }

    /// The `index`-th frame in oldest-to-newest order.
    pub fn frame(&self, index: usize) -> &FrameBuffer {
        let window = self.window();
        let oldest = (self.write_pos + window - self.count) % window;
        &self.slots[(oldest + index) % window]
    }

    pub fn blend(&mut self, weights: &[f32]) -> Result<FrameBuffer, BlendError> {
        let mut out = FrameBuffer::default();
        self.blend_into(weights, &mut out)?;
        Ok(out)
    }

    /// Writes the weighted average of the full window into `out`.
    ///
    /// Every plane is accumulated row by row in `f32`, then rounded and
    /// clamped to 8 bits. The result carries the timestamp of the middle frame.
    pub fn blend_into(&mut self, weights: &[f32], out: &mut FrameBuffer) -> Result<(), BlendError> {
        let window = self.window();
        if !self.is_ready() {
            return Err(BlendError::NotReady {
                count: self.count,
                window,
            });
        }
        if weights.len() != window {
            return Err(BlendError::WeightCount {
                expected: window,
                actual: weights.len(),
            });
        }

        let first = self.frame(0);
        let (width, height) = (first.width(), first.height());
        for index in 1..window {
            let frame = self.frame(index);
            if !frame.same_shape(first) {
                return Err(FrameError::ShapeMismatch {
                    expected_width: width,
                    expected_height: height,
                    width: frame.width(),
                    height: frame.height(),
                }
                .into());
            }
        }
        out.ensure_shape(width, height)?;

        let mut accum = std::mem::take(&mut self.accum);
        for plane_index in 0..3 {
            let plane_height = out.plane(plane_index).height();
            let plane_width = out.plane(plane_index).width();
            accum.resize(plane_width, 0.0);

            for y in 0..plane_height {
                accum.fill(0.0);
                for (index, weight) in weights.iter().enumerate() {
                    let row = self.frame(index).plane(plane_index).row(y);
                    for (acc, px) in accum.iter_mut().zip(row) {
                        *acc += weight * f32::from(*px);
                    }
                }
                for (dst, acc) in out.plane_mut(plane_index).row_mut(y).iter_mut().zip(&accum) {
                    *dst = acc.round().clamp(0.0, 255.0) as u8;
                }
            }
        }
        self.accum = accum;

        out.set_pts(self.frame(window / 2).pts());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::weights::{generate, BlurWeighting};

    fn flat(luma: u8, chroma: u8, pts: i64) -> FrameBuffer {
        let mut frame = FrameBuffer::new(8, 4, pts).expect("allocate frame");
        frame.fill(luma, chroma, 255 - chroma);
        frame
    }

    #[test]
    fn rejects_out_of_range_window() {
        assert!(matches!(TemporalBlender::new(0), Err(BlendError::WindowSize(0))));
        assert!(matches!(TemporalBlender::new(65), Err(BlendError::WindowSize(65))));
        assert!(TemporalBlender::new(64).is_ok());
    }

    #[test]
    fn not_ready_until_window_is_full() {
        let mut blender = TemporalBlender::new(3).unwrap();
        blender.push(&flat(1, 1, 0)).unwrap();
        blender.push(&flat(2, 2, 1)).unwrap();
        assert!(!blender.is_ready());
        assert!(matches!(
            blender.blend(&[0.5, 0.5, 0.0]),
            Err(BlendError::NotReady { count: 2, window: 3 })
        ));
        blender.push(&flat(3, 3, 2)).unwrap();
        assert!(blender.is_ready());
    }

    #[test]
    fn weight_count_must_match_window() {
        let mut blender = TemporalBlender::new(2).unwrap();
        blender.push(&flat(1, 1, 0)).unwrap();
        blender.push(&flat(1, 1, 1)).unwrap();
        assert!(matches!(
            blender.blend(&[1.0]),
            Err(BlendError::WeightCount { expected: 2, actual: 1 })
        ));
    }

    #[test]
    fn uniform_blend_averages_every_plane() {
        let mut blender = TemporalBlender::new(3).unwrap();
        blender.push(&flat(30, 100, 10)).unwrap();
        blender.push(&flat(60, 110, 11)).unwrap();
        blender.push(&flat(90, 120, 12)).unwrap();

        let out = blender.blend(&generate(BlurWeighting::Equal, 3, &[])).unwrap();
        assert!(out.luma().rows().all(|row| row.iter().all(|px| *px == 60)));
        assert!(out.plane(1).rows().all(|row| row.iter().all(|px| *px == 110)));
        assert!(out.plane(2).rows().all(|row| row.iter().all(|px| *px == 145)));
        assert_eq!(out.pts(), 11);
    }

    #[test]
    fn ring_keeps_the_newest_frames_in_order() {
        let mut blender = TemporalBlender::new(3).unwrap();
        for pts in 0..5 {
            blender.push(&flat(pts as u8 * 10, 128, pts)).unwrap();
        }
        assert_eq!(blender.frame(0).pts(), 2);
        assert_eq!(blender.frame(2).pts(), 4);

        // All weight on the oldest frame.
        let out = blender.blend(&[1.0, 0.0, 0.0]).unwrap();
        assert_eq!(out.luma().row(0)[0], 20);
        assert_eq!(out.pts(), 3);
    }

    #[test]
    fn identical_window_reproduces_the_frame() {
        for weighting in BlurWeighting::ALL {
            for k in [1, 2, 5, 16, 64] {
                let mut blender = TemporalBlender::new(k).unwrap();
                let mut source = FrameBuffer::new(6, 4, 0).unwrap();
                for (x, px) in source.plane_mut(0).row_mut(1).iter_mut().enumerate() {
                    *px = (x * 51) as u8;
                }
                for pts in 0..k as i64 {
                    source.set_pts(pts);
                    blender.push(&source).unwrap();
                }

                let out = blender.blend(&generate(weighting, k, &[])).unwrap();
                for plane in 0..3 {
                    assert_eq!(
                        out.plane(plane).rows().collect::<Vec<_>>(),
                        source.plane(plane).rows().collect::<Vec<_>>(),
                        "{weighting} k={k}"
                    );
                }
            }
        }
    }

    #[test]
    fn output_stays_in_range_for_extreme_input() {
        let mut blender = TemporalBlender::new(4).unwrap();
        for luma in [0, 255, 0, 255] {
            blender.push(&flat(luma, 255, 0)).unwrap();
        }
        let out = blender.blend(&generate(BlurWeighting::Ascending, 4, &[])).unwrap();
        // 0.2 * 255 + 0.4 * 255
        assert_eq!(out.luma().row(0)[0], 153);
        assert_eq!(out.plane(1).row(0)[0], 255);
    }

    #[test]
    fn mismatched_frame_sizes_are_rejected() {
        let mut blender = TemporalBlender::new(2).unwrap();
        blender.push(&flat(1, 1, 0)).unwrap();
        blender.push(&FrameBuffer::new(16, 8, 1).unwrap()).unwrap();
        assert!(matches!(
            blender.blend(&[0.5, 0.5]),
            Err(BlendError::Frame(FrameError::ShapeMismatch { .. }))
        ));
    }

    #[test]
    fn blend_into_reuses_output_buffer() {
        let mut blender = TemporalBlender::new(2).unwrap();
        blender.push(&flat(10, 128, 0)).unwrap();
        blender.push(&flat(20, 128, 1)).unwrap();

        let mut out = FrameBuffer::new(8, 4, 0).unwrap();
        let before = out.luma().row(0).as_ptr();
        blender.blend_into(&[0.5, 0.5], &mut out).unwrap();
        assert_eq!(out.luma().row(0).as_ptr(), before);
        assert_eq!(out.luma().row(3)[7], 15);
        assert_eq!(out.pts(), 1);
    }
}
