use thiserror::Error;

/// Row alignment for freshly allocated planes, matching what libav hands out.
const PLANE_ALIGN: usize = 32;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum PixelFormat {
    /// 8-bit planar Y, U, V with chroma subsampled by two in both directions.
    #[default]
    Yuv420p,
}

impl PixelFormat {
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            PixelFormat::Yuv420p => "yuv420p",
        }
    }
}

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("failed to allocate {bytes} bytes for a frame plane")]
    Allocation { bytes: usize },
    #[error("invalid frame dimensions {width}x{height}")]
    Dimensions { width: u32, height: u32 },
    #[error("frame shape mismatch: expected {expected_width}x{expected_height}, got {width}x{height}")]
    ShapeMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
    #[error("packed frame has {actual} bytes, expected {expected}")]
    PackedSize { expected: usize, actual: usize },
}

/// One image plane. Rows are `stride` bytes apart; only the first `width`
/// bytes of each row carry pixels.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Plane {
    data: Vec<u8>,
    stride: usize,
    width: usize,
    height: usize,
}

impl Plane {
    fn alloc(width: usize, height: usize, fill: u8) -> Result<Self, FrameError> {
        let stride = width.next_multiple_of(PLANE_ALIGN);
        let bytes = stride * height;
        let mut data = Vec::new();
        data.try_reserve_exact(bytes)
            .map_err(|_| FrameError::Allocation { bytes })?;
        data.resize(bytes, fill);
        Ok(Self {
            data,
            stride,
            width,
            height,
        })
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn row(&self, y: usize) -> &[u8] {
        let start = y * self.stride;
        &self.data[start..start + self.width]
    }

    pub fn row_mut(&mut self, y: usize) -> &mut [u8] {
        let start = y * self.stride;
        &mut self.data[start..start + self.width]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[u8]> + '_ {
        (0..self.height).map(move |y| self.row(y))
    }

    pub fn fill(&mut self, value: u8) {
        for y in 0..self.height {
            self.row_mut(y).fill(value);
        }
    }

    fn copy_rows_from(&mut self, src: &Plane) {
        for y in 0..self.height {
            self.row_mut(y).copy_from_slice(src.row(y));
        }
    }
}

/// An owned 4:2:0 planar picture plus its presentation timestamp.
///
/// `FrameBuffer::default()` is unallocated; storage appears on the first
/// [`copy_from`](Self::copy_from) or [`load_packed`](Self::load_packed) and is
/// reused as long as the dimensions stay the same.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FrameBuffer {
    planes: [Plane; 3],
    width: u32,
    height: u32,
    format: PixelFormat,
    pts: i64,
}

impl FrameBuffer {
    pub fn new(width: u32, height: u32, pts: i64) -> Result<Self, FrameError> {
        let mut frame = Self::default();
        frame.ensure_shape(width, height)?;
        frame.pts = pts;
        Ok(frame)
    }

    /// Size in bytes of a tightly packed yuv420p picture.
    pub fn packed_len(width: u32, height: u32) -> usize {
        let (w, h) = (width as usize, height as usize);
        w * h + 2 * (w / 2) * (h / 2)
    }

    pub fn is_allocated(&self) -> bool {
        self.width != 0 && self.height != 0
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn pts(&self) -> i64 {
        self.pts
    }

    pub fn set_pts(&mut self, pts: i64) {
        self.pts = pts;
    }

    pub fn plane(&self, index: usize) -> &Plane {
        &self.planes[index]
    }

    pub fn plane_mut(&mut self, index: usize) -> &mut Plane {
        &mut self.planes[index]
    }

    pub fn luma(&self) -> &Plane {
        &self.planes[0]
    }

    pub fn same_shape(&self, other: &FrameBuffer) -> bool {
        self.width == other.width && self.height == other.height && self.format == other.format
    }

    /// Makes sure the planes match `width`x`height`, reallocating only on change.
    pub fn ensure_shape(&mut self, width: u32, height: u32) -> Result<(), FrameError> {
        if width == 0 || height == 0 {
            return Err(FrameError::Dimensions { width, height });
        }
        if self.width == width && self.height == height {
            return Ok(());
        }

        let (w, h) = (width as usize, height as usize);
        self.planes = [
            Plane::alloc(w, h, 0)?,
            Plane::alloc(w / 2, h / 2, 128)?,
            Plane::alloc(w / 2, h / 2, 128)?,
        ];
        self.width = width;
        self.height = height;
        self.format = PixelFormat::Yuv420p;
        Ok(())
    }

    /// Deep copy of `src` into `self`, keeping the existing allocation when shapes match.
    pub fn copy_from(&mut self, src: &FrameBuffer) -> Result<(), FrameError> {
        if !src.is_allocated() {
            *self = FrameBuffer::default();
            self.pts = src.pts;
            return Ok(());
        }

        self.ensure_shape(src.width, src.height)?;
        for (dst, src) in self.planes.iter_mut().zip(src.planes.iter()) {
            dst.copy_rows_from(src);
        }
        self.pts = src.pts;
        Ok(())
    }

    /// Fills the planes from a tightly packed yuv420p buffer as produced by
    /// `ffmpeg -f rawvideo -pix_fmt yuv420p`.
    pub fn load_packed(
        &mut self,
        width: u32,
        height: u32,
        bytes: &[u8],
        pts: i64,
    ) -> Result<(), FrameError> {
        let expected = Self::packed_len(width, height);
        if bytes.len() != expected {
            return Err(FrameError::PackedSize {
                expected,
                actual: bytes.len(),
            });
        }

        self.ensure_shape(width, height)?;
        let mut offset = 0;
        for plane in self.planes.iter_mut() {
            let row_len = plane.width;
            for y in 0..plane.height {
                plane
                    .row_mut(y)
                    .copy_from_slice(&bytes[offset..offset + row_len]);
                offset += row_len;
            }
        }
        self.pts = pts;
        Ok(())
    }

    /// Appends the picture to `out` in packed yuv420p layout.
    pub fn write_packed(&self, out: &mut Vec<u8>) {
        out.reserve(Self::packed_len(self.width, self.height));
        for plane in &self.planes {
            for row in plane.rows() {
                out.extend_from_slice(row);
            }
        }
    }

    pub fn fill(&mut self, y: u8, u: u8, v: u8) {
        self.planes[0].fill(y);
        self.planes[1].fill(u);
        self.planes[2].fill(v);
    }
}
