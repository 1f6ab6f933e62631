//! # Pixel Buffer
//!
//! Owned, stride-aware 3-channel (RGB) pixel storage shared by every stage.
//! Transforms never mutate their input: they read a `&PixelBuffer` and return
//! a freshly allocated buffer of identical dimensions. Row-parallel passes hand
//! each worker a disjoint `&mut` row of the output.

use image::{GrayImage, RgbImage};
use rayon::prelude::*;

use super::types::PreprocessingError;

/// Number of interleaved channels per pixel.
pub const CHANNELS: usize = 3;

/// Images with at least this many pixels are processed with rayon.
pub const PARALLEL_THRESHOLD_PIXELS: usize = 65_536;

/// ITU-R BT.601 luma with integer rounding, exact for gray pixels.
#[inline(always)]
pub fn luma(r: u8, g: u8, b: u8) -> u8 {
    ((299 * r as u32 + 587 * g as u32 + 114 * b as u32 + 500) / 1000) as u8
}

/// Owned rectangular buffer of RGB pixels.
#[derive(Clone, PartialEq, Eq)]
pub struct PixelBuffer {
    width: u32,
    height: u32,
    stride: u32,
    data: Vec<u8>,
}

impl std::fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("stride", &self.stride)
            .field("bytes", &self.data.len())
            .finish()
    }
}

impl PixelBuffer {
    /// Creates a black buffer with a tight stride.
    pub fn new(width: u32, height: u32) -> Result<Self, PreprocessingError> {
        let stride = width
            .checked_mul(CHANNELS as u32)
            .ok_or_else(|| PreprocessingError::exhausted("row stride overflows u32"))?;
        Self::zeroed(width, height, stride)
    }

    /// Creates a buffer where every pixel has the given color.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Result<Self, PreprocessingError> {
        let mut buffer = Self::new(width, height)?;
        for pixel in buffer.data.chunks_exact_mut(CHANNELS) {
            pixel.copy_from_slice(&rgb);
        }
        Ok(buffer)
    }

    /// Wraps decoded pixel memory, checking the documented layout contract.
    ///
    /// # Errors
    ///
    /// Returns `PreprocessingError::UnsupportedFormat` if `channels != 3`, the
    /// stride cannot hold a row, or `data.len() != stride * height`.
    pub fn from_raw(
        width: u32,
        height: u32,
        stride: u32,
        channels: u8,
        data: Vec<u8>,
    ) -> Result<Self, PreprocessingError> {
        if channels as usize != CHANNELS {
            return Err(PreprocessingError::unsupported(format!(
                "expected {} channels, got {}",
                CHANNELS, channels
            )));
        }
        let min_stride = width as u64 * CHANNELS as u64;
        if (stride as u64) < min_stride {
            return Err(PreprocessingError::unsupported(format!(
                "stride {} is smaller than width*channels ({})",
                stride, min_stride
            )));
        }
        let expected = stride as u64 * height as u64;
        if data.len() as u64 != expected {
            return Err(PreprocessingError::unsupported(format!(
                "buffer holds {} bytes, expected stride*height = {}",
                data.len(),
                expected
            )));
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// Copies an `image` crate RGB image into a tightly packed buffer.
    pub fn from_rgb_image(image: &RgbImage) -> Result<Self, PreprocessingError> {
        let (width, height) = image.dimensions();
        Self::from_raw(
            width,
            height,
            width * CHANNELS as u32,
            CHANNELS as u8,
            image.as_raw().clone(),
        )
    }

    fn zeroed(width: u32, height: u32, stride: u32) -> Result<Self, PreprocessingError> {
        let len = (stride as usize)
            .checked_mul(height as usize)
            .ok_or_else(|| PreprocessingError::exhausted("buffer size overflows usize"))?;
        let mut data = Vec::new();
        data.try_reserve_exact(len).map_err(|e| {
            PreprocessingError::exhausted(format!(
                "cannot allocate {} bytes for a {}x{} buffer: {}",
                len, width, height, e
            ))
        })?;
        data.resize(len, 0);
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    /// Allocates a zeroed buffer with the same geometry.
    pub fn allocate_like(&self) -> Result<Self, PreprocessingError> {
        Self::zeroed(self.width, self.height, self.stride)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_raw(self) -> Vec<u8> {
        self.data
    }

    /// Checks that the buffer can be fed to a transform.
    pub fn ensure_processable(&self) -> Result<(), PreprocessingError> {
        if self.is_empty() {
            return Err(PreprocessingError::invalid(format!(
                "zero-dimension buffer ({}x{})",
                self.width, self.height
            )));
        }
        let row_len = self.width as usize * CHANNELS;
        if (self.stride as usize) < row_len
            || self.data.len() != self.stride as usize * self.height as usize
        {
            return Err(PreprocessingError::unsupported(
                "buffer layout does not match stride*height",
            ));
        }
        Ok(())
    }

    /// Pixel bytes of row `y`, without stride padding.
    #[inline]
    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride as usize;
        &self.data[start..start + self.width as usize * CHANNELS]
    }

    #[inline]
    pub fn row_mut(&mut self, y: u32) -> &mut [u8] {
        let start = y as usize * self.stride as usize;
        let end = start + self.width as usize * CHANNELS;
        &mut self.data[start..end]
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 3] {
        let i = y as usize * self.stride as usize + x as usize * CHANNELS;
        [self.data[i], self.data[i + 1], self.data[i + 2]]
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: [u8; 3]) {
        let i = y as usize * self.stride as usize + x as usize * CHANNELS;
        self.data[i..i + CHANNELS].copy_from_slice(&rgb);
    }

    /// BT.601 luma of one pixel.
    #[inline]
    pub fn gray_at(&self, x: u32, y: u32) -> u8 {
        let [r, g, b] = self.pixel(x, y);
        luma(r, g, b)
    }

    /// Row-major luma plane (`width * height` bytes).
    pub fn gray_plane(&self) -> Vec<u8> {
        let w = self.width as usize;
        let mut plane = vec![0u8; self.pixel_count()];
        if plane.is_empty() {
            return plane;
        }
        let fill = |(y, dst): (usize, &mut [u8])| {
            let src = self.row(y as u32);
            for (value, pixel) in dst.iter_mut().zip(src.chunks_exact(CHANNELS)) {
                *value = luma(pixel[0], pixel[1], pixel[2]);
            }
        };
        if plane.len() >= PARALLEL_THRESHOLD_PIXELS {
            plane.par_chunks_mut(w).enumerate().for_each(fill);
        } else {
            plane.chunks_mut(w).enumerate().for_each(fill);
        }
        plane
    }

    /// Luma plane as an `image` crate gray image, for imageproc interop.
    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_raw(self.width, self.height, self.gray_plane())
            .unwrap_or_else(|| GrayImage::new(self.width, self.height))
    }

    /// Tightly packed `image` crate RGB image.
    pub fn to_rgb_image(&self) -> RgbImage {
        let mut packed = Vec::with_capacity(self.pixel_count() * CHANNELS);
        for y in 0..self.height {
            packed.extend_from_slice(self.row(y));
        }
        RgbImage::from_raw(self.width, self.height, packed)
            .unwrap_or_else(|| RgbImage::new(self.width, self.height))
    }

    /// Builds a new buffer row by row.
    ///
    /// `f(y, src_row, dst_row)` receives the source row and the matching output
    /// row (both `width * 3` bytes). Rows are disjoint, so large images are
    /// processed in parallel without locking.
    pub fn map_rows<F>(&self, f: F) -> Result<PixelBuffer, PreprocessingError>
    where
        F: Fn(usize, &[u8], &mut [u8]) + Sync + Send,
    {
        let mut out = self.allocate_like()?;
        if self.is_empty() {
            return Ok(out);
        }
        let stride = self.stride as usize;
        let row_len = self.width as usize * CHANNELS;
        let src = &self.data;
        let body = |(y, dst): (usize, &mut [u8])| {
            let start = y * stride;
            f(y, &src[start..start + row_len], &mut dst[..row_len]);
        };
        if self.pixel_count() >= PARALLEL_THRESHOLD_PIXELS {
            out.data.par_chunks_mut(stride).enumerate().for_each(body);
        } else {
            out.data.chunks_mut(stride).enumerate().for_each(body);
        }
        Ok(out)
    }
}
