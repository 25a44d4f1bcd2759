use image::{GrayImage, RgbaImage, imageops::FilterType};

use crate::error::BufferError;

const RGBA_CHANNELS: usize = 4;

/// Axis-aligned rectangle in pixel space, `x`/`y` inclusive, extent exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl PixelRect {
    pub fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn center(&self) -> (f64, f64) {
        (
            self.x as f64 + self.width as f64 / 2.0,
            self.y as f64 + self.height as f64 / 2.0,
        )
    }

    pub fn contains_point(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.x + self.width && y >= self.y && y < self.y + self.height
    }

    /// Grows the rectangle by `padding` on every side without leaving `bounds`.
    pub fn padded(&self, padding: u32, bounds: (u32, u32)) -> Self {
        let x = self.x.saturating_sub(padding);
        let y = self.y.saturating_sub(padding);
        let right = (self.x + self.width).saturating_add(padding).min(bounds.0);
        let bottom = (self.y + self.height).saturating_add(padding).min(bounds.1);
        Self::new(x, y, right - x, bottom - y)
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

/// Single-channel 8-bit mask with an explicit row stride.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaskBuffer {
    width: u32,
    height: u32,
    stride: usize,
    data: Vec<u8>,
}

impl MaskBuffer {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            stride: width as usize,
            data: vec![0; width as usize * height as usize],
        }
    }

    pub fn from_fn(width: u32, height: u32, mut f: impl FnMut(u32, u32) -> u8) -> Self {
        let mut mask = Self::new(width, height);
        for y in 0..height {
            for x in 0..width {
                mask.data[y as usize * mask.stride + x as usize] = f(x, y);
            }
        }
        mask
    }

    pub fn from_raw(
        width: u32,
        height: u32,
        stride: usize,
        data: Vec<u8>,
    ) -> Result<Self, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::Empty(width, height));
        }
        if stride < width as usize {
            return Err(BufferError::InvalidStride { stride, width });
        }
        let required = stride * (height as usize - 1) + width as usize;
        if data.len() < required {
            return Err(BufferError::TooSmall {
                len: data.len(),
                width,
                height,
                stride,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn row(&self, y: u32) -> &[u8] {
        let start = y as usize * self.stride;
        &self.data[start..start + self.width as usize]
    }

    pub fn value(&self, x: u32, y: u32) -> Option<u8> {
        if x >= self.width || y >= self.height {
            return None;
        }
        Some(self.data[y as usize * self.stride + x as usize])
    }

    pub fn set(&mut self, x: u32, y: u32, value: u8) {
        if x < self.width && y < self.height {
            self.data[y as usize * self.stride + x as usize] = value;
        }
    }

    pub fn count_above(&self, threshold: u8) -> usize {
        (0..self.height)
            .map(|y| self.row(y).iter().filter(|&&v| v > threshold).count())
            .sum()
    }

    /// Tightest rectangle holding every value above `threshold`.
    pub fn bounding_box(&self, threshold: u8) -> Option<PixelRect> {
        let mut min_x = u32::MAX;
        let mut min_y = u32::MAX;
        let mut max_x = 0;
        let mut max_y = 0;
        let mut found = false;

        for y in 0..self.height {
            for (x, &v) in self.row(y).iter().enumerate() {
                if v > threshold {
                    let x = x as u32;
                    found = true;
                    min_x = min_x.min(x);
                    min_y = min_y.min(y);
                    max_x = max_x.max(x);
                    max_y = max_y.max(y);
                }
            }
        }

        found.then(|| PixelRect::new(min_x, min_y, max_x - min_x + 1, max_y - min_y + 1))
    }

    /// Bilinear resample to a new extent. Returns a compact copy when the size
    /// already matches.
    pub fn resized(&self, width: u32, height: u32) -> Self {
        let gray = self.to_gray_image();
        if self.dimensions() == (width, height) {
            return Self::from(gray);
        }
        Self::from(image::imageops::resize(
            &gray,
            width,
            height,
            FilterType::Triangle,
        ))
    }

    /// Pixelwise maximum with `other`; mismatched extents leave `self` as is.
    pub fn max_in_place(&mut self, other: &MaskBuffer) -> bool {
        if self.dimensions() != other.dimensions() {
            return false;
        }
        for y in 0..self.height {
            let start = y as usize * self.stride;
            let dst = &mut self.data[start..start + self.width as usize];
            for (d, &s) in dst.iter_mut().zip(other.row(y)) {
                *d = (*d).max(s);
            }
        }
        true
    }

    pub fn to_gray_image(&self) -> GrayImage {
        GrayImage::from_fn(self.width, self.height, |x, y| {
            image::Luma([self.data[y as usize * self.stride + x as usize]])
        })
    }
}

impl From<GrayImage> for MaskBuffer {
    fn from(image: GrayImage) -> Self {
        let (width, height) = image.dimensions();
        Self {
            width,
            height,
            stride: width as usize,
            data: image.into_raw(),
        }
    }
}

/// Borrowed RGBA8 view handed to collaborators for the duration of one call.
#[derive(Debug, Clone, Copy)]
pub struct PixelBuffer<'a> {
    width: u32,
    height: u32,
    stride: usize,
    data: &'a [u8],
}

impl<'a> PixelBuffer<'a> {
    pub fn new(width: u32, height: u32, stride: usize, data: &'a [u8]) -> Result<Self, BufferError> {
        if width == 0 || height == 0 {
            return Err(BufferError::Empty(width, height));
        }
        let row_bytes = width as usize * RGBA_CHANNELS;
        if stride < row_bytes {
            return Err(BufferError::InvalidStride { stride, width });
        }
        let required = stride * (height as usize - 1) + row_bytes;
        if data.len() < required {
            return Err(BufferError::TooSmall {
                len: data.len(),
                width,
                height,
                stride,
            });
        }
        Ok(Self {
            width,
            height,
            stride,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bytes per row, at least `width * 4`.
    pub fn stride(&self) -> usize {
        self.stride
    }

    pub fn as_bytes(&self) -> &'a [u8] {
        self.data
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = y as usize * self.stride + x as usize * RGBA_CHANNELS;
        Some([
            self.data[idx],
            self.data[idx + 1],
            self.data[idx + 2],
            self.data[idx + 3],
        ])
    }

    pub fn to_rgba_image(&self) -> RgbaImage {
        RgbaImage::from_fn(self.width, self.height, |x, y| {
            // In bounds by construction.
            image::Rgba(self.pixel(x, y).unwrap_or([0; 4]))
        })
    }
}

impl<'a> From<&'a RgbaImage> for PixelBuffer<'a> {
    fn from(image: &'a RgbaImage) -> Self {
        Self {
            width: image.width(),
            height: image.height(),
            stride: image.width() as usize * RGBA_CHANNELS,
            data: image.as_raw(),
        }
    }
}
