use chrono::{DateTime, Utc};
use image::{DynamicImage, RgbaImage, imageops};
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::common::buffer::PixelBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(Uuid);

impl FrameId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FrameId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FrameId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// How the sensor data must be turned to appear upright.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Orientation {
    #[default]
    Up,
    Down,
    /// Rotate 90° counter-clockwise to display.
    Left,
    /// Rotate 90° clockwise to display.
    Right,
    UpMirrored,
    DownMirrored,
    LeftMirrored,
    RightMirrored,
}

/// An orientation-normalized capture. Pixels are shared, never mutated.
#[derive(Clone)]
pub struct Frame {
    id: FrameId,
    image: Arc<RgbaImage>,
    display_scale: f32,
    captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: RgbaImage, display_scale: f32) -> Self {
        Self {
            id: FrameId::new(),
            image: Arc::new(image),
            display_scale,
            captured_at: Utc::now(),
        }
    }

    pub fn from_dynamic(image: DynamicImage, display_scale: f32) -> Self {
        Self::new(image.into_rgba8(), display_scale)
    }

    /// Rotates/mirrors raw sensor pixels into the "up" orientation.
    pub fn from_oriented(image: RgbaImage, orientation: Orientation, display_scale: f32) -> Self {
        let upright = match orientation {
            Orientation::Up => image,
            Orientation::Down => imageops::rotate180(&image),
            Orientation::Left => imageops::rotate270(&image),
            Orientation::Right => imageops::rotate90(&image),
            Orientation::UpMirrored => imageops::flip_horizontal(&image),
            Orientation::DownMirrored => imageops::flip_vertical(&image),
            Orientation::LeftMirrored => imageops::rotate270(&imageops::flip_horizontal(&image)),
            Orientation::RightMirrored => imageops::rotate90(&imageops::flip_horizontal(&image)),
        };
        Self::new(upright, display_scale)
    }

    pub fn id(&self) -> FrameId {
        self.id
    }

    pub fn image(&self) -> &RgbaImage {
        &self.image
    }

    pub fn shared_image(&self) -> Arc<RgbaImage> {
        Arc::clone(&self.image)
    }

    pub fn pixels(&self) -> PixelBuffer<'_> {
        PixelBuffer::from(self.image.as_ref())
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }

    pub fn pixel_size(&self) -> (u32, u32) {
        self.image.dimensions()
    }

    pub fn display_scale(&self) -> f32 {
        self.display_scale
    }

    pub fn captured_at(&self) -> DateTime<Utc> {
        self.captured_at
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("id", &self.id)
            .field("size", &self.pixel_size())
            .field("display_scale", &self.display_scale)
            .field("captured_at", &self.captured_at)
            .finish()
    }
}
