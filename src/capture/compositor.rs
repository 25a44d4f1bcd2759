use std::io::Cursor;
use std::sync::Arc;

use image::{GrayImage, ImageFormat, Luma, Rgba, RgbaImage, imageops::FilterType};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::{dilate, erode};
use tracing::{debug, warn};

use crate::capture::segmentation::SegmentationOutcome;
use crate::common::{Frame, MaskBuffer, PixelRect};
use crate::config::CompositorSettings;
use crate::error::CompositeError;

/// PNG-encoded image ready for the remote model, already size-capped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadImage {
    pub width: u32,
    pub height: u32,
    pub png: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct CutoutCompositor {
    settings: CompositorSettings,
}

impl Default for CutoutCompositor {
    fn default() -> Self {
        Self::new(CompositorSettings::default())
    }
}

impl CutoutCompositor {
    pub fn new(settings: CompositorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &CompositorSettings {
        &self.settings
    }

    /// Soft double outline around every detected instance, on a transparent
    /// background the size of the frame.
    pub fn composite_preview(
        &self,
        combined: &MaskBuffer,
        frame: &Frame,
    ) -> Result<RgbaImage, CompositeError> {
        ensure_aligned(combined, frame)?;
        let (width, height) = combined.dimensions();
        let mask = combined.to_gray_image();

        let dilated = dilate(&mask, Norm::LInf, self.settings.outline_radius);
        let eroded = erode(&mask, Norm::LInf, self.settings.outline_radius);
        let edge = GrayImage::from_fn(width, height, |x, y| {
            Luma([dilated.get_pixel(x, y)[0].saturating_sub(eroded.get_pixel(x, y)[0])])
        });

        let outer = gaussian_blur_f32(&edge, self.settings.outer_blur_sigma);
        let inner = gaussian_blur_f32(&edge, self.settings.inner_blur_sigma);

        let color = self.settings.glow_color.map(|c| c as f32 / 255.0);
        Ok(RgbaImage::from_fn(width, height, |x, y| {
            let a_outer = outer.get_pixel(x, y)[0] as f32 / 255.0 * self.settings.outer_opacity;
            let a_inner = inner.get_pixel(x, y)[0] as f32 / 255.0 * self.settings.inner_opacity;
            screen_glow(color, a_outer, a_inner)
        }))
    }

    /// Preview for a segmentation outcome, rendered on the caller's thread.
    /// Meant for the segmentation worker; a failed render leaves no preview.
    pub fn preview_for(
        &self,
        outcome: &SegmentationOutcome,
        frame: &Frame,
    ) -> Option<Arc<RgbaImage>> {
        let SegmentationOutcome::Masks(masks) = outcome else {
            return None;
        };
        match self.composite_preview(masks.combined(), frame) {
            Ok(preview) => Some(Arc::new(preview)),
            Err(e) => {
                warn!("Preview for frame {} failed: {}", frame.id(), e);
                None
            }
        }
    }

    /// The frame with everything outside `mask` made transparent. Same extent
    /// as the frame, no resampling.
    pub fn composite_cutout(
        &self,
        mask: &MaskBuffer,
        frame: &Frame,
    ) -> Result<RgbaImage, CompositeError> {
        ensure_aligned(mask, frame)?;
        let source = frame.image();
        Ok(RgbaImage::from_fn(frame.width(), frame.height(), |x, y| {
            let Rgba([r, g, b, a]) = *source.get_pixel(x, y);
            let m = mask.value(x, y).unwrap_or(0) as u32;
            let alpha = ((a as u32 * m + 127) / 255) as u8;
            if alpha == 0 {
                Rgba([0, 0, 0, 0])
            } else {
                Rgba([r, g, b, alpha])
            }
        }))
    }

    /// Private, size-capped copy of a cutout for upload; optionally cropped to
    /// the visible subject first.
    pub fn prepare_upload(&self, cutout: &RgbaImage) -> Result<UploadImage, CompositeError> {
        let cropped = if self.settings.crop_upload_to_subject {
            alpha_bounding_box(cutout).map(|rect| {
                let rect = rect.padded(self.settings.subject_padding, cutout.dimensions());
                image::imageops::crop_imm(cutout, rect.x, rect.y, rect.width, rect.height)
                    .to_image()
            })
        } else {
            None
        };
        let source = cropped.as_ref().unwrap_or(cutout);
        self.encode_capped(source)
    }

    /// Size-capped copy of the whole frame, for full-frame analysis.
    pub fn prepare_frame_upload(&self, frame: &Frame) -> Result<UploadImage, CompositeError> {
        self.encode_capped(frame.image())
    }

    /// Cutout plus upload copy, computed on the blocking pool. The returned
    /// cutout is the full-resolution one kept for history previews.
    pub async fn cutout_for_upload(
        &self,
        mask: MaskBuffer,
        frame: Frame,
    ) -> Result<(Arc<RgbaImage>, UploadImage), CompositeError> {
        let compositor = self.clone();
        tokio::task::spawn_blocking(move || {
            let cutout = compositor.composite_cutout(&mask, &frame)?;
            let upload = compositor.prepare_upload(&cutout)?;
            Ok((Arc::new(cutout), upload))
        })
        .await
        .map_err(|e| CompositeError::Worker(e.to_string()))?
    }

    pub async fn cutout_in_background(
        &self,
        mask: MaskBuffer,
        frame: Frame,
    ) -> Result<Arc<RgbaImage>, CompositeError> {
        let compositor = self.clone();
        tokio::task::spawn_blocking(move || compositor.composite_cutout(&mask, &frame).map(Arc::new))
            .await
            .map_err(|e| CompositeError::Worker(e.to_string()))?
    }

    pub async fn frame_for_upload(&self, frame: Frame) -> Result<UploadImage, CompositeError> {
        let compositor = self.clone();
        tokio::task::spawn_blocking(move || compositor.prepare_frame_upload(&frame))
            .await
            .map_err(|e| CompositeError::Worker(e.to_string()))?
    }

    fn encode_capped(&self, source: &RgbaImage) -> Result<UploadImage, CompositeError> {
        let (width, height) = capped_extent(source.dimensions(), self.settings.upload_max_edge);
        let resized;
        let image = if (width, height) == source.dimensions() {
            source
        } else {
            debug!(
                "Downsampling upload from {:?} to {}x{}",
                source.dimensions(),
                width,
                height
            );
            resized = image::imageops::resize(source, width, height, FilterType::Triangle);
            &resized
        };

        let mut png = Vec::new();
        image.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)?;
        Ok(UploadImage { width, height, png })
    }
}

fn ensure_aligned(mask: &MaskBuffer, frame: &Frame) -> Result<(), CompositeError> {
    if mask.dimensions() != frame.pixel_size() {
        return Err(CompositeError::DimensionMismatch {
            mask_width: mask.width(),
            mask_height: mask.height(),
            frame_width: frame.width(),
            frame_height: frame.height(),
        });
    }
    Ok(())
}

/// Longer edge clamped to `max_edge`, aspect ratio kept, never upscaled.
fn capped_extent((width, height): (u32, u32), max_edge: u32) -> (u32, u32) {
    let long = width.max(height);
    if long <= max_edge {
        return (width, height);
    }
    let scale = max_edge as f64 / long as f64;
    let scaled = |v: u32| ((v as f64 * scale).round() as u32).clamp(1, max_edge);
    (scaled(width), scaled(height))
}

fn alpha_bounding_box(image: &RgbaImage) -> Option<PixelRect> {
    let alpha = MaskBuffer::from_fn(image.width(), image.height(), |x, y| {
        image.get_pixel(x, y)[3]
    });
    alpha.bounding_box(0)
}

// Two premultiplied glow layers combined with the screen operator.
fn screen_glow(color: [f32; 3], a_outer: f32, a_inner: f32) -> Rgba<u8> {
    let alpha = a_outer + a_inner - a_outer * a_inner;
    if alpha <= f32::EPSILON {
        return Rgba([0, 0, 0, 0]);
    }
    let channel = |c: f32| {
        let outer = c * a_outer;
        let inner = c * a_inner;
        let screened = outer + inner - outer * inner;
        ((screened / alpha).clamp(0.0, 1.0) * 255.0).round() as u8
    };
    Rgba([
        channel(color[0]),
        channel(color[1]),
        channel(color[2]),
        (alpha.clamp(0.0, 1.0) * 255.0).round() as u8,
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::segmentation::tests::rect_mask;

    fn solid_frame(width: u32, height: u32) -> Frame {
        Frame::new(RgbaImage::from_pixel(width, height, Rgba([10, 200, 30, 255])), 1.0)
    }

    #[test]
    fn cutout_keeps_subject_and_clears_background() {
        let frame = solid_frame(40, 30);
        let mask = rect_mask(40, 30, 5, 5, 15, 15);
        let cutout = CutoutCompositor::default()
            .composite_cutout(&mask, &frame)
            .unwrap();

        assert_eq!(cutout.dimensions(), (40, 30));
        assert_eq!(cutout.get_pixel(10, 10).0, [10, 200, 30, 255]);
        assert_eq!(cutout.get_pixel(30, 20).0, [0, 0, 0, 0]);
    }

    #[test]
    fn partial_mask_values_become_partial_alpha() {
        let frame = solid_frame(4, 4);
        let mask = MaskBuffer::from_fn(4, 4, |_, _| 128);
        let cutout = CutoutCompositor::default()
            .composite_cutout(&mask, &frame)
            .unwrap();
        assert_eq!(cutout.get_pixel(0, 0)[3], 128);
    }

    #[test]
    fn misaligned_mask_is_rejected() {
        let frame = solid_frame(40, 30);
        let mask = MaskBuffer::new(20, 15);
        let result = CutoutCompositor::default().composite_cutout(&mask, &frame);
        assert!(matches!(result, Err(CompositeError::DimensionMismatch { .. })));
    }

    #[test]
    fn preview_glows_on_edges_only() {
        let frame = solid_frame(200, 200);
        let mask = rect_mask(200, 200, 50, 50, 150, 150);
        let preview = CutoutCompositor::default()
            .composite_preview(&mask, &frame)
            .unwrap();

        assert_eq!(preview.dimensions(), (200, 200));
        assert!(preview.get_pixel(50, 100)[3] > 0, "edge should glow");
        assert_eq!(preview.get_pixel(100, 100)[3], 0, "interior stays clear");
        assert_eq!(preview.get_pixel(0, 0)[3], 0, "far background stays clear");
    }

    #[test]
    fn preview_for_renders_masks_only() {
        use crate::capture::segmentation::tests::FixedMasks;
        use crate::capture::segmentation::{SegmentationAdapter, SegmentationOutcome};

        let frame = solid_frame(60, 60);
        let compositor = CutoutCompositor::default();
        let model = FixedMasks(vec![rect_mask(60, 60, 10, 10, 50, 50)]);
        let adapter = SegmentationAdapter::new(Arc::new(model));
        let outcome = adapter.segment(&frame);
        let preview = compositor.preview_for(&outcome, &frame).unwrap();
        assert_eq!(preview.dimensions(), (60, 60));
        assert!(compositor
            .preview_for(&SegmentationOutcome::NoInstancesFound, &frame)
            .is_none());
    }

    #[test]
    fn capped_extent_limits_longer_edge() {
        assert_eq!(capped_extent((4000, 3000), 1280), (1280, 960));
        assert_eq!(capped_extent((1000, 3000), 1280), (427, 1280));
        assert_eq!(capped_extent((800, 600), 1280), (800, 600));
    }

    #[test]
    fn upload_is_capped_and_leaves_cutout_untouched() {
        let frame = solid_frame(2000, 100);
        let mask = rect_mask(2000, 100, 0, 0, 2000, 100);
        let compositor = CutoutCompositor::new(CompositorSettings {
            crop_upload_to_subject: false,
            ..CompositorSettings::default()
        });
        let cutout = compositor.composite_cutout(&mask, &frame).unwrap();
        let upload = compositor.prepare_upload(&cutout).unwrap();

        assert_eq!((upload.width, upload.height), (1280, 64));
        assert_eq!(cutout.dimensions(), (2000, 100));
        let decoded = image::load_from_memory(&upload.png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (1280, 64));
    }

    #[test]
    fn upload_crops_to_subject_with_padding() {
        let frame = solid_frame(200, 200);
        let mask = rect_mask(200, 200, 50, 60, 100, 80);
        let compositor = CutoutCompositor::new(CompositorSettings {
            subject_padding: 10,
            ..CompositorSettings::default()
        });
        let cutout = compositor.composite_cutout(&mask, &frame).unwrap();
        let upload = compositor.prepare_upload(&cutout).unwrap();
        assert_eq!((upload.width, upload.height), (70, 40));
    }

    #[tokio::test]
    async fn background_upload_matches_sync_path() {
        let frame = solid_frame(64, 64);
        let mask = rect_mask(64, 64, 8, 8, 24, 24);
        let compositor = CutoutCompositor::default();
        let (cutout, upload) = compositor
            .cutout_for_upload(mask.clone(), frame.clone())
            .await
            .unwrap();
        assert_eq!(cutout.dimensions(), (64, 64));
        let expected = compositor
            .prepare_upload(&compositor.composite_cutout(&mask, &frame).unwrap())
            .unwrap();
        assert_eq!(upload, expected);
    }
}
