use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::common::{Frame, FrameId, MaskBuffer, PixelBuffer};
use crate::config::CaptureSettings;
use crate::error::SegmentationError;

/// Black-box instance segmentation. Masks may come back at the model's own
/// native resolution; the adapter aligns them to the frame.
pub trait SegmentationModel: Send + Sync {
    fn detect_instances(
        &self,
        pixels: &PixelBuffer<'_>,
    ) -> Result<Vec<MaskBuffer>, SegmentationError>;

    fn name(&self) -> &'static str {
        "segmentation-model"
    }
}

/// One detected foreground object, aligned 1:1 to its frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceMask {
    pub id: usize,
    pub buffer: MaskBuffer,
}

/// All instances of one frame plus their union.
#[derive(Debug, Clone)]
pub struct MaskSet {
    frame_id: FrameId,
    combined: MaskBuffer,
    instances: Vec<InstanceMask>,
}

impl MaskSet {
    pub fn frame_id(&self) -> FrameId {
        self.frame_id
    }

    pub fn combined(&self) -> &MaskBuffer {
        &self.combined
    }

    pub fn instances(&self) -> &[InstanceMask] {
        &self.instances
    }

    pub fn get(&self, index: usize) -> Option<&InstanceMask> {
        self.instances.get(index)
    }

    pub fn len(&self) -> usize {
        self.instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

#[derive(Debug, Clone)]
pub enum SegmentationOutcome {
    Masks(MaskSet),
    NoInstancesFound,
}

impl SegmentationOutcome {
    pub fn is_empty(&self) -> bool {
        matches!(self, SegmentationOutcome::NoInstancesFound)
    }
}

#[derive(Clone)]
pub struct SegmentationAdapter {
    model: Arc<dyn SegmentationModel>,
    foreground_threshold: u8,
    min_instance_pixels: usize,
}

impl SegmentationAdapter {
    pub fn new(model: Arc<dyn SegmentationModel>) -> Self {
        let defaults = CaptureSettings::default();
        Self {
            model,
            foreground_threshold: defaults.hit_threshold,
            min_instance_pixels: defaults.min_instance_pixels,
        }
    }

    pub fn with_settings(mut self, settings: &CaptureSettings) -> Self {
        self.foreground_threshold = settings.hit_threshold;
        self.min_instance_pixels = settings.min_instance_pixels;
        self
    }

    /// Runs the model on the full-resolution frame. Collaborator failures and
    /// empty detections both come back as `NoInstancesFound`.
    pub fn segment(&self, frame: &Frame) -> SegmentationOutcome {
        let (width, height) = frame.pixel_size();
        let raw_masks = match self.model.detect_instances(&frame.pixels()) {
            Ok(masks) => masks,
            Err(e) => {
                warn!(
                    "{} failed on frame {}: {}",
                    self.model.name(),
                    frame.id(),
                    e
                );
                return SegmentationOutcome::NoInstancesFound;
            }
        };
        debug!(
            "{} returned {} raw masks for frame {}",
            self.model.name(),
            raw_masks.len(),
            frame.id()
        );

        let instances: Vec<InstanceMask> = raw_masks
            .iter()
            .map(|mask| {
                if mask.dimensions() != (width, height) {
                    debug!(
                        "Resampling mask from {:?} to {}x{}",
                        mask.dimensions(),
                        width,
                        height
                    );
                }
                mask.resized(width, height)
            })
            .filter(|mask| mask.count_above(self.foreground_threshold) >= self.min_instance_pixels)
            .enumerate()
            .map(|(id, buffer)| InstanceMask { id, buffer })
            .collect();

        if instances.is_empty() {
            info!("No foreground instances found in frame {}", frame.id());
            return SegmentationOutcome::NoInstancesFound;
        }

        let mut combined = MaskBuffer::new(width, height);
        for instance in &instances {
            combined.max_in_place(&instance.buffer);
        }

        info!(
            "Segmented {} instances in frame {}",
            instances.len(),
            frame.id()
        );
        SegmentationOutcome::Masks(MaskSet {
            frame_id: frame.id(),
            combined,
            instances,
        })
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use image::RgbaImage;

    /// Returns the configured masks regardless of input.
    pub(crate) struct FixedMasks(pub Vec<MaskBuffer>);

    impl SegmentationModel for FixedMasks {
        fn detect_instances(
            &self,
            _pixels: &PixelBuffer<'_>,
        ) -> Result<Vec<MaskBuffer>, SegmentationError> {
            Ok(self.0.clone())
        }
    }

    struct FailingModel;

    impl SegmentationModel for FailingModel {
        fn detect_instances(
            &self,
            _pixels: &PixelBuffer<'_>,
        ) -> Result<Vec<MaskBuffer>, SegmentationError> {
            Err(SegmentationError::Model("backend unavailable".to_string()))
        }
    }

    pub(crate) fn rect_mask(width: u32, height: u32, x0: u32, y0: u32, x1: u32, y1: u32) -> MaskBuffer {
        MaskBuffer::from_fn(width, height, |x, y| {
            if x >= x0 && x < x1 && y >= y0 && y < y1 {
                255
            } else {
                0
            }
        })
    }

    #[test]
    fn masks_are_resampled_to_frame_extent() {
        let frame = Frame::new(RgbaImage::new(80, 40), 1.0);
        let native = rect_mask(20, 10, 0, 0, 10, 10);
        let adapter = SegmentationAdapter::new(Arc::new(FixedMasks(vec![native])));

        let SegmentationOutcome::Masks(set) = adapter.segment(&frame) else {
            panic!("expected masks");
        };
        assert_eq!(set.frame_id(), frame.id());
        assert_eq!(set.len(), 1);
        assert_eq!(set.instances()[0].buffer.dimensions(), (80, 40));
        assert_eq!(set.combined().dimensions(), (80, 40));
        assert_eq!(set.instances()[0].buffer.value(10, 20), Some(255));
        assert_eq!(set.instances()[0].buffer.value(70, 20), Some(0));
    }

    #[test]
    fn combined_mask_is_union_with_sequential_ids() {
        let frame = Frame::new(RgbaImage::new(30, 30), 1.0);
        let masks = vec![
            rect_mask(30, 30, 0, 0, 10, 10),
            MaskBuffer::new(30, 30),
            rect_mask(30, 30, 20, 20, 30, 30),
        ];
        let adapter = SegmentationAdapter::new(Arc::new(FixedMasks(masks)));

        let SegmentationOutcome::Masks(set) = adapter.segment(&frame) else {
            panic!("expected masks");
        };
        // The empty mask is dropped and the ids stay dense.
        let ids: Vec<usize> = set.instances().iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![0, 1]);
        assert_eq!(set.combined().value(5, 5), Some(255));
        assert_eq!(set.combined().value(25, 25), Some(255));
        assert_eq!(set.combined().value(15, 15), Some(0));
    }

    #[test]
    fn empty_detection_is_no_instances() {
        let frame = Frame::new(RgbaImage::new(8, 8), 1.0);
        let adapter = SegmentationAdapter::new(Arc::new(FixedMasks(vec![])));
        assert!(adapter.segment(&frame).is_empty());
    }

    #[test]
    fn model_failure_is_no_instances() {
        let frame = Frame::new(RgbaImage::new(8, 8), 1.0);
        let adapter = SegmentationAdapter::new(Arc::new(FailingModel));
        assert!(adapter.segment(&frame).is_empty());
    }
}
