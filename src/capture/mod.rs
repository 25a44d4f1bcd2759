pub mod compositor;
pub mod controller;
pub mod segmentation;
pub mod session;

pub use compositor::{CutoutCompositor, UploadImage};
pub use controller::{SessionController, SessionControllerBuilder, SessionHandle};
pub use hit_test::{DisplayPoint, DisplaySize, DisplayTransform, HitTester};
pub use segmentation::{
    InstanceMask, MaskSet, SegmentationAdapter, SegmentationModel, SegmentationOutcome,
};
pub use session::{AnalysisTarget, CaptureSession, CaptureState, Notice, SessionSnapshot};
