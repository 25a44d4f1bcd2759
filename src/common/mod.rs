pub mod buffer;
pub mod frame;

pub use buffer::{MaskBuffer, PixelBuffer, PixelRect};
pub use frame::{Frame, FrameId, Orientation};
