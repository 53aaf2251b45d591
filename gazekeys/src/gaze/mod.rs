//! Gaze input: normalized samples, the last-wins adapter, and the
//! mapping from tracker space into screen pixels.

pub mod mapper;
pub mod sample;
pub mod source;

pub use mapper::{CoordinateMapper, ScreenPoint, SurfaceInset, Viewport};
pub use sample::{NormalizedPoint, SampleValidation};
pub use source::{SampleSlot, SourceHealth};
