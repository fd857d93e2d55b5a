//! Depth module: sensor description, raw decoding and per-frame classification.

mod analysis;
mod decoder;
mod frame;
mod sensor;

pub use analysis::{DepthAnalysis, Selection};
pub use decoder::{DepthDecoder, DEFAULT_DEPTH_RATIO};
pub use frame::{
    is_valid_point, DepthFrameData, PassTarget, PixelGrid, TouchAttributes, INVALID_POINT,
};
pub use sensor::{DepthSensor, SensorKind, COLOR_BYTES_PER_PIXEL};
