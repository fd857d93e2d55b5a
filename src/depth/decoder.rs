//! Raw depth decoding, one strategy per sensor generation.

use super::sensor::SensorKind;

/// Default divisor of the time-of-flight encoding.
pub const DEFAULT_DEPTH_RATIO: f32 = 10.0;

/// Decodes one pixel of a raw depth buffer into a distance.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DepthDecoder {
    /// 2 bytes per pixel, high byte first.
    BigEndian16,
    /// 3 bytes per pixel, low byte first, third byte unused; divided by `ratio`.
    LittleEndian24 { ratio: f32 },
}

impl DepthDecoder {
    pub fn for_sensor(kind: SensorKind, ratio: f32) -> Self {
        match kind {
            SensorKind::StructuredLight => DepthDecoder::BigEndian16,
            SensorKind::TimeOfFlight => DepthDecoder::LittleEndian24 { ratio },
        }
    }

    pub fn bytes_per_pixel(&self) -> usize {
        match self {
            DepthDecoder::BigEndian16 => 2,
            DepthDecoder::LittleEndian24 { .. } => 3,
        }
    }

    /// Distance at pixel `offset`. `raw` must hold the whole frame.
    #[inline]
    pub fn decode(&self, raw: &[u8], offset: usize) -> f32 {
        match *self {
            DepthDecoder::BigEndian16 => {
                let i = offset * 2;
                u16::from_be_bytes([raw[i], raw[i + 1]]) as f32
            }
            DepthDecoder::LittleEndian24 { ratio } => {
                let i = offset * 3;
                u16::from_le_bytes([raw[i], raw[i + 1]]) as f32 / ratio
            }
        }
    }

    /// Encode a distance the way the sensor would. Used to build test frames.
    pub fn encode(&self, depth: f32, out: &mut Vec<u8>) {
        match *self {
            DepthDecoder::BigEndian16 => {
                out.extend_from_slice(&(depth.round() as u16).to_be_bytes());
            }
            DepthDecoder::LittleEndian24 { ratio } => {
                out.extend_from_slice(&((depth * ratio).round() as u16).to_le_bytes());
                out.push(0);
            }
        }
    }
}
