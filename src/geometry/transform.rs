//! Rigid transform helpers.
//!
//! Transforms are `glam::Mat4` in column-vector convention: `a * b` applies
//! `b` first. Averaging is component-wise over the 16 entries, which is only
//! meaningful when the samples are close to each other.

use glam::{Mat4, Vec3};

use crate::error::{CalibrationError, CalibrationResult};

/// Determinant below which a transform is treated as singular.
const SINGULAR_EPSILON: f32 = 1e-8;

/// Add `sample` into the running sum component-wise.
pub fn accumulate(sum: &mut Mat4, sample: &Mat4) {
    *sum += *sample;
}

/// Divide a running sum by the number of samples.
///
/// Callers must not normalize an empty sum.
pub fn normalize(sum: &Mat4, count: usize) -> CalibrationResult<Mat4> {
    if count == 0 {
        return Err(CalibrationError::NoUsableSnapshots {
            step: "transform average",
            total: 0,
        });
    }
    Ok(*sum * (1.0 / count as f32))
}

/// Component-wise average of a set of transforms.
pub fn average(transforms: &[Mat4]) -> CalibrationResult<Mat4> {
    let mut sum = Mat4::ZERO;
    for t in transforms {
        accumulate(&mut sum, t);
    }
    normalize(&sum, transforms.len())
}

/// Invert a transform, failing when it is singular.
pub fn try_invert(m: &Mat4) -> CalibrationResult<Mat4> {
    if m.determinant().abs() < SINGULAR_EPSILON {
        return Err(CalibrationError::SingularTransform);
    }
    Ok(m.inverse())
}

/// Translation part of a transform.
pub fn translation(m: &Mat4) -> Vec3 {
    m.w_axis.truncate()
}

/// Split a transform into 3 translation and 9 rotation scalars.
///
/// Rotation entries are stored row by row.
pub fn to_components(m: &Mat4) -> [f32; 12] {
    let t = translation(m);
    let r = [m.x_axis, m.y_axis, m.z_axis];
    let mut out = [0.0; 12];
    out[0] = t.x;
    out[1] = t.y;
    out[2] = t.z;
    for row in 0..3 {
        for col in 0..3 {
            out[3 + row * 3 + col] = r[col][row];
        }
    }
    out
}

/// Rebuild a transform from [`to_components`] output.
pub fn from_components(c: &[f32; 12]) -> Mat4 {
    let mut cols = Mat4::IDENTITY.to_cols_array_2d();
    for row in 0..3 {
        for col in 0..3 {
            cols[col][row] = c[3 + row * 3 + col];
        }
    }
    cols[3][0] = c[0];
    cols[3][1] = c[1];
    cols[3][2] = c[2];
    Mat4::from_cols_array_2d(&cols)
}

/// Largest absolute component difference between two transforms.
pub fn max_difference(a: &Mat4, b: &Mat4) -> f32 {
    a.to_cols_array()
        .iter()
        .zip(b.to_cols_array().iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0, f32::max)
}
