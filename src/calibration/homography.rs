//! Homography between the work-surface plane and normalized screen space.
//!
//! Estimated with the normalized Direct Linear Transform from point
//! correspondences, solved by SVD.

use glam::Vec2;
use nalgebra::{DMatrix, Matrix3};
use serde::{Deserialize, Serialize};

use crate::error::{CalibrationError, CalibrationResult};

/// Planar projective map, plane coordinates -> normalized screen coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HomographyModel {
    /// 3x3 homography matrix (row-major).
    pub matrix: [[f32; 3]; 3],
}

impl Default for HomographyModel {
    fn default() -> Self {
        Self {
            matrix: [
                [1.0, 0.0, 0.0],
                [0.0, 1.0, 0.0],
                [0.0, 0.0, 1.0],
            ],
        }
    }
}

impl HomographyModel {
    pub fn from_matrix(matrix: [[f32; 3]; 3]) -> Self {
        Self { matrix }
    }

    /// Estimate `H` such that `dst ~ H src` from at least 4 correspondences.
    pub fn estimate(src: &[Vec2], dst: &[Vec2]) -> CalibrationResult<Self> {
        let n = src.len();
        if n < 4 || dst.len() != n {
            return Err(CalibrationError::DegenerateHomography(format!(
                "need at least 4 point correspondences, got {} -> {}",
                n,
                dst.len()
            )));
        }

        if !src.iter().chain(dst.iter()).all(|p| p.is_finite()) {
            return Err(CalibrationError::DegenerateHomography(
                "correspondences contain non-finite coordinates".to_string(),
            ));
        }

        let t_src = normalization(src).ok_or_else(|| {
            CalibrationError::DegenerateHomography("source points are coincident".to_string())
        })?;
        let t_dst = normalization(dst).ok_or_else(|| {
            CalibrationError::DegenerateHomography("target points are coincident".to_string())
        })?;

        // Padded to at least 9 rows so the SVD exposes the null vector.
        let mut a = DMatrix::<f64>::zeros((2 * n).max(9), 9);
        for (i, (s, d)) in src.iter().zip(dst.iter()).enumerate() {
            let (x, y) = apply_f64(&t_src, s.x as f64, s.y as f64);
            let (u, v) = apply_f64(&t_dst, d.x as f64, d.y as f64);

            let r0 = 2 * i;
            let r1 = r0 + 1;
            a[(r0, 0)] = -x;
            a[(r0, 1)] = -y;
            a[(r0, 2)] = -1.0;
            a[(r0, 6)] = u * x;
            a[(r0, 7)] = u * y;
            a[(r0, 8)] = u;

            a[(r1, 3)] = -x;
            a[(r1, 4)] = -y;
            a[(r1, 5)] = -1.0;
            a[(r1, 6)] = v * x;
            a[(r1, 7)] = v * y;
            a[(r1, 8)] = v;
        }

        let svd = a.svd(false, true);
        let v_t = svd
            .v_t
            .ok_or_else(|| CalibrationError::DegenerateHomography("SVD failed".to_string()))?;

        // Singular values are sorted in descending order.
        let h = v_t.row(v_t.nrows() - 1);
        let h_norm = Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]);

        let t_dst_inv = t_dst.try_inverse().ok_or_else(|| {
            CalibrationError::DegenerateHomography("normalization is singular".to_string())
        })?;
        let mut h_mat = t_dst_inv * h_norm * t_src;

        let scale = h_mat[(2, 2)];
        if scale.abs() > f64::EPSILON {
            h_mat /= scale;
        }

        if !h_mat.iter().all(|v| v.is_finite()) || h_mat.determinant().abs() < 1e-12 {
            return Err(CalibrationError::DegenerateHomography(
                "estimated matrix is singular".to_string(),
            ));
        }

        let mut matrix = [[0.0f32; 3]; 3];
        for (r, row) in matrix.iter_mut().enumerate() {
            for (c, value) in row.iter_mut().enumerate() {
                *value = h_mat[(r, c)] as f32;
            }
        }
        Ok(Self { matrix })
    }

    /// Apply the homography to a point.
    ///
    /// Returns `None` when the point maps to infinity.
    #[inline]
    pub fn apply(&self, p: Vec2) -> Option<Vec2> {
        let h = &self.matrix;
        let w = h[2][0] * p.x + h[2][1] * p.y + h[2][2];
        if w.abs() < 1e-10 {
            return None;
        }
        Some(Vec2::new(
            (h[0][0] * p.x + h[0][1] * p.y + h[0][2]) / w,
            (h[1][0] * p.x + h[1][1] * p.y + h[1][2]) / w,
        ))
    }

    /// Compute the inverse homography.
    pub fn invert(&self) -> CalibrationResult<Self> {
        let h = Matrix3::from_fn(|r, c| self.matrix[r][c] as f64);
        let inv = (h.determinant().abs() >= 1e-12)
            .then(|| h.try_inverse())
            .flatten()
            .ok_or_else(|| {
                CalibrationError::DegenerateHomography("matrix is singular".to_string())
            })?;

        Ok(Self {
            matrix: std::array::from_fn(|r| std::array::from_fn(|c| inv[(r, c)] as f32)),
        })
    }

    /// Mean reprojection error over a set of correspondences.
    pub fn reprojection_error(&self, src: &[Vec2], dst: &[Vec2]) -> f32 {
        let mut total = 0.0;
        let mut count = 0;
        for (s, d) in src.iter().zip(dst.iter()) {
            if let Some(p) = self.apply(*s) {
                total += p.distance(*d);
                count += 1;
            }
        }
        if count > 0 {
            total / count as f32
        } else {
            0.0
        }
    }
}

/// Hartley normalization: zero mean, average distance sqrt(2).
fn normalization(points: &[Vec2]) -> Option<Matrix3<f64>> {
    let n = points.len() as f64;
    let cx = points.iter().map(|p| p.x as f64).sum::<f64>() / n;
    let cy = points.iter().map(|p| p.y as f64).sum::<f64>() / n;
    let mean_dist = points
        .iter()
        .map(|p| ((p.x as f64 - cx).powi(2) + (p.y as f64 - cy).powi(2)).sqrt())
        .sum::<f64>()
        / n;

    if mean_dist < 1e-12 {
        return None;
    }

    let s = std::f64::consts::SQRT_2 / mean_dist;
    Some(Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0))
}

#[inline]
fn apply_f64(t: &Matrix3<f64>, x: f64, y: f64) -> (f64, f64) {
    let w = t[(2, 0)] * x + t[(2, 1)] * y + t[(2, 2)];
    (
        (t[(0, 0)] * x + t[(0, 1)] * y + t[(0, 2)]) / w,
        (t[(1, 0)] * x + t[(1, 1)] * y + t[(1, 2)]) / w,
    )
}
