//! Constant-velocity Kalman filter over XYAH boxes.
//!
//! State is 8-dimensional: `[cx, cy, a, h, vcx, vcy, va, vh]`. Matrices are
//! `ndarray`, the 4x4 innovation inverse goes through `nalgebra`.

use ndarray::{Array1, Array2};

use crate::tracker::rect::Rect;

#[derive(Debug, Clone)]
pub struct KalmanFilter {
    motion_mat: Array2<f64>,
    update_mat: Array2<f64>,
    std_weight_position: f64,
    std_weight_velocity: f64,
}

impl Default for KalmanFilter {
    fn default() -> Self {
        Self::new()
    }
}

/// Box as a filter measurement.
pub fn measurement(rect: &Rect) -> [f64; 4] {
    rect.to_xyah().map(f64::from)
}

/// Box encoded by the positional half of a state mean.
pub fn mean_to_rect(mean: &Array1<f64>) -> Rect {
    Rect::from_xyah(
        mean[0] as f32,
        mean[1] as f32,
        mean[2] as f32,
        mean[3] as f32,
    )
}

impl KalmanFilter {
    pub fn new() -> Self {
        let ndim = 4;
        let mut motion_mat = Array2::eye(2 * ndim);
        for i in 0..ndim {
            motion_mat[[i, ndim + i]] = 1.0;
        }

        let mut update_mat = Array2::zeros((ndim, 2 * ndim));
        for i in 0..ndim {
            update_mat[[i, i]] = 1.0;
        }

        Self {
            motion_mat,
            update_mat,
            std_weight_position: 1.0 / 20.0,
            std_weight_velocity: 1.0 / 160.0,
        }
    }

    /// Start a track at `measurement` with zero velocity.
    pub fn initiate(&self, measurement: [f64; 4]) -> (Array1<f64>, Array2<f64>) {
        let mut mean = Array1::zeros(8);
        for (i, value) in measurement.iter().enumerate() {
            mean[i] = *value;
        }

        let h = measurement[3];
        let pos = 2.0 * self.std_weight_position * h;
        let vel = 10.0 * self.std_weight_velocity * h;
        let std = [pos, pos, 1e-2, pos, vel, vel, 1e-5, vel];

        (mean, diagonal_squared(&std))
    }

    pub fn predict(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = mean[3];
        let pos = self.std_weight_position * h;
        let vel = self.std_weight_velocity * h;
        let motion_cov = diagonal_squared(&[pos, pos, 1e-2, pos, vel, vel, 1e-5, vel]);

        let new_mean = self.motion_mat.dot(mean);
        let new_covariance =
            self.motion_mat.dot(covariance).dot(&self.motion_mat.t()) + motion_cov;

        (new_mean, new_covariance)
    }

    /// Project the state distribution into measurement space.
    pub fn project(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
    ) -> (Array1<f64>, Array2<f64>) {
        let h = mean[3];
        let pos = self.std_weight_position * h;
        let innovation_cov = diagonal_squared(&[pos, pos, 1e-1, pos]);

        let mean_proj = self.update_mat.dot(mean);
        let covariance_proj =
            self.update_mat.dot(covariance).dot(&self.update_mat.t()) + innovation_cov;

        (mean_proj, covariance_proj)
    }

    /// Correct the state with a measurement.
    ///
    /// Returns `None` when the innovation covariance is singular; callers keep
    /// the predicted state in that case.
    pub fn update(
        &self,
        mean: &Array1<f64>,
        covariance: &Array2<f64>,
        measurement: [f64; 4],
    ) -> Option<(Array1<f64>, Array2<f64>)> {
        let (projected_mean, projected_cov) = self.project(mean, covariance);
        let innovation = Array1::from_vec(measurement.to_vec()) - projected_mean;

        // K = P * H^T * S^-1, H = [I 0]
        let s_inv = invert_4x4(&projected_cov)?;
        let kalman_gain = covariance.dot(&self.update_mat.t()).dot(&s_inv);

        let new_mean = mean + kalman_gain.dot(&innovation);
        let new_covariance = covariance - kalman_gain.dot(&projected_cov).dot(&kalman_gain.t());

        Some((new_mean, new_covariance))
    }
}

fn diagonal_squared(std: &[f64]) -> Array2<f64> {
    let mut m = Array2::zeros((std.len(), std.len()));
    for (i, s) in std.iter().enumerate() {
        m[[i, i]] = s * s;
    }
    m
}

fn invert_4x4(m: &Array2<f64>) -> Option<Array2<f64>> {
    let nm = nalgebra::Matrix4::from_fn(|i, j| m[[i, j]]);
    let inv = nm.try_inverse()?;
    Some(Array2::from_shape_fn((4, 4), |(i, j)| inv[(i, j)]))
}
