use nalgebra::{Matrix2, Matrix2x4, Matrix4, Vector2, Vector4};

/// Smallest variance kept on the covariance diagonal.
const MIN_VARIANCE: f32 = 1e-4;

/// Constant-velocity Kalman filter over `[x, y, vx, vy]`.
#[derive(Debug, Clone)]
pub struct KalmanCV {
    pub(crate) mean: Vector4<f32>,
    pub(crate) covariance: Matrix4<f32>,
    update_mat: Matrix2x4<f32>,
    process_noise: f32,
    measurement_noise: f32,
}

impl KalmanCV {
    /// `process_noise` is the acceleration std (units/s^2),
    /// `measurement_noise` the position std (units).
    pub fn new(process_noise: f32, measurement_noise: f32) -> Self {
        let mut update = Matrix2x4::<f32>::zeros();
        update[(0, 0)] = 1.0;
        update[(1, 1)] = 1.0;

        Self {
            mean: Vector4::zeros(),
            covariance: Matrix4::identity(),
            update_mat: update,
            process_noise,
            measurement_noise,
        }
    }

    pub fn initiate(&mut self, x: f32, y: f32) {
        self.mean = Vector4::new(x, y, 0.0, 0.0);

        let pos_var = (2.0 * self.measurement_noise).powi(2);
        let vel_var = (10.0 * self.process_noise).powi(2);

        self.covariance = Matrix4::from_diagonal(&Vector4::new(pos_var, pos_var, vel_var, vel_var));
    }

    #[inline]
    pub fn position(&self) -> Vector2<f32> {
        Vector2::new(self.mean[0], self.mean[1])
    }

    #[inline]
    pub fn velocity(&self) -> Vector2<f32> {
        Vector2::new(self.mean[2], self.mean[3])
    }

    pub fn predict(&mut self, dt: f32) {
        let mut motion = Matrix4::<f32>::identity();
        motion[(0, 2)] = dt;
        motion[(1, 3)] = dt;

        // discrete white-noise acceleration
        let q = self.process_noise * self.process_noise;
        let (dt2, dt3, dt4) = (dt * dt, dt * dt * dt, dt * dt * dt * dt);
        let mut motion_cov = Matrix4::<f32>::zeros();
        for i in 0..2 {
            motion_cov[(i, i)] = dt4 / 4.0 * q;
            motion_cov[(i, i + 2)] = dt3 / 2.0 * q;
            motion_cov[(i + 2, i)] = dt3 / 2.0 * q;
            motion_cov[(i + 2, i + 2)] = dt2 * q;
        }

        self.mean = motion * self.mean;
        self.covariance = motion * self.covariance * motion.transpose() + motion_cov;
        self.regularize();
    }

    fn project(&self) -> (Vector2<f32>, Matrix2<f32>) {
        let r = self.measurement_noise * self.measurement_noise;

        let mean = self.update_mat * self.mean;
        let cov = self.update_mat * self.covariance * self.update_mat.transpose()
            + Matrix2::from_diagonal_element(r);

        (mean, cov)
    }

    /// Corrects the state with a position measurement. Fails when the
    /// innovation covariance is not SPD or the result is not finite; the
    /// caller is expected to re-initiate the filter.
    pub fn update(&mut self, x: f32, y: f32) -> Result<(), String> {
        let (projected_mean, projected_cov) = self.project();
        let chol = projected_cov
            .cholesky()
            .ok_or_else(|| "projected covariance is not SPD".to_string())?;

        let ph_t = self.covariance * self.update_mat.transpose();
        let kalman_gain = ph_t * chol.inverse();
        let innovation = Vector2::new(x, y) - projected_mean;

        self.mean += kalman_gain * innovation;
        self.covariance -= kalman_gain * projected_cov * kalman_gain.transpose();
        self.regularize();

        if self.is_finite() {
            Ok(())
        } else {
            Err("state became non-finite".to_string())
        }
    }

    /// Keeps the covariance symmetric with a positive diagonal.
    fn regularize(&mut self) {
        self.covariance = (self.covariance + self.covariance.transpose()) * 0.5;
        for i in 0..4 {
            if !(self.covariance[(i, i)] >= MIN_VARIANCE) {
                self.covariance[(i, i)] = MIN_VARIANCE;
            }
        }
    }

    pub fn is_finite(&self) -> bool {
        self.mean.iter().all(|v| v.is_finite()) && self.covariance.iter().all(|v| v.is_finite())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn predicts_along_estimated_velocity() {
        let mut kf = KalmanCV::new(1.0, 0.1);
        kf.initiate(0.0, 0.0);

        for i in 1..=20 {
            kf.predict(0.1);
            kf.update(i as f32, 0.0).unwrap();
        }

        assert_abs_diff_eq!(kf.velocity().x, 10.0, epsilon = 0.5);
        assert_abs_diff_eq!(kf.velocity().y, 0.0, epsilon = 0.1);

        kf.predict(0.1);
        assert_abs_diff_eq!(kf.position().x, 21.0, epsilon = 0.3);
    }

    #[test]
    fn covariance_stays_symmetric_and_positive() {
        let mut kf = KalmanCV::new(5.0, 0.5);
        kf.initiate(3.0, 4.0);

        for _ in 0..50 {
            kf.predict(0.04);
            kf.update(3.0, 4.0).unwrap();
        }

        let p = kf.covariance;
        assert_abs_diff_eq!(p, p.transpose(), epsilon = 1e-6);
        for i in 0..4 {
            assert!(p[(i, i)] >= MIN_VARIANCE);
        }
    }

    #[test]
    fn non_finite_measurement_is_reported() {
        let mut kf = KalmanCV::new(1.0, 0.5);
        kf.initiate(0.0, 0.0);
        kf.predict(0.1);

        assert!(kf.update(f32::INFINITY, 0.0).is_err());
    }
}
