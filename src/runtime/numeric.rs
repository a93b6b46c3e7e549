use ndarray::Array3;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum NumericError {
    #[error("At least two methods are required, got {0}")]
    TooFewMethods(usize),
    #[error("Coefficient table has shape {found:?}, expected {expected:?}")]
    CoefficientShape {
        expected: [usize; 3],
        found: Vec<usize>,
    },
    #[error("Step size factor '{name}' must be greater than one, got {value}")]
    InvalidFactor { name: &'static str, value: f64 },
    #[error("Tolerance '{name}' must be positive and finite, got {value}")]
    InvalidTolerance { name: &'static str, value: f64 },
}

/// Constants of an embedded explicit multi-stage integration scheme
#[derive(Debug, Clone, PartialEq)]
pub struct NumConsts {
    pub nmb_methods: usize,
    pub nmb_stages: usize,
    pub dt_increase: f64,
    pub dt_decrease: f64,
    /// Largest accepted local error
    pub abs_error_max: f64,
    /// Smallest sub-step, as a fraction of one simulation step
    pub dt_min: f64,
    /// Indexed by `[method - 1, stage, earlier stage]`
    pub a_coefs: Array3<f64>,
}

impl NumConsts {
    pub fn new(
        a_coefs: Array3<f64>,
        dt_increase: f64,
        dt_decrease: f64,
        abs_error_max: f64,
        dt_min: f64,
    ) -> Result<Self, NumericError> {
        let nmb_methods = a_coefs.shape()[0];
        if nmb_methods < 2 {
            return Err(NumericError::TooFewMethods(nmb_methods));
        }
        let expected = [nmb_methods, nmb_methods + 1, nmb_methods];
        if a_coefs.shape() != expected {
            return Err(NumericError::CoefficientShape {
                expected,
                found: a_coefs.shape().to_vec(),
            });
        }
        for (name, value) in [("dt_increase", dt_increase), ("dt_decrease", dt_decrease)] {
            if !(value > 1.0) {
                return Err(NumericError::InvalidFactor { name, value });
            }
        }
        for (name, value) in [("abs_error_max", abs_error_max), ("dt_min", dt_min)] {
            if !(value > 0.0 && value.is_finite()) {
                return Err(NumericError::InvalidTolerance { name, value });
            }
        }
        Ok(Self {
            nmb_methods,
            nmb_stages: nmb_methods + 1,
            dt_increase,
            dt_decrease,
            abs_error_max,
            dt_min,
            a_coefs,
        })
    }

    /// Explicit Euler embedded in Heun's method
    pub fn euler_heun() -> Self {
        let mut a_coefs = Array3::zeros((2, 3, 2));
        a_coefs[[0, 1, 0]] = 1.0;
        a_coefs[[1, 1, 0]] = 1.0;
        a_coefs[[1, 2, 0]] = 0.5;
        a_coefs[[1, 2, 1]] = 0.5;
        Self {
            nmb_methods: 2,
            nmb_stages: 3,
            dt_increase: 2.0,
            dt_decrease: 10.0,
            abs_error_max: 0.01,
            dt_min: 0.001,
            a_coefs,
        }
    }
}

impl Default for NumConsts {
    fn default() -> Self {
        Self::euler_heun()
    }
}

/// Mutable bookkeeping of one model instance's integration
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NumVars {
    pub nmb_calls: usize,
    pub idx_method: usize,
    pub idx_stage: usize,
    pub t0: f64,
    pub t1: f64,
    pub dt: f64,
    pub dt_est: f64,
    pub error: f64,
    pub last_error: f64,
    pub extrapolated_error: f64,
    pub f0_ready: bool,
}

impl NumVars {
    pub fn reset_error(&mut self) {
        self.error = 0.0;
    }

    /// Fold one element's difference between two method results into `error`
    #[inline]
    pub fn update_error(&mut self, current: f64, previous: f64) {
        self.error = f64::max(self.error, (current - previous).abs());
    }
}
