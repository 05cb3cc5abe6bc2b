//! Transaction fee estimation.

use crate::error::FeeError;

/// Fee rate used when no live estimate is available, in sat/vB.
pub const DEFAULT_FEE_RATE: f64 = 10.0;

/// Virtual size of a transaction spending and creating Taproot outputs.
///
/// 10 vB of overhead, about 58 vB per key-path input and 43 vB per output.
pub fn estimate_vsize(num_inputs: usize, num_outputs: usize) -> u64 {
    10 + 58 * num_inputs as u64 + 43 * num_outputs as u64
}

/// Source of fee estimates for the funding planner.
pub trait FeeEstimator {
    /// Total fee in satoshis for a transaction of the given shape.
    fn estimate_fee(&self, num_inputs: usize, num_outputs: usize) -> Result<u64, FeeError>;
}

impl<T: FeeEstimator + ?Sized> FeeEstimator for &T {
    fn estimate_fee(&self, num_inputs: usize, num_outputs: usize) -> Result<u64, FeeError> {
        (**self).estimate_fee(num_inputs, num_outputs)
    }
}

/// Fee rate times estimated vsize, rounded up.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VsizeFeeEstimator {
    pub sat_per_vbyte: f64,
}

impl VsizeFeeEstimator {
    pub fn new(sat_per_vbyte: f64) -> Self {
        VsizeFeeEstimator { sat_per_vbyte }
    }
}

impl Default for VsizeFeeEstimator {
    fn default() -> Self {
        VsizeFeeEstimator::new(DEFAULT_FEE_RATE)
    }
}

impl FeeEstimator for VsizeFeeEstimator {
    fn estimate_fee(&self, num_inputs: usize, num_outputs: usize) -> Result<u64, FeeError> {
        if !self.sat_per_vbyte.is_finite() || self.sat_per_vbyte <= 0.0 {
            return Err(FeeError::InvalidRate(format!("{} sat/vB", self.sat_per_vbyte)));
        }
        let vsize = estimate_vsize(num_inputs, num_outputs);
        Ok((vsize as f64 * self.sat_per_vbyte).ceil() as u64)
    }
}

/// Same fee regardless of transaction shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedFeeEstimator(pub u64);

impl FeeEstimator for FixedFeeEstimator {
    fn estimate_fee(&self, _num_inputs: usize, _num_outputs: usize) -> Result<u64, FeeError> {
        Ok(self.0)
    }
}
