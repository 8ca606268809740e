// src/motion/joint.rs - Static per-axis limits

use serde::{Deserialize, Serialize};

use crate::motion::planner::SegmentError;

/// Physical limits of one stepper axis, in steps, steps/s and steps/s².
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Joint {
    /// Maximum velocity
    pub v_max: f64,
    /// Maximum acceleration
    pub a_max: f64,
    /// Maximum deceleration, usually equal to `a_max`
    pub d_max: f64,
    /// Axis ordinal
    pub index: usize,
}

impl Joint {
    /// Create a joint, rejecting limits that are not finite and positive.
    pub fn new(index: usize, v_max: f64, a_max: f64, d_max: f64) -> Result<Self, SegmentError> {
        for (name, value) in [("v_max", v_max), ("a_max", a_max), ("d_max", d_max)] {
            if !value.is_finite() || value <= 0.0 {
                return Err(SegmentError::MalformedRequest(format!(
                    "axis {} has invalid {}: {}",
                    index, name, value
                )));
            }
        }
        Ok(Self { v_max, a_max, d_max, index })
    }

    /// Joint with equal acceleration and deceleration limits.
    pub fn symmetric(index: usize, v_max: f64, a_max: f64) -> Result<Self, SegmentError> {
        Self::new(index, v_max, a_max, a_max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symmetric_joint() {
        let joint = Joint::symmetric(2, 1000.0, 500.0).unwrap();
        assert_eq!(joint.index, 2);
        assert_eq!(joint.a_max, joint.d_max);
    }

    #[test]
    fn test_rejects_bad_limits() {
        assert!(Joint::new(0, 0.0, 500.0, 500.0).is_err());
        assert!(Joint::new(0, 1000.0, -1.0, 500.0).is_err());
        assert!(Joint::new(0, 1000.0, 500.0, f64::NAN).is_err());
    }
}
