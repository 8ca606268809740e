// src/motion/planner/sub_segment.rs

use serde::Serialize;
use std::fmt;

use super::joint_segment::Direction;

/// Which part of a segment a sub-segment covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Accel,
    Cruise,
    Decel,
}

impl Phase {
    pub fn as_char(&self) -> char {
        match self {
            Phase::Accel => 'a',
            Phase::Cruise => 'c',
            Phase::Decel => 'd',
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

/// One constant-acceleration phase of one axis, ready for step generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubSegment {
    pub seg_number: u64,
    pub axis: usize,
    pub phase: Phase,
    /// Duration (s)
    pub t: f64,
    /// Initial velocity (steps/s), signed
    pub v_i: f64,
    /// Final velocity (steps/s), signed
    pub v_f: f64,
    /// Steps, signed
    pub x: i64,
    pub direction: Direction,
}

impl SubSegment {
    /// Build a forward sub-segment from magnitudes; apply the axis direction
    /// with [`SubSegment::with_direction`].
    pub fn new(seg_number: u64, axis: usize, phase: Phase, t: f64, v_i: f64, v_f: f64, x: i64) -> Self {
        debug_assert!(
            v_i == 0.0 || v_f == 0.0 || v_i.signum() == v_f.signum(),
            "inconsistent directions {} {}",
            v_i,
            v_f
        );
        Self {
            seg_number,
            axis,
            phase,
            t,
            v_i,
            v_f,
            x,
            direction: Direction::Forward,
        }
    }

    pub fn with_direction(mut self, direction: Direction) -> Self {
        let s = direction.signum();
        self.direction = direction;
        self.v_i *= s;
        self.v_f *= s;
        self.x *= direction.as_i64();
        self
    }

    /// Constant acceleration over the phase (steps/s²).
    pub fn acceleration(&self) -> f64 {
        if self.t > 0.0 {
            (self.v_f - self.v_i) / self.t
        } else {
            0.0
        }
    }
}

impl fmt::Display for SubSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{} {:2.5} {:5} {:5.0}->{:5.0}]",
            self.phase, self.t, self.x, self.v_i, self.v_f
        )
    }
}
