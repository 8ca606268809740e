// src/motion/planner/solver.rs
//! Numeric helpers for the planner: kinematic closed forms and the bisection
//! search for a cruise velocity. Everything here is a pure function of its
//! arguments.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Shared phase durations of one segment, in seconds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Timing {
    pub t_a: f64,
    pub t_c: f64,
    pub t_d: f64,
}

impl Timing {
    pub fn new(t_a: f64, t_c: f64, t_d: f64) -> Self {
        Self { t_a, t_c, t_d }
    }

    /// Total duration of the segment.
    pub fn total(&self) -> f64 {
        self.t_a + self.t_c + self.t_d
    }
}

/// Bisection budget for the cruise velocity search.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Stop bisecting once the velocity bracket is narrower than this.
    #[serde(default = "default_velocity_tolerance")]
    pub velocity_tolerance: f64,
    /// Largest distance residual, in steps, accepted as a solution.
    #[serde(default = "default_distance_tolerance")]
    pub distance_tolerance: f64,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: u32,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            velocity_tolerance: default_velocity_tolerance(),
            distance_tolerance: default_distance_tolerance(),
            max_iterations: default_max_iterations(),
        }
    }
}

fn default_velocity_tolerance() -> f64 { 1e-9 }
fn default_distance_tolerance() -> f64 { 1e-3 }
fn default_max_iterations() -> u32 { 200 }

#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("distance {x} is out of reach below v_max, covers only {reached:.3}")]
    Unreachable { x: f64, reached: f64 },
    #[error("boundary velocities alone cover {reached:.3}, more than distance {x}")]
    Overshoot { x: f64, reached: f64 },
    #[error("no convergence after {iterations} iterations, residual {residual:.6}")]
    NoConvergence { iterations: u32, residual: f64 },
}

/// The single unknown left once a segment's timing and boundary velocities are
/// fixed: which cruise velocity covers exactly `x`?
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CruiseProblem {
    pub timing: Timing,
    pub v_0: f64,
    pub v_1: f64,
    pub x: f64,
    pub v_max: f64,
}

impl CruiseProblem {
    /// Distance covered with cruise velocity `v_c`. Non-decreasing in `v_c`.
    pub fn distance_at(&self, v_c: f64) -> f64 {
        let x_a = (self.v_0 + v_c) * self.timing.t_a / 2.0;
        let x_d = (self.v_1 + v_c) * self.timing.t_d / 2.0;
        let x_c = self.timing.t_c * v_c;
        x_a + x_c + x_d
    }

    fn residual(&self, v_c: f64) -> f64 {
        self.x - self.distance_at(v_c)
    }
}

/// Bisect for the cruise velocity in `[0, v_max]`.
///
/// The upper bound starts at the mean velocity `x / t` and doubles until it
/// brackets the root or reaches `v_max`.
pub fn solve_cruise_velocity(problem: &CruiseProblem, config: &SolverConfig) -> Result<f64, SolveError> {
    let mut lo = 0.0;
    let f_lo = problem.residual(lo);
    if f_lo == 0.0 {
        return Ok(lo);
    }
    if f_lo < 0.0 {
        if -f_lo <= config.distance_tolerance {
            return Ok(lo);
        }
        return Err(SolveError::Overshoot {
            x: problem.x,
            reached: problem.distance_at(lo),
        });
    }

    let total = problem.timing.total();
    let mean = if total > 0.0 { problem.x / total } else { 0.0 };
    let mut hi = if mean > 0.0 { mean.min(problem.v_max) } else { problem.v_max };
    let mut f_hi = problem.residual(hi);
    while f_hi > 0.0 && hi < problem.v_max {
        hi = (hi * 2.0).min(problem.v_max);
        f_hi = problem.residual(hi);
    }
    if f_hi == 0.0 {
        return Ok(hi);
    }
    if f_hi > 0.0 {
        if f_hi <= config.distance_tolerance {
            return Ok(hi);
        }
        return Err(SolveError::Unreachable {
            x: problem.x,
            reached: problem.distance_at(hi),
        });
    }

    let mut iterations = 0;
    while iterations < config.max_iterations && hi - lo > config.velocity_tolerance {
        iterations += 1;
        let mid = (lo + hi) / 2.0;
        let f_mid = problem.residual(mid);
        if f_mid == 0.0 {
            return Ok(mid);
        }
        if f_mid > 0.0 {
            lo = mid;
        } else {
            hi = mid;
        }
    }

    let v_c = (lo + hi) / 2.0;
    let residual = problem.residual(v_c);
    tracing::trace!("bisection: v_c={} after {} iterations, residual {}", v_c, iterations, residual);
    if residual.abs() > config.distance_tolerance {
        return Err(SolveError::NoConvergence { iterations, residual });
    }
    Ok(v_c)
}

/// Time to cover `x` from `v_0` under constant acceleration `a`: the positive
/// root of `½at² + v₀t − x = 0`.
pub fn accel_t_for_x(x: f64, v_0: f64, a: f64) -> f64 {
    if x <= 0.0 {
        return 0.0;
    }
    // Rationalized form; avoids cancellation when v_0 dominates.
    2.0 * x / (v_0 + (v_0 * v_0 + 2.0 * a * x).sqrt())
}

/// Peak velocity of a triangle profile covering `x`, accelerating at `a` from
/// `v_0` then decelerating at `d` to `v_1`. Never below the larger endpoint.
pub fn triangle_peak_velocity(x: f64, v_0: f64, v_1: f64, a: f64, d: f64) -> f64 {
    let v_p_sq = (2.0 * a * d * x + d * v_0 * v_0 + a * v_1 * v_1) / (a + d);
    v_p_sq.max(0.0).sqrt().max(v_0).max(v_1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn problem(timing: Timing, x: f64) -> CruiseProblem {
        CruiseProblem { timing, v_0: 0.0, v_1: 0.0, x, v_max: 1000.0 }
    }

    #[test]
    fn test_exact_root_at_v_max() {
        let p = problem(Timing::new(2.0, 8.0, 2.0), 10000.0);
        let v_c = solve_cruise_velocity(&p, &SolverConfig::default()).unwrap();
        assert_eq!(v_c, 1000.0);
    }

    #[test]
    fn test_root_below_mean_bound() {
        // calc_x(v) = 4v, so the root is 250
        let p = problem(Timing::new(2.0, 2.0, 2.0), 1000.0);
        let v_c = solve_cruise_velocity(&p, &SolverConfig::default()).unwrap();
        assert!((v_c - 250.0).abs() < 1e-6);
    }

    #[test]
    fn test_unreachable_distance() {
        let p = problem(Timing::new(1.0, 0.0, 1.0), 5000.0);
        let err = solve_cruise_velocity(&p, &SolverConfig::default()).unwrap_err();
        assert!(matches!(err, SolveError::Unreachable { .. }));
    }

    #[test]
    fn test_boundary_overshoot() {
        let mut p = problem(Timing::new(1.0, 0.0, 1.0), 100.0);
        p.v_0 = 500.0;
        let err = solve_cruise_velocity(&p, &SolverConfig::default()).unwrap_err();
        assert!(matches!(err, SolveError::Overshoot { .. }));
    }

    #[test]
    fn test_accel_t_for_x() {
        // x = ½ * 500 * t², x = 5 -> t = sqrt(0.02)
        let t = accel_t_for_x(5.0, 0.0, 500.0);
        assert!((t - 0.02_f64.sqrt()).abs() < 1e-12);
        // with initial velocity: 0.5*2*t² + 3t - 4 = 0 -> t = 1
        assert!((accel_t_for_x(4.0, 3.0, 2.0) - 1.0).abs() < 1e-12);
        assert_eq!(accel_t_for_x(0.0, 0.0, 500.0), 0.0);
    }

    #[test]
    fn test_triangle_peak_symmetric_split() {
        let v_p = triangle_peak_velocity(10.0, 0.0, 0.0, 500.0, 500.0);
        // Each half covers v_p² / 2a = 5
        assert!((v_p * v_p / 1000.0 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_triangle_peak_asymmetric() {
        let (a, d, x) = (400.0, 100.0, 50.0);
        let v_p = triangle_peak_velocity(x, 0.0, 0.0, a, d);
        let x_a = v_p * v_p / (2.0 * a);
        let x_d = v_p * v_p / (2.0 * d);
        assert!((x_a + x_d - x).abs() < 1e-9);
        assert!(x_d > x_a);
    }
}
