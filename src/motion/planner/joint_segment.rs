// src/motion/planner/joint_segment.rs
//! One axis's share of one segment.

use serde::Serialize;
use std::fmt;

use super::solver::{self, CruiseProblem, SolverConfig, Timing};
use super::sub_segment::{Phase, SubSegment};
use super::validate::{self, Profile, ValidationPolicy, Violation};
use super::SegmentError;
use crate::motion::joint::Joint;

/// Distances this close to the segment length leave no room for a handoff.
const DISTANCE_EPSILON: f64 = 1e-6;

/// Direction of travel of one axis within one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Direction {
    Forward,
    Reverse,
    Still,
}

impl Direction {
    pub fn of(x: i64) -> Self {
        match x.signum() {
            1 => Direction::Forward,
            -1 => Direction::Reverse,
            _ => Direction::Still,
        }
    }

    pub fn signum(&self) -> f64 {
        self.as_i64() as f64
    }

    pub fn as_i64(&self) -> i64 {
        match self {
            Direction::Forward => 1,
            Direction::Reverse => -1,
            Direction::Still => 0,
        }
    }

    /// Both directions are non-zero and opposite.
    pub fn is_reversal(&self, other: Direction) -> bool {
        matches!(
            (self, other),
            (Direction::Forward, Direction::Reverse) | (Direction::Reverse, Direction::Forward)
        )
    }
}

/// Velocity-vs-time shape of the unconstrained profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Shape {
    Trapezoid,
    Triangle,
}

/// The adjoining joint segment on the same axis, in the neighbouring segment.
#[derive(Debug, Clone, Copy)]
pub enum Neighbor<'a> {
    Prior(&'a JointSegment),
    Next(&'a JointSegment),
}

/// Velocity at the boundary between `prior` and `next`: the mean of the two
/// cruise velocities, never above what either side allows.
pub fn boundary_velocity(prior: &JointSegment, next: &JointSegment) -> f64 {
    let mean = (prior.v_c + next.v_c) / 2.0;
    mean.min(prior.v_1_max).min(next.v_0_max)
}

#[derive(Debug, Clone)]
pub struct JointSegment {
    pub(crate) joint: Joint,
    pub(crate) seg_number: u64,

    pub(crate) x: f64,
    pub(crate) sign: Direction,
    /// Extra distance folded into the cruise phase
    pub(crate) x_err: f64,

    pub(crate) x_a: f64,
    pub(crate) x_c: f64,
    pub(crate) x_d: f64,

    pub(crate) v_0: f64,
    pub(crate) v_0_max: f64,
    pub(crate) v_c: f64,
    pub(crate) v_1: f64,
    pub(crate) v_1_max: f64,

    pub(crate) shape: Shape,

    pub(crate) t_min: f64,
    pub(crate) min_t_a: f64,
    pub(crate) min_t_c: f64,
    pub(crate) min_t_d: f64,
}

impl JointSegment {
    /// New joint segment for a signed step distance, entering at `v_0`
    /// (a magnitude). The cruise velocity starts at the joint maximum.
    pub fn new(joint: Joint, seg_number: u64, x: i64, v_0: f64) -> Self {
        Self {
            joint,
            seg_number,
            x: x.unsigned_abs() as f64,
            sign: Direction::of(x),
            x_err: 0.0,
            x_a: 0.0,
            x_c: 0.0,
            x_d: 0.0,
            v_0,
            v_0_max: joint.v_max,
            v_c: joint.v_max,
            v_1: 0.0,
            v_1_max: joint.v_max,
            shape: Shape::Trapezoid,
            t_min: 0.0,
            min_t_a: 0.0,
            min_t_c: 0.0,
            min_t_d: 0.0,
        }
    }

    pub fn id(&self) -> String {
        format!("{}/{}", self.seg_number, self.joint.index)
    }

    pub fn joint(&self) -> &Joint { &self.joint }
    pub fn x(&self) -> f64 { self.x }
    pub fn direction(&self) -> Direction { self.sign }
    pub fn v_0(&self) -> f64 { self.v_0 }
    pub fn v_c(&self) -> f64 { self.v_c }
    pub fn v_1(&self) -> f64 { self.v_1 }
    pub fn v_0_max(&self) -> f64 { self.v_0_max }
    pub fn v_1_max(&self) -> f64 { self.v_1_max }
    pub fn x_a(&self) -> f64 { self.x_a }
    pub fn x_c(&self) -> f64 { self.x_c }
    pub fn x_d(&self) -> f64 { self.x_d }
    pub fn x_err(&self) -> f64 { self.x_err }
    pub fn shape(&self) -> Shape { self.shape }
    pub fn t_min(&self) -> f64 { self.t_min }

    /// This axis's own minimum-time phase durations.
    pub fn min_timing(&self) -> Timing {
        Timing::new(self.min_t_a, self.min_t_c, self.min_t_d)
    }

    /// Minimum time to run the segment at this axis's own limits, cruising at
    /// `v_max`. Only used to choose the segment's timing master.
    pub fn update_t_min(&mut self) {
        let Joint { v_max, a_max, d_max, .. } = self.joint;

        // Upper bounds on the ramp times, reaching full speed.
        let mut t_a = (v_max - self.v_0).abs() / a_max;
        let mut t_d = (v_max - self.v_1).abs() / d_max;

        let mut x_a = (self.v_0 + v_max) * t_a / 2.0;
        let mut x_d = (self.v_1 + v_max) * t_d / 2.0;

        self.shape = Shape::Trapezoid;

        // Not enough distance to reach full speed
        if x_a + x_d > self.x {
            let v_p = solver::triangle_peak_velocity(self.x, self.v_0, self.v_1, a_max, d_max);
            x_a = ((v_p * v_p - self.v_0 * self.v_0) / (2.0 * a_max)).max(0.0);
            x_d = ((v_p * v_p - self.v_1 * self.v_1) / (2.0 * d_max)).max(0.0);
            t_a = solver::accel_t_for_x(x_a, self.v_0, a_max);
            t_d = solver::accel_t_for_x(x_d, self.v_1, d_max);
            self.shape = Shape::Triangle;
        }

        let x_c = (self.x - x_a - x_d).max(0.0);
        let t_c = if self.shape == Shape::Trapezoid { x_c / v_max } else { 0.0 };

        self.t_min = t_a + t_c + t_d;
        self.min_t_a = t_a;
        self.min_t_c = t_c;
        self.min_t_d = t_d;
    }

    /// Cruise time this axis needs at `v_max` to cover its distance within the
    /// ramps of `timing`. Zero when the ramps alone are long enough.
    pub fn required_t_c(&self, timing: &Timing) -> f64 {
        let v_max = self.joint.v_max;
        let reach = self.cruise_problem(&Timing::new(timing.t_a, 0.0, timing.t_d)).distance_at(v_max);
        ((self.x - reach) / v_max).max(0.0)
    }

    /// Recompute the phase distances from the current velocities. Returns the
    /// total.
    pub fn update_sub_segments(&mut self, timing: &Timing) -> f64 {
        self.x_a = (self.v_0 + self.v_c) * timing.t_a / 2.0;
        self.x_d = (self.v_1 + self.v_c) * timing.t_d / 2.0;
        self.x_c = timing.t_c * self.v_c + self.x_err;

        self.x_a + self.x_c + self.x_d
    }

    /// Distance covered at cruise velocity `v_c`, everything else fixed.
    pub fn calc_x(&self, v_c: f64, timing: &Timing) -> f64 {
        self.cruise_problem(timing).distance_at(v_c)
    }

    fn cruise_problem(&self, timing: &Timing) -> CruiseProblem {
        CruiseProblem {
            timing: *timing,
            v_0: self.v_0,
            v_1: self.v_1,
            x: self.x,
            v_max: self.joint.v_max,
        }
    }

    /// Bisection search for `v_c`.
    pub fn search_v_c(&self, timing: &Timing, config: &SolverConfig) -> Result<f64, SegmentError> {
        solver::solve_cruise_velocity(&self.cruise_problem(timing), config).map_err(|source| {
            SegmentError::Convergence {
                segment: self.seg_number,
                axis: self.joint.index,
                x: self.x,
                v_0: self.v_0,
                v_1: self.v_1,
                t_a: timing.t_a,
                t_c: timing.t_c,
                t_d: timing.t_d,
                v_max: self.joint.v_max,
                source,
            }
        })
    }

    /// Find the `v_c` that covers `x` in the segment's timing. The residual is
    /// absorbed by the cruise phase and returned.
    pub fn update_v_c(&mut self, timing: &Timing, config: &SolverConfig) -> Result<f64, SegmentError> {
        self.x_err = 0.0;

        if self.x == 0.0 {
            self.v_c = 0.0;
            self.update_sub_segments(timing);
            return Ok(0.0);
        }

        let v_c = self.search_v_c(timing, config)?;

        self.x_err = self.x - self.calc_x(v_c, timing);
        self.v_c = v_c;
        self.update_sub_segments(timing);

        if (self.x_a + self.x_d).round() > self.x {
            return Err(self.constraint(format!(
                "acceleration periods are longer than segment {}+{}>{} v_c={}",
                self.x_a, self.x_d, self.x, self.v_c
            )));
        }

        if self.v_c.round() > self.joint.v_max.round() {
            return Err(self.constraint(format!(
                "v_c is too big {} > {}",
                self.v_c.round(),
                self.joint.v_max
            )));
        }

        Ok(self.x_err)
    }

    fn constraint(&self, detail: String) -> SegmentError {
        SegmentError::Constraint {
            segment: self.seg_number,
            axis: self.joint.index,
            detail,
        }
    }

    /// Cap the entry velocity.
    pub fn update_start_velocity_limit(&mut self, is_first: bool, sign_change: bool, timing: &Timing) {
        if is_first || sign_change || self.x == 0.0 {
            self.v_0_max = 0.0;
        } else {
            // x / t_a is the entry speed that would cover the whole distance
            // in the ramp alone with v_c driven to zero.
            self.v_0_max = self.joint.v_max.min(self.x / timing.t_a);
        }
    }

    /// Cap the exit velocity.
    pub fn update_end_velocity_limit(&mut self, is_last: bool, timing: &Timing) {
        if is_last || self.x == 0.0 || self.x_a + self.x_d >= self.x - DISTANCE_EPSILON {
            self.v_1_max = 0.0;
        } else {
            self.v_1_max = self.joint.v_max.min(self.x / timing.t_d);
        }
    }

    /// Set the velocity shared with a neighbouring segment on this axis.
    pub fn update_boundary_velocity(&mut self, neighbor: Neighbor<'_>) {
        match neighbor {
            Neighbor::Prior(prior) => self.v_0 = boundary_velocity(prior, self),
            Neighbor::Next(next) => self.v_1 = boundary_velocity(self, next),
        }
    }

    pub fn profile(&self) -> Profile {
        Profile {
            x: self.x,
            v_0: self.v_0,
            v_c: self.v_c,
            v_1: self.v_1,
            x_a: self.x_a,
            x_c: self.x_c,
            x_d: self.x_d,
            x_err: self.x_err,
            v_max: self.joint.v_max,
        }
    }

    pub fn check_accel_periods(&self) -> Result<(), Violation> {
        validate::check_accel_periods(&self.profile())
    }

    pub fn check_velocity_limits(&self) -> Result<(), Violation> {
        validate::check_velocity_limits(&self.profile())
    }

    pub fn check_distance(&self) -> Result<(), Violation> {
        validate::check_distance(&self.profile())
    }

    pub fn check_velocity_signs(&self) -> Result<(), Violation> {
        validate::check_velocity_signs(&self.profile())
    }

    pub fn check_distance_signs(&self) -> Result<(), Violation> {
        validate::check_distance_signs(&self.profile())
    }

    /// Run every invariant check.
    pub fn validate(&self, policy: ValidationPolicy) -> Result<Vec<Violation>, Violation> {
        validate::run_checks(&self.profile(), policy)
    }

    /// The phases of this joint segment with a non-zero duration, direction
    /// applied. Step counts are rounded per phase, the last phase taking the
    /// remainder so the steps add up to the requested distance.
    pub fn sub_segments(&self, timing: &Timing) -> Vec<SubSegment> {
        let phases = [
            (Phase::Accel, timing.t_a, self.v_0, self.v_c, self.x_a),
            (Phase::Cruise, timing.t_c, self.v_c, self.v_c, self.x_c),
            (Phase::Decel, timing.t_d, self.v_c, self.v_1, self.x_d),
        ];
        let emitted: Vec<_> = phases
            .into_iter()
            .map(|(phase, t, v_i, v_f, x)| (phase, round_to(t, 7), v_i, v_f, x))
            .filter(|(_, t, ..)| *t > 0.0)
            .collect();

        let mut remaining = self.x as i64;
        let last = emitted.len().saturating_sub(1);
        emitted
            .into_iter()
            .enumerate()
            .map(|(i, (phase, t, v_i, v_f, x))| {
                let steps = if i == last { remaining } else { x.round() as i64 };
                remaining -= steps;
                SubSegment::new(
                    self.seg_number,
                    self.joint.index,
                    phase,
                    t,
                    round_to(v_i, 2),
                    round_to(v_f, 2),
                    steps,
                )
                .with_direction(self.sign)
            })
            .collect()
    }
}

fn round_to(value: f64, places: i32) -> f64 {
    let scale = 10f64.powi(places);
    (value * scale).round() / scale
}

impl fmt::Display for JointSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = self.sign.signum();
        write!(
            f,
            "[{:<6.0} {:^5.0} : {:6}@{:<6.0} : {:^5.0} {:>6.0}]",
            self.v_0,
            s * self.x_a,
            (s * self.x_c).round() as i64,
            self.v_c,
            s * self.x_d,
            self.v_1
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn joint() -> Joint {
        Joint::symmetric(0, 1000.0, 500.0).unwrap()
    }

    #[test]
    fn test_direction() {
        assert_eq!(Direction::of(-5), Direction::Reverse);
        assert_eq!(Direction::of(0), Direction::Still);
        assert!(Direction::Forward.is_reversal(Direction::Reverse));
        assert!(!Direction::Forward.is_reversal(Direction::Still));
        assert!(!Direction::Reverse.is_reversal(Direction::Reverse));
    }

    #[test]
    fn test_t_min_trapezoid() {
        let mut js = JointSegment::new(joint(), 0, 10_000, 0.0);
        js.update_t_min();
        assert_eq!(js.shape(), Shape::Trapezoid);
        assert_eq!(js.min_timing(), Timing::new(2.0, 8.0, 2.0));
        assert_eq!(js.t_min(), 12.0);
    }

    #[test]
    fn test_t_min_triangle() {
        let mut js = JointSegment::new(joint(), 0, -10, 0.0);
        js.update_t_min();
        assert_eq!(js.shape(), Shape::Triangle);
        assert_eq!(js.direction(), Direction::Reverse);
        let t = js.min_timing();
        assert!((t.t_a - 0.02_f64.sqrt()).abs() < 1e-12);
        assert!((t.t_d - t.t_a).abs() < 1e-12);
        assert_eq!(t.t_c, 0.0);
    }

    #[test]
    fn test_end_limit_when_not_last() {
        let mut js = JointSegment::new(joint(), 0, 10_000, 0.0);
        js.update_t_min();
        let timing = js.min_timing();
        js.update_sub_segments(&timing);
        js.update_end_velocity_limit(false, &timing);
        assert_eq!(js.v_1_max(), 1000.0);
        js.update_end_velocity_limit(true, &timing);
        assert_eq!(js.v_1_max(), 0.0);
    }

    #[test]
    fn test_start_limit_small_distance() {
        let mut js = JointSegment::new(joint(), 1, 100, 0.0);
        let timing = Timing::new(2.0, 8.0, 2.0);
        js.update_start_velocity_limit(false, false, &timing);
        assert_eq!(js.v_0_max(), 50.0);
        js.update_start_velocity_limit(false, true, &timing);
        assert_eq!(js.v_0_max(), 0.0);
    }

    #[test]
    fn test_zero_distance_resolves_to_rest() {
        let mut js = JointSegment::new(joint(), 0, 0, 0.0);
        let timing = Timing::new(2.0, 8.0, 2.0);
        let x_err = js.update_v_c(&timing, &SolverConfig::default()).unwrap();
        assert_eq!(x_err, 0.0);
        assert_eq!(js.v_c(), 0.0);
        let subs = js.sub_segments(&timing);
        assert_eq!(subs.len(), 3);
        assert!(subs.iter().all(|ss| ss.x == 0 && ss.v_i == 0.0 && ss.v_f == 0.0));
    }

    #[test]
    fn test_sub_segment_steps_sum_to_distance() {
        let mut js = JointSegment::new(joint(), 0, -3999, 0.0);
        let timing = Timing::new(2.0, 2.0, 2.0);
        js.update_v_c(&timing, &SolverConfig::default()).unwrap();
        let subs = js.sub_segments(&timing);
        assert_eq!(subs.iter().map(|ss| ss.x).sum::<i64>(), -3999);
        assert!(subs.iter().all(|ss| ss.direction == Direction::Reverse));
    }
}
