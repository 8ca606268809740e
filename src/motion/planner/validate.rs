// src/motion/planner/validate.rs
//! Invariant checks for resolved joint segments.
//!
//! The checks are pure functions over a [`Profile`] snapshot; whether a failed
//! check aborts or is collected is up to the caller's [`ValidationPolicy`].

use serde::Serialize;
use std::fmt;
use thiserror::Error;

/// Which invariant a check covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Check {
    AccelPeriods,
    Distance,
    VelocityLimits,
    VelocitySigns,
    DistanceSigns,
}

impl fmt::Display for Check {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Check::AccelPeriods => "accel periods",
            Check::Distance => "distance",
            Check::VelocityLimits => "velocity limits",
            Check::VelocitySigns => "velocity signs",
            Check::DistanceSigns => "distance signs",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
#[error("{check} check failed: {detail}")]
pub struct Violation {
    pub check: Check,
    pub detail: String,
}

impl Violation {
    fn new(check: Check, detail: String) -> Self {
        Self { check, detail }
    }
}

/// What to do when a check fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ValidationPolicy {
    /// Stop at the first violation.
    #[default]
    FailFast,
    /// Run every check and report all violations.
    Collect,
}

/// The numbers the checks look at, detached from any segment.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Profile {
    pub x: f64,
    pub v_0: f64,
    pub v_c: f64,
    pub v_1: f64,
    pub x_a: f64,
    pub x_c: f64,
    pub x_d: f64,
    pub x_err: f64,
    pub v_max: f64,
}

/// True when both values point the same way. Values that truncate to zero
/// count as unsigned.
pub fn same_sign(a: f64, b: f64) -> bool {
    a.trunc() == 0.0 || b.trunc() == 0.0 || a.signum() == b.signum()
}

pub fn check_accel_periods(p: &Profile) -> Result<(), Violation> {
    if (p.x_a + p.x_d).round() <= p.x {
        return Ok(());
    }
    Err(Violation::new(
        Check::AccelPeriods,
        format!("a/d periods longer than segment: {}+{} > {}", p.x_a, p.x_d, p.x),
    ))
}

pub fn check_distance(p: &Profile) -> Result<(), Violation> {
    let sum = p.x_a + p.x_c + p.x_d;
    if sum.round() == p.x.round() {
        return Ok(());
    }
    Err(Violation::new(
        Check::Distance,
        format!("{:.3} != {:.3} x_err={}", p.x, sum, p.x_err),
    ))
}

pub fn check_velocity_limits(p: &Profile) -> Result<(), Violation> {
    let limit = p.v_max.round();
    if p.v_0.abs().round() <= limit && p.v_c.abs().round() <= limit && p.v_1.abs().round() <= limit {
        return Ok(());
    }
    Err(Violation::new(
        Check::VelocityLimits,
        format!("{},{},{} v_max={}", p.v_0, p.v_c, p.v_1, p.v_max),
    ))
}

pub fn check_velocity_signs(p: &Profile) -> Result<(), Violation> {
    if same_sign(p.v_0, p.v_c) && same_sign(p.v_0, p.v_1) && same_sign(p.v_c, p.v_1) {
        return Ok(());
    }
    Err(Violation::new(
        Check::VelocitySigns,
        format!("{},{},{}", p.v_0, p.v_c, p.v_1),
    ))
}

pub fn check_distance_signs(p: &Profile) -> Result<(), Violation> {
    if same_sign(p.x_a, p.x_c) && same_sign(p.x_a, p.x_d) && same_sign(p.x_c, p.x_d) {
        return Ok(());
    }
    Err(Violation::new(
        Check::DistanceSigns,
        format!("{},{},{} x_err={}", p.x_a, p.x_c, p.x_d, p.x_err),
    ))
}

type CheckFn = fn(&Profile) -> Result<(), Violation>;

const CHECKS: [CheckFn; 5] = [
    check_accel_periods,
    check_velocity_limits,
    check_distance,
    check_velocity_signs,
    check_distance_signs,
];

/// Run every check under `policy`. `FailFast` returns the first violation as
/// the error; `Collect` returns all of them, possibly none.
pub fn run_checks(profile: &Profile, policy: ValidationPolicy) -> Result<Vec<Violation>, Violation> {
    let mut violations = Vec::new();
    for check in CHECKS {
        if let Err(violation) = check(profile) {
            match policy {
                ValidationPolicy::FailFast => return Err(violation),
                ValidationPolicy::Collect => violations.push(violation),
            }
        }
    }
    Ok(violations)
}
