// src/motion/planner/mod.rs
//! Trajectory segment planner.
//!
//! Each motion request becomes a [`Segment`]: a period in which every axis
//! starts and stops at the same time. A segment has three phases:
//!
//! - `a`: acceleration
//! - `c`: constant velocity (cruise)
//! - `d`: deceleration
//!
//! The names refer to an idealized trapezoid; in practice the `a` phase may
//! slow an axis down and the `d` phase may speed it up. The cruise phase always
//! has zero acceleration.
//!
//! The slowest axis of a segment, moving at its own limits, sets the shared
//! phase durations; every other axis solves for the cruise velocity that covers
//! its distance in that time. Boundary velocities between two segments are
//! matched one segment behind the newest request, so a segment is only emitted
//! as [`SubSegment`]s once its successor has fixed its exit velocities.

pub mod joint_segment;
pub mod segment;
pub mod segment_list;
pub mod solver;
pub mod sub_segment;
pub mod validate;


use thiserror::Error;

pub use joint_segment::{Direction, JointSegment, Neighbor, Shape};
pub use segment::{Segment, SegmentState};
pub use segment_list::{SegmentList, WINDOW_SIZE};
pub use solver::{SolveError, SolverConfig, Timing};
pub use sub_segment::{Phase, SubSegment};
pub use validate::{Check, Profile, ValidationPolicy, Violation};

/// Errors raised while planning segments.
#[derive(Debug, Error)]
pub enum SegmentError {
    #[error(
        "segment {segment} axis {axis}: cruise velocity failed to converge ({source}); \
         x={x} v_0={v_0:.2} v_1={v_1:.2} t_a={t_a:.6} t_c={t_c:.6} t_d={t_d:.6} v_max={v_max}"
    )]
    Convergence {
        segment: u64,
        axis: usize,
        x: f64,
        v_0: f64,
        v_1: f64,
        t_a: f64,
        t_c: f64,
        t_d: f64,
        v_max: f64,
        #[source]
        source: SolveError,
    },
    #[error("segment {segment} axis {axis}: constraint violated: {detail}")]
    Constraint {
        segment: u64,
        axis: usize,
        detail: String,
    },
    #[error("segment {segment} axis {axis}: {violation}")]
    Validation {
        segment: u64,
        axis: usize,
        #[source]
        violation: Violation,
    },
    #[error("malformed request: {0}")]
    MalformedRequest(String),
}
