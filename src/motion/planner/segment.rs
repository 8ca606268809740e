// src/motion/planner/segment.rs
//! One synchronized motion instant across all axes.

use serde::Serialize;
use std::fmt;

use super::joint_segment::{JointSegment, Neighbor};
use super::solver::{SolverConfig, Timing};
use super::sub_segment::SubSegment;
use super::validate::{ValidationPolicy, Violation};
use super::SegmentError;

/// A segment is resolved once as the newest ("last") segment and once more when
/// its successor arrives. After that it never changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SegmentState {
    /// Exit velocities are still forced to zero.
    Provisional,
    /// Exit velocities are matched to the successor.
    Final,
}

#[derive(Debug, Clone)]
pub struct Segment {
    seg_number: u64,
    timing: Timing,
    sign_change: bool,
    state: SegmentState,
    master: usize,
    joint_segments: Vec<JointSegment>,
}

impl Segment {
    /// The first segment of a motion, starting from the joint segments' entry
    /// velocities.
    pub fn first(
        seg_number: u64,
        joint_segments: Vec<JointSegment>,
        solver: &SolverConfig,
    ) -> Result<Self, SegmentError> {
        let mut segment = Self::provisional(seg_number, joint_segments, false)?;
        segment.limit_velocities(true);
        segment.solve(solver)?;
        Ok(segment)
    }

    /// A segment following `prior`. Returns the finalized copy of `prior`
    /// together with the new provisional segment; `prior` itself is not
    /// modified, so a failure leaves the caller's state intact.
    pub fn following(
        prior: &Segment,
        seg_number: u64,
        joint_segments: Vec<JointSegment>,
        solver: &SolverConfig,
    ) -> Result<(Segment, Segment), SegmentError> {
        if prior.joint_segments.len() != joint_segments.len() {
            return Err(SegmentError::MalformedRequest(format!(
                "segment {} has {} axes, prior segment has {}",
                seg_number,
                joint_segments.len(),
                prior.joint_segments.len()
            )));
        }

        let sign_change = prior
            .joint_segments
            .iter()
            .zip(&joint_segments)
            .any(|(p, n)| p.direction().is_reversal(n.direction()));

        let mut next = Self::provisional(seg_number, joint_segments, sign_change)?;
        next.limit_velocities(false);

        let finalized = prior.finalize(&mut next, solver)?;
        next.solve(solver)?;

        Ok((finalized, next))
    }

    /// Pick the timing master and take its minimum-time phases as the shared
    /// timing.
    fn provisional(
        seg_number: u64,
        mut joint_segments: Vec<JointSegment>,
        sign_change: bool,
    ) -> Result<Self, SegmentError> {
        if joint_segments.is_empty() {
            return Err(SegmentError::MalformedRequest(format!(
                "segment {} has no axes",
                seg_number
            )));
        }

        for js in joint_segments.iter_mut() {
            js.update_t_min();
        }

        // Slowest axis wins, the lowest index on ties.
        let mut master = 0;
        for (i, js) in joint_segments.iter().enumerate() {
            if js.t_min() > joint_segments[master].t_min() {
                master = i;
            }
        }
        let mut timing = joint_segments[master].min_timing();

        // Stretch the cruise so every axis can cover its distance below v_max.
        for js in &joint_segments {
            let t_c = js.required_t_c(&timing);
            if t_c > timing.t_c {
                tracing::debug!(
                    "segment {} axis {} stretches cruise {:.6} -> {:.6}",
                    seg_number,
                    js.joint().index,
                    timing.t_c,
                    t_c
                );
                timing.t_c = t_c;
            }
        }

        for js in joint_segments.iter_mut() {
            js.update_sub_segments(&timing);
        }

        Ok(Self {
            seg_number,
            timing,
            sign_change,
            state: SegmentState::Provisional,
            master,
            joint_segments,
        })
    }

    /// Velocity ceilings for the newest segment: nothing follows it yet.
    fn limit_velocities(&mut self, is_first: bool) {
        let timing = self.timing;
        let sign_change = self.sign_change;
        for js in self.joint_segments.iter_mut() {
            js.update_end_velocity_limit(true, &timing);
            js.update_start_velocity_limit(is_first, sign_change, &timing);
        }
    }

    fn solve(&mut self, solver: &SolverConfig) -> Result<(), SegmentError> {
        let timing = self.timing;
        for js in self.joint_segments.iter_mut() {
            js.update_v_c(&timing, solver)?;
        }
        Ok(())
    }

    /// Resolve this segment as second to last: unlock its exit velocities,
    /// share the boundary velocities with `next` and re-solve every axis.
    pub fn finalize(&self, next: &mut Segment, solver: &SolverConfig) -> Result<Segment, SegmentError> {
        if self.state == SegmentState::Final {
            return Err(SegmentError::MalformedRequest(format!(
                "segment {} is already final",
                self.seg_number
            )));
        }

        let mut prior = self.clone();
        let timing = prior.timing;

        for js in prior.joint_segments.iter_mut() {
            js.update_sub_segments(&timing);
            js.update_end_velocity_limit(false, &timing);
        }

        for (prior_js, next_js) in prior.joint_segments.iter_mut().zip(next.joint_segments.iter_mut()) {
            prior_js.update_boundary_velocity(Neighbor::Next(&*next_js));
            next_js.update_boundary_velocity(Neighbor::Prior(&*prior_js));
        }

        prior.solve(solver)?;
        prior.state = SegmentState::Final;
        Ok(prior)
    }

    /// Mark a last segment as final; its exit velocities are already zero.
    pub(crate) fn seal(&mut self) {
        self.state = SegmentState::Final;
    }

    pub fn seg_number(&self) -> u64 {
        self.seg_number
    }

    pub fn timing(&self) -> Timing {
        self.timing
    }

    pub fn t_a(&self) -> f64 {
        self.timing.t_a
    }

    pub fn t_c(&self) -> f64 {
        self.timing.t_c
    }

    pub fn t_d(&self) -> f64 {
        self.timing.t_d
    }

    /// Total run time of the segment.
    pub fn t(&self) -> f64 {
        self.timing.total()
    }

    pub fn sign_change(&self) -> bool {
        self.sign_change
    }

    pub fn state(&self) -> SegmentState {
        self.state
    }

    /// Index of the axis whose own timing the segment adopted.
    pub fn master_axis(&self) -> usize {
        self.master
    }

    pub fn joint_segments(&self) -> &[JointSegment] {
        &self.joint_segments
    }

    /// Check every joint segment. Violations carry this segment's number and
    /// the axis.
    pub fn validate(&self, policy: ValidationPolicy) -> Result<Vec<SegmentError>, SegmentError> {
        let mut collected = Vec::new();
        for js in &self.joint_segments {
            let wrap = |violation: Violation| SegmentError::Validation {
                segment: self.seg_number,
                axis: js.joint().index,
                violation,
            };
            match js.validate(policy) {
                Ok(violations) => collected.extend(violations.into_iter().map(wrap)),
                Err(violation) => {
                    tracing::error!("error in segment {} joint {}: {}", self.seg_number, js.joint().index, self);
                    return Err(wrap(violation));
                }
            }
        }
        Ok(collected)
    }

    /// All sub-segments, grouped by phase and then by axis.
    pub fn sub_segments(&self) -> Vec<SubSegment> {
        let per_joint: Vec<Vec<SubSegment>> = self
            .joint_segments
            .iter()
            .map(|js| js.sub_segments(&self.timing))
            .collect();
        let phases = per_joint.iter().map(Vec::len).min().unwrap_or(0);

        let mut out = Vec::with_capacity(phases * per_joint.len());
        for i in 0..phases {
            for subs in &per_joint {
                out.push(subs[i].clone());
            }
        }
        out
    }
}

impl fmt::Display for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "|{:1.4} {:1.4} {:1.4}|", self.timing.t_a, self.timing.t_c, self.timing.t_d)?;
        for js in &self.joint_segments {
            write!(f, " {}", js)?;
        }
        Ok(())
    }
}
