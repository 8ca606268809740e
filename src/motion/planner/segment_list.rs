// src/motion/planner/segment_list.rs
//! Streaming planner pipeline with one segment of lookahead.

use std::collections::VecDeque;

use super::joint_segment::{Direction, JointSegment};
use super::segment::{Segment, SegmentState};
use super::solver::SolverConfig;
use super::sub_segment::SubSegment;
use super::SegmentError;
use crate::motion::joint::Joint;

/// Live segments held by the list: the newest one and the one before it.
pub const WINDOW_SIZE: usize = 2;

#[derive(Debug, Clone)]
pub struct SegmentList {
    joints: Vec<Joint>,
    solver: SolverConfig,
    /// Positions after the last movement addition
    positions: Vec<i64>,
    window: VecDeque<Segment>,
    /// Committed segments, oldest first
    history: Vec<Segment>,
    /// Committed sub-segments not yet drained
    pending: VecDeque<SubSegment>,
    next_seg_number: u64,
}

impl SegmentList {
    pub fn new(joints: &[Joint]) -> Result<Self, SegmentError> {
        Self::with_solver(joints, SolverConfig::default())
    }

    /// Build a list over its own copy of `joints`, re-indexed by position.
    pub fn with_solver(joints: &[Joint], solver: SolverConfig) -> Result<Self, SegmentError> {
        if joints.is_empty() {
            return Err(SegmentError::MalformedRequest("no joints configured".to_string()));
        }
        let joints = joints
            .iter()
            .enumerate()
            .map(|(i, j)| Joint::new(i, j.v_max, j.a_max, j.d_max))
            .collect::<Result<Vec<Joint>, SegmentError>>()?;

        Ok(Self {
            positions: vec![0; joints.len()],
            joints,
            solver,
            window: VecDeque::with_capacity(WINDOW_SIZE + 1),
            history: Vec::new(),
            pending: VecDeque::new(),
            next_seg_number: 0,
        })
    }

    /// Add a segment moving each axis by the given number of steps.
    pub fn add_distance_segment(&mut self, joint_distances: &[i64]) -> Result<&Segment, SegmentError> {
        self.add_segment(joint_distances, None)
    }

    /// Add a segment whose axes enter at `initial_velocities` (signed,
    /// steps/s). Only allowed while no segment is live.
    pub fn add_distance_segment_with_velocity(
        &mut self,
        joint_distances: &[i64],
        initial_velocities: &[f64],
    ) -> Result<&Segment, SegmentError> {
        self.add_segment(joint_distances, Some(initial_velocities))
    }

    fn add_segment(
        &mut self,
        joint_distances: &[i64],
        initial_velocities: Option<&[f64]>,
    ) -> Result<&Segment, SegmentError> {
        if joint_distances.len() != self.joints.len() {
            tracing::warn!(
                "rejected move with {} distances for {} axes",
                joint_distances.len(),
                self.joints.len()
            );
            return Err(SegmentError::MalformedRequest(format!(
                "expected {} distances, got {}",
                self.joints.len(),
                joint_distances.len()
            )));
        }

        let positions = self
            .positions
            .iter()
            .zip(joint_distances)
            .map(|(position, x)| position.checked_add(*x))
            .collect::<Option<Vec<i64>>>()
            .ok_or_else(|| {
                SegmentError::MalformedRequest(format!(
                    "move {:?} overflows positions {:?}",
                    joint_distances, self.positions
                ))
            })?;

        let v0 = match initial_velocities {
            Some(velocities) => self.check_initial_velocities(joint_distances, velocities)?,
            None => vec![0.0; self.joints.len()],
        };

        let seg_number = self.next_seg_number;
        let joint_segments: Vec<JointSegment> = self
            .joints
            .iter()
            .zip(joint_distances)
            .zip(&v0)
            .map(|((joint, &x), &v)| JointSegment::new(*joint, seg_number, x, v))
            .collect();

        let segment = match self.window.back() {
            Some(prior) => {
                let (finalized, segment) = Segment::following(prior, seg_number, joint_segments, &self.solver)
                    .inspect_err(|e| tracing::warn!("failed to plan segment {}: {}", seg_number, e))?;
                if let Some(slot) = self.window.back_mut() {
                    *slot = finalized;
                }
                segment
            }
            None => Segment::first(seg_number, joint_segments, &self.solver)
                .inspect_err(|e| tracing::warn!("failed to plan segment {}: {}", seg_number, e))?,
        };

        self.positions = positions;
        self.next_seg_number += 1;

        tracing::debug!("added segment {} {}", seg_number, segment);
        self.window.push_back(segment);

        // Move finished segments out to the sub-segment queue
        while self.window.len() > WINDOW_SIZE {
            if let Some(done) = self.window.pop_front() {
                self.commit(done);
            }
        }

        Ok(&self.window[self.window.len() - 1])
    }

    fn check_initial_velocities(&self, distances: &[i64], velocities: &[f64]) -> Result<Vec<f64>, SegmentError> {
        if !self.window.is_empty() {
            return Err(SegmentError::MalformedRequest(
                "initial velocities are only accepted for the first segment".to_string(),
            ));
        }
        if velocities.len() != self.joints.len() {
            return Err(SegmentError::MalformedRequest(format!(
                "expected {} initial velocities, got {}",
                self.joints.len(),
                velocities.len()
            )));
        }

        let mut magnitudes = Vec::with_capacity(velocities.len());
        for ((joint, &x), &v) in self.joints.iter().zip(distances).zip(velocities) {
            if !v.is_finite() || v.abs() > joint.v_max {
                return Err(SegmentError::MalformedRequest(format!(
                    "initial velocity {} on axis {} exceeds v_max {}",
                    v, joint.index, joint.v_max
                )));
            }
            if v != 0.0 && Direction::of(x).signum() != v.signum() {
                return Err(SegmentError::MalformedRequest(format!(
                    "initial velocity {} on axis {} disagrees with distance {}",
                    v, joint.index, x
                )));
            }
            // The axis must be able to stop within the move.
            if v * v / (2.0 * joint.d_max) > x.unsigned_abs() as f64 {
                return Err(SegmentError::MalformedRequest(format!(
                    "initial velocity {} on axis {} cannot stop within {} steps",
                    v, joint.index, x
                )));
            }
            magnitudes.push(v.abs());
        }
        Ok(magnitudes)
    }

    fn commit(&mut self, segment: Segment) {
        tracing::debug!("committed segment {}", segment.seg_number());
        self.pending.extend(segment.sub_segments());
        self.history.push(segment);
    }

    /// Commit every live segment. The newest one already ends at rest. The next
    /// segment added starts a new motion from rest.
    pub fn finish(&mut self) -> usize {
        let count = self.window.len();
        while let Some(mut segment) = self.window.pop_front() {
            if segment.state() == SegmentState::Provisional {
                segment.seal();
            }
            self.commit(segment);
        }
        count
    }

    /// Drain the committed sub-segments, oldest first.
    pub fn sub_segments(&mut self) -> impl Iterator<Item = SubSegment> + '_ {
        self.pending.drain(..)
    }

    /// Committed sub-segments not yet drained.
    pub fn pending_sub_segments(&self) -> usize {
        self.pending.len()
    }

    pub fn joints(&self) -> &[Joint] {
        &self.joints
    }

    pub fn solver(&self) -> &SolverConfig {
        &self.solver
    }

    /// Absolute position of every axis after the last accepted move.
    pub fn positions(&self) -> &[i64] {
        &self.positions
    }

    /// Live segments, oldest first.
    pub fn window(&self) -> impl Iterator<Item = &Segment> {
        self.window.iter()
    }

    /// Committed segments, oldest first.
    pub fn history(&self) -> &[Segment] {
        &self.history
    }

    pub fn committed_segments(&self) -> usize {
        self.history.len()
    }

    /// Every segment ever added and accepted, committed or live.
    pub fn all_segments(&self) -> impl Iterator<Item = &Segment> {
        self.history.iter().chain(self.window.iter())
    }

    /// Number of live segments.
    pub fn len(&self) -> usize {
        self.window.len()
    }

    pub fn is_empty(&self) -> bool {
        self.window.is_empty()
    }
}

impl std::fmt::Display for SegmentList {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for segment in &self.window {
            writeln!(f, "{}", segment)?;
        }
        Ok(())
    }
}
