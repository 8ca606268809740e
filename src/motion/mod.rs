// src/motion/mod.rs - Joint limits, move scripts and the segment planner

pub mod joint;
pub mod planner;
pub mod script;

pub use joint::Joint;
pub use planner::{SegmentError, SegmentList, SubSegment};
pub use script::{parse_moves, ScriptError};
