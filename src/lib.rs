// src/lib.rs - Multi-axis stepper trajectory planning

pub mod communication;
pub mod config;
pub mod motion;

pub use config::{load_config, Config, ConfigError};
pub use motion::planner::{Segment, SegmentError, SegmentList, SubSegment};
