// src/communication/mod.rs - Serial protocol to the step controller

pub mod framing;
pub mod link;
pub mod messages;

pub use link::{open_serial, LinkError, MessageLink};
pub use messages::{CommandCode, CurrentState, MoveCommand, Packet, ProtoError};
