//! Packet and payload layouts understood by the step controller firmware.
//!
//! All multi-byte fields are little endian. A packet is a 4 byte header
//! (`u16` sequence number, `u8` command code, `u8` CRC-8) followed by an
//! optional payload; the CRC covers the header, with the CRC byte zeroed, and
//! the payload.

use byteorder::{ByteOrder, LittleEndian};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use super::framing::{self, FrameError};
use crate::config::{AxisConfig, SerialConfig};

/// Number of axes the firmware tracks
pub const MAX_AXES: usize = 6;
/// Firmware time unit per second (microseconds)
pub const TIMEBASE: f64 = 1e6;

pub const HEADER_SIZE: usize = 4;

#[derive(Debug, Error)]
pub enum ProtoError {
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),
    #[error("CRC check failed: {received:#04x} != {computed:#04x}")]
    Crc { received: u8, computed: u8 },
    #[error("packet too short: {0} bytes")]
    ShortPacket(usize),
    #[error("unknown command code {0}")]
    UnknownCode(u8),
    #[error("{0} is not a move command")]
    BadMoveCode(CommandCode),
    #[error("{found} axes in move, at most {max} supported")]
    TooManyAxes { found: usize, max: usize },
    #[error("step count {0} does not fit the wire format")]
    StepOverflow(i64),
    #[error("{what} must be {expected} bytes, got {found}")]
    PayloadSize {
        what: &'static str,
        expected: usize,
        found: usize,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[repr(u8)]
pub enum CommandCode {
    Ack = 1,
    Nack = 2,
    /// A movement command finished
    Done = 3,
    /// Queue is empty
    Empty = 4,

    /// Relative move
    Rmove = 11,
    /// Absolute move
    Amove = 12,
    /// Jog: replaces the last queued move
    Jmove = 13,
    /// Homing move, stops at a limit
    Hmove = 14,
    /// Velocity move
    Vmove = 15,

    Run = 21,
    Stop = 22,
    Reset = 23,
    Zero = 24,
    Set = 25,

    Config = 31,
    Axes = 32,

    Message = 91,
    Error = 92,
    Echo = 93,
    Debug = 94,
    Info = 95,
    Queue = 96,
    Alive = 98,
    Noop = 99,
}

impl CommandCode {
    pub fn is_move(&self) -> bool {
        matches!(
            self,
            CommandCode::Rmove | CommandCode::Amove | CommandCode::Jmove | CommandCode::Hmove | CommandCode::Vmove
        )
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandCode::Ack => "ACK",
            CommandCode::Nack => "NACK",
            CommandCode::Done => "DONE",
            CommandCode::Empty => "EMPTY",
            CommandCode::Rmove => "RMOVE",
            CommandCode::Amove => "AMOVE",
            CommandCode::Jmove => "JMOVE",
            CommandCode::Hmove => "HMOVE",
            CommandCode::Vmove => "VMOVE",
            CommandCode::Run => "RUN",
            CommandCode::Stop => "STOP",
            CommandCode::Reset => "RESET",
            CommandCode::Zero => "ZERO",
            CommandCode::Set => "SET",
            CommandCode::Config => "CONFIG",
            CommandCode::Axes => "AXES",
            CommandCode::Message => "MESSAGE",
            CommandCode::Error => "ERROR",
            CommandCode::Echo => "ECHO",
            CommandCode::Debug => "DEBUG",
            CommandCode::Info => "INFO",
            CommandCode::Queue => "QUEUE",
            CommandCode::Alive => "ALIVE",
            CommandCode::Noop => "NOOP",
        }
    }
}

impl TryFrom<u8> for CommandCode {
    type Error = ProtoError;

    fn try_from(value: u8) -> Result<Self, ProtoError> {
        let code = match value {
            1 => CommandCode::Ack,
            2 => CommandCode::Nack,
            3 => CommandCode::Done,
            4 => CommandCode::Empty,
            11 => CommandCode::Rmove,
            12 => CommandCode::Amove,
            13 => CommandCode::Jmove,
            14 => CommandCode::Hmove,
            15 => CommandCode::Vmove,
            21 => CommandCode::Run,
            22 => CommandCode::Stop,
            23 => CommandCode::Reset,
            24 => CommandCode::Zero,
            25 => CommandCode::Set,
            31 => CommandCode::Config,
            32 => CommandCode::Axes,
            91 => CommandCode::Message,
            92 => CommandCode::Error,
            93 => CommandCode::Echo,
            94 => CommandCode::Debug,
            95 => CommandCode::Info,
            96 => CommandCode::Queue,
            98 => CommandCode::Alive,
            99 => CommandCode::Noop,
            other => return Err(ProtoError::UnknownCode(other)),
        };
        Ok(code)
    }
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Electrical mode of a step, direction or enable output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputMode {
    #[default]
    Output,
    OpenDrain,
}

impl OutputMode {
    pub fn as_u8(&self) -> u8 {
        match self {
            OutputMode::Output => 1,
            OutputMode::OpenDrain => 4,
        }
    }
}

/// A header plus payload, before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub seq: u16,
    pub code: CommandCode,
    pub payload: Vec<u8>,
}

impl Packet {
    /// New packet with sequence number 0; the link assigns the real one.
    pub fn new(code: CommandCode, payload: Vec<u8>) -> Self {
        Self { seq: 0, code, payload }
    }

    pub fn command(code: CommandCode) -> Self {
        Self::new(code, Vec::new())
    }

    fn body(&self, crc: u8) -> Vec<u8> {
        let mut body = vec![0u8; HEADER_SIZE + self.payload.len()];
        LittleEndian::write_u16(&mut body[0..2], self.seq);
        body[2] = self.code as u8;
        body[3] = crc;
        body[HEADER_SIZE..].copy_from_slice(&self.payload);
        body
    }

    /// Complete wire frame, terminator included.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = self.body(0);
        body[3] = framing::crc8(&body);
        framing::encode_frame(&body)
    }

    /// Decode one frame, terminator already stripped.
    pub fn decode(frame: &[u8]) -> Result<Self, ProtoError> {
        let mut body = framing::cobs_decode(frame)?;
        if body.len() < HEADER_SIZE {
            return Err(ProtoError::ShortPacket(body.len()));
        }

        let received = body[3];
        body[3] = 0;
        let computed = framing::crc8(&body);
        if received != computed {
            return Err(ProtoError::Crc { received, computed });
        }

        Ok(Self {
            seq: LittleEndian::read_u16(&body[0..2]),
            code: CommandCode::try_from(body[2])?,
            payload: body.split_off(HEADER_SIZE),
        })
    }

    /// Payload as text, for MESSAGE, ERROR and DEBUG packets.
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.payload).trim().to_string()
    }
}

impl fmt::Display for Packet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<#{} {} {}B>", self.seq, self.code, self.payload.len())
    }
}

/// A movement command: a duration and a step count per axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveCommand {
    pub code: CommandCode,
    /// Segment time in firmware time units; 0 lets the firmware plan it
    pub t: u32,
    pub steps: [i32; MAX_AXES],
}

impl MoveCommand {
    pub const SIZE: usize = 4 + 4 * MAX_AXES;

    /// Build a move from per-axis steps and a duration in seconds. Missing
    /// axes are zero.
    pub fn new(code: CommandCode, steps: &[i64], t: f64) -> Result<Self, ProtoError> {
        if !code.is_move() {
            return Err(ProtoError::BadMoveCode(code));
        }
        if steps.len() > MAX_AXES {
            return Err(ProtoError::TooManyAxes { found: steps.len(), max: MAX_AXES });
        }
        let mut packed = [0i32; MAX_AXES];
        for (slot, &x) in packed.iter_mut().zip(steps) {
            *slot = i32::try_from(x).map_err(|_| ProtoError::StepOverflow(x))?;
        }
        Ok(Self {
            code,
            t: (t * TIMEBASE).round().clamp(0.0, u32::MAX as f64) as u32,
            steps: packed,
        })
    }

    pub fn relative(steps: &[i64]) -> Result<Self, ProtoError> {
        Self::new(CommandCode::Rmove, steps, 0.0)
    }

    pub fn packet(&self) -> Packet {
        let mut payload = vec![0u8; Self::SIZE];
        LittleEndian::write_u32(&mut payload[0..4], self.t);
        LittleEndian::write_i32_into(&self.steps, &mut payload[4..]);
        Packet::new(self.code, payload)
    }

    pub fn decode(packet: &Packet) -> Result<Self, ProtoError> {
        if !packet.code.is_move() {
            return Err(ProtoError::BadMoveCode(packet.code));
        }
        check_size("move payload", Self::SIZE, packet.payload.len())?;
        let mut steps = [0i32; MAX_AXES];
        LittleEndian::read_i32_into(&packet.payload[4..], &mut steps);
        Ok(Self {
            code: packet.code,
            t: LittleEndian::read_u32(&packet.payload[0..4]),
            steps,
        })
    }
}

/// Pin assignment and limits for one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AxisConfigCommand {
    pub axis: u8,
    pub step_pin: u8,
    pub dir_pin: u8,
    pub enable_pin: u8,
    /// Asserted level for step, direction and enable
    pub high_value: [u8; 3],
    pub output_mode: [u8; 3],
    pub v_max: u32,
    pub a_max: u32,
}

impl AxisConfigCommand {
    pub const SIZE: usize = 20;

    pub fn from_config(axis: u8, config: &AxisConfig) -> Self {
        let high = u8::from(config.high_value);
        let mode = config.output_mode.as_u8();
        Self {
            axis,
            step_pin: config.step_pin,
            dir_pin: config.dir_pin,
            enable_pin: config.enable_pin,
            high_value: [high; 3],
            output_mode: [mode; 3],
            v_max: config.v_max.round().clamp(0.0, u32::MAX as f64) as u32,
            a_max: config.a_max.round().clamp(0.0, u32::MAX as f64) as u32,
        }
    }

    pub fn packet(&self) -> Packet {
        let mut payload = vec![0u8; Self::SIZE];
        payload[0] = self.axis;
        payload[1] = self.step_pin;
        payload[2] = self.dir_pin;
        payload[3] = self.enable_pin;
        payload[4..7].copy_from_slice(&self.high_value);
        payload[7..10].copy_from_slice(&self.output_mode);
        // 10..12 is padding
        LittleEndian::write_u32(&mut payload[12..16], self.v_max);
        LittleEndian::write_u32(&mut payload[16..20], self.a_max);
        Packet::new(CommandCode::Axes, payload)
    }
}

/// Controller-wide settings; resets the firmware's axis table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigCommand {
    pub n_axes: u8,
    pub interrupt_delay: u8,
    pub segment_complete_pin: u8,
    pub limit_hit_pin: u8,
    pub yellow_led_pin: u8,
    pub blue_led_pin: u8,
    pub running_led_pin: u8,
    pub empty_led_pin: u8,
    pub builtin_led_pin: u8,
    pub debug_print: bool,
    pub debug_tick: bool,
}

impl ConfigCommand {
    pub const SIZE: usize = 11;

    pub fn from_config(n_axes: u8, config: &SerialConfig) -> Self {
        Self {
            n_axes,
            interrupt_delay: config.interrupt_delay,
            segment_complete_pin: config.segment_complete_pin,
            limit_hit_pin: config.limit_hit_pin,
            yellow_led_pin: 26,
            blue_led_pin: 31,
            running_led_pin: 28,
            empty_led_pin: 30,
            builtin_led_pin: 13,
            debug_print: config.debug_print,
            debug_tick: config.debug_tick,
        }
    }

    pub fn packet(&self) -> Packet {
        let payload = vec![
            self.n_axes,
            self.interrupt_delay,
            self.segment_complete_pin,
            self.limit_hit_pin,
            self.yellow_led_pin,
            self.blue_led_pin,
            self.running_led_pin,
            self.empty_led_pin,
            self.builtin_led_pin,
            u8::from(self.debug_print),
            u8::from(self.debug_tick),
        ];
        Packet::new(CommandCode::Config, payload)
    }
}

/// Controller state carried by ACK, DONE, EMPTY, ZERO and ALIVE packets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CurrentState {
    pub queue_length: i32,
    /// Queued motion time, in firmware time units
    pub queue_time: u32,
    pub positions: [i32; MAX_AXES],
    pub planner_positions: [i32; MAX_AXES],
    pub flags: u32,
}

impl CurrentState {
    pub const SIZE: usize = 4 + 4 + 4 * MAX_AXES * 2 + 4;

    pub fn decode(payload: &[u8]) -> Result<Self, ProtoError> {
        check_size("state payload", Self::SIZE, payload.len())?;
        let mut state = Self {
            queue_length: LittleEndian::read_i32(&payload[0..4]),
            queue_time: LittleEndian::read_u32(&payload[4..8]),
            flags: LittleEndian::read_u32(&payload[Self::SIZE - 4..]),
            ..Self::default()
        };
        let positions_end = 8 + 4 * MAX_AXES;
        LittleEndian::read_i32_into(&payload[8..positions_end], &mut state.positions);
        LittleEndian::read_i32_into(&payload[positions_end..Self::SIZE - 4], &mut state.planner_positions);
        Ok(state)
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut payload = vec![0u8; Self::SIZE];
        let positions_end = 8 + 4 * MAX_AXES;
        LittleEndian::write_i32(&mut payload[0..4], self.queue_length);
        LittleEndian::write_u32(&mut payload[4..8], self.queue_time);
        LittleEndian::write_i32_into(&self.positions, &mut payload[8..positions_end]);
        LittleEndian::write_i32_into(&self.planner_positions, &mut payload[positions_end..Self::SIZE - 4]);
        LittleEndian::write_u32(&mut payload[Self::SIZE - 4..], self.flags);
        payload
    }

    pub fn running(&self) -> bool {
        self.flags & 1 != 0
    }

    pub fn empty(&self) -> bool {
        self.flags & 2 != 0
    }
}

impl fmt::Display for CurrentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[l{} t{:.4} {:?} E={} R={}]",
            self.queue_length,
            self.queue_time as f64 / TIMEBASE,
            self.positions,
            self.empty(),
            self.running()
        )
    }
}

fn check_size(what: &'static str, expected: usize, found: usize) -> Result<(), ProtoError> {
    if expected != found {
        return Err(ProtoError::PayloadSize { what, expected, found });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strip(frame: &[u8]) -> &[u8] {
        assert_eq!(frame.last(), Some(&framing::TERMINATOR));
        &frame[..frame.len() - 1]
    }

    #[test]
    fn test_header_layout() {
        let mut packet = Packet::command(CommandCode::Noop);
        packet.seq = 0x0102;
        let frame = packet.encode();
        let body = framing::cobs_decode(strip(&frame)).unwrap();
        assert_eq!(&body[..3], &[0x02, 0x01, 99]);

        let mut zeroed = body.clone();
        zeroed[3] = 0;
        assert_eq!(body[3], framing::crc8(&zeroed));
    }

    #[test]
    fn test_decode_checks_crc() {
        let mut packet = Packet::new(CommandCode::Message, b"hello".to_vec());
        packet.seq = 7;
        let frame = packet.encode();
        assert_eq!(Packet::decode(strip(&frame)).unwrap(), packet);

        let mut body = framing::cobs_decode(strip(&frame)).unwrap();
        body[5] ^= 0x20;
        let corrupted = framing::cobs_encode(&body);
        assert!(matches!(Packet::decode(&corrupted), Err(ProtoError::Crc { .. })));
    }

    #[test]
    fn test_decode_rejects_short_and_unknown() {
        let short = framing::cobs_encode(&[1, 0, 1]);
        assert!(matches!(Packet::decode(&short), Err(ProtoError::ShortPacket(3))));

        let mut body = vec![1, 0, 77, 0];
        body[3] = framing::crc8(&body);
        let unknown = framing::cobs_encode(&body);
        assert!(matches!(Packet::decode(&unknown), Err(ProtoError::UnknownCode(77))));
    }

    #[test]
    fn test_move_command_layout() {
        let m = MoveCommand::new(CommandCode::Vmove, &[100, -100, 3], 0.25).unwrap();
        assert_eq!(m.t, 250_000);
        assert_eq!(m.steps, [100, -100, 3, 0, 0, 0]);

        let packet = m.packet();
        assert_eq!(packet.payload.len(), 28);
        assert_eq!(&packet.payload[0..4], &250_000u32.to_le_bytes());
        assert_eq!(&packet.payload[8..12], &(-100i32).to_le_bytes());
        assert_eq!(MoveCommand::decode(&packet).unwrap(), m);
    }

    #[test]
    fn test_move_command_rejects() {
        assert!(matches!(
            MoveCommand::new(CommandCode::Run, &[1], 0.0),
            Err(ProtoError::BadMoveCode(CommandCode::Run))
        ));
        assert!(matches!(
            MoveCommand::relative(&[1, 2, 3, 4, 5, 6, 7]),
            Err(ProtoError::TooManyAxes { found: 7, .. })
        ));
        assert!(matches!(
            MoveCommand::relative(&[i64::from(i32::MAX) + 1]),
            Err(ProtoError::StepOverflow(_))
        ));
    }

    #[test]
    fn test_axis_config_layout() {
        let axis: AxisConfig = toml::from_str(
            "v_max = 3000.4\na_max = 12000.0\nstep_pin = 2\ndir_pin = 3\nenable_pin = 4\noutput_mode = \"open_drain\"",
        )
        .unwrap();
        let packet = AxisConfigCommand::from_config(1, &axis).packet();
        assert_eq!(packet.code, CommandCode::Axes);
        assert_eq!(&packet.payload[..12], &[1, 2, 3, 4, 1, 1, 1, 4, 4, 4, 0, 0]);
        assert_eq!(&packet.payload[12..16], &3000u32.to_le_bytes());
        assert_eq!(&packet.payload[16..20], &12000u32.to_le_bytes());
    }

    #[test]
    fn test_config_command_layout() {
        let serial = SerialConfig {
            segment_complete_pin: 27,
            limit_hit_pin: 29,
            debug_tick: true,
            ..SerialConfig::default()
        };
        let packet = ConfigCommand::from_config(3, &serial).packet();
        assert_eq!(packet.payload, vec![3, 4, 27, 29, 26, 31, 28, 30, 13, 0, 1]);
    }

    #[test]
    fn test_current_state_decode() {
        let state = CurrentState {
            queue_length: 3,
            queue_time: 1_500_000,
            positions: [1, -2, 3, 0, 0, 0],
            planner_positions: [10, 20, 30, 0, 0, 0],
            flags: 0b11,
        };
        let payload = state.encode();
        assert_eq!(payload.len(), CurrentState::SIZE);
        assert_eq!(&payload[8..12], &1i32.to_le_bytes());

        let decoded = CurrentState::decode(&payload).unwrap();
        assert_eq!(decoded, state);
        assert!(decoded.running());
        assert!(decoded.empty());
        assert!(matches!(
            CurrentState::decode(&payload[1..]),
            Err(ProtoError::PayloadSize { expected: 60, found: 59, .. })
        ));
    }
}
