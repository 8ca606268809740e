//! Acknowledged command link to the step controller.
//!
//! Each packet sent gets the next sequence number; `send` then reads incoming
//! frames until the controller ACKs (or NACKs) that number. Messages that
//! arrive in between are logged and controller state reports are recorded.

use serial2_tokio::SerialPort;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use super::framing::FrameBuffer;
use super::messages::{
    AxisConfigCommand, CommandCode, ConfigCommand, CurrentState, MoveCommand, Packet, ProtoError,
};
use crate::config::{Config, SerialConfig};

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("serial IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("protocol error: {0}")]
    Proto(#[from] ProtoError),
    #[error("controller rejected {code} #{seq}")]
    Nack { seq: u16, code: CommandCode },
    #[error("no ACK for {code} #{seq} within {timeout_ms} ms")]
    Timeout { seq: u16, code: CommandCode, timeout_ms: u128 },
    #[error("link closed by controller")]
    Closed,
}

/// True when `seq` is `target` or was issued after it, allowing for wrap.
fn seq_reached(seq: u16, target: u16) -> bool {
    seq.wrapping_sub(target) < 0x8000
}

pub struct MessageLink<S> {
    stream: S,
    frames: FrameBuffer,
    seq: u16,
    ack_timeout: Duration,
    state: Option<CurrentState>,
    last_done: Option<u16>,
}

impl<S> MessageLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S, ack_timeout: Duration) -> Self {
        Self {
            stream,
            frames: FrameBuffer::new(),
            seq: 0,
            ack_timeout,
            state: None,
            last_done: None,
        }
    }

    /// Latest state reported by the controller.
    pub fn current_state(&self) -> Option<&CurrentState> {
        self.state.as_ref()
    }

    /// Sequence number of the last DONE report.
    pub fn last_done(&self) -> Option<u16> {
        self.last_done
    }

    /// Sequence number of the last packet sent.
    pub fn seq(&self) -> u16 {
        self.seq
    }

    pub fn into_inner(self) -> S {
        self.stream
    }

    /// Send `packet` under the next sequence number and wait for its ACK.
    pub async fn send(&mut self, mut packet: Packet) -> Result<Packet, LinkError> {
        self.seq = self.seq.wrapping_add(1);
        packet.seq = self.seq;

        tracing::debug!("sending {}", packet);
        self.stream.write_all(&packet.encode()).await?;
        self.stream.flush().await?;

        match timeout(self.ack_timeout, self.wait_for_ack(packet.seq, packet.code)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::warn!("no ACK for {} #{}", packet.code, packet.seq);
                Err(LinkError::Timeout {
                    seq: packet.seq,
                    code: packet.code,
                    timeout_ms: self.ack_timeout.as_millis(),
                })
            }
        }
    }

    pub async fn send_command(&mut self, code: CommandCode) -> Result<Packet, LinkError> {
        self.send(Packet::command(code)).await
    }

    async fn wait_for_ack(&mut self, seq: u16, code: CommandCode) -> Result<Packet, LinkError> {
        loop {
            let packet = self.read_packet().await?;
            self.handle(&packet);
            match packet.code {
                CommandCode::Ack if seq_reached(packet.seq, seq) => return Ok(packet),
                CommandCode::Nack if packet.seq == seq => return Err(LinkError::Nack { seq, code }),
                _ => {}
            }
        }
    }

    /// Next well-formed packet. Corrupt frames are logged and dropped.
    async fn read_packet(&mut self) -> Result<Packet, LinkError> {
        let mut buf = [0u8; 256];
        loop {
            while let Some(frame) = self.frames.next_frame() {
                match Packet::decode(&frame) {
                    Ok(packet) => return Ok(packet),
                    Err(e) => tracing::warn!("dropping bad frame ({} bytes): {}", frame.len(), e),
                }
            }
            let n = self.stream.read(&mut buf).await?;
            if n == 0 {
                return Err(LinkError::Closed);
            }
            self.frames.extend(&buf[..n]);
        }
    }

    fn handle(&mut self, packet: &Packet) {
        match packet.code {
            CommandCode::Message | CommandCode::Echo | CommandCode::Info => {
                tracing::info!("controller: {}", packet.text())
            }
            CommandCode::Error => tracing::error!("controller: {}", packet.text()),
            CommandCode::Debug => tracing::debug!("controller: {}", packet.text()),
            CommandCode::Ack | CommandCode::Done | CommandCode::Empty | CommandCode::Zero | CommandCode::Alive => {
                if !packet.payload.is_empty() {
                    match CurrentState::decode(&packet.payload) {
                        Ok(state) => {
                            tracing::trace!("state {}", state);
                            self.state = Some(state);
                        }
                        Err(e) => tracing::warn!("bad state in {}: {}", packet, e),
                    }
                }
                if packet.code == CommandCode::Done {
                    self.last_done = Some(packet.seq);
                }
            }
            CommandCode::Nack => tracing::warn!("NACK #{}", packet.seq),
            _ => tracing::debug!("ignoring {}", packet),
        }
    }

    /// Reset the controller's axis table, then configure every axis.
    pub async fn configure(&mut self, config: &Config) -> Result<(), LinkError> {
        let n_axes = u8::try_from(config.axes.len()).unwrap_or(u8::MAX);
        self.send(ConfigCommand::from_config(n_axes, &config.serial).packet())
            .await?;
        for (i, axis) in config.axes.iter().enumerate() {
            let axis_num = u8::try_from(i).unwrap_or(u8::MAX);
            self.send(AxisConfigCommand::from_config(axis_num, axis).packet())
                .await?;
        }
        tracing::info!("configured {} axes", config.axes.len());
        Ok(())
    }

    pub async fn send_move(&mut self, command: &MoveCommand) -> Result<Packet, LinkError> {
        self.send(command.packet()).await
    }

    /// Relative move; the controller plans the motion.
    pub async fn rmove(&mut self, steps: &[i64]) -> Result<Packet, LinkError> {
        self.send_move(&MoveCommand::relative(steps)?).await
    }

    /// Timed jog; replaces the last move queued on the controller.
    pub async fn jog(&mut self, t: f64, steps: &[i64]) -> Result<Packet, LinkError> {
        self.send_move(&MoveCommand::new(CommandCode::Jmove, steps, t)?).await
    }

    pub async fn run(&mut self) -> Result<Packet, LinkError> {
        self.send_command(CommandCode::Run).await
    }

    pub async fn stop(&mut self) -> Result<Packet, LinkError> {
        self.send_command(CommandCode::Stop).await
    }

    pub async fn info(&mut self) -> Result<Packet, LinkError> {
        self.send_command(CommandCode::Info).await
    }

    pub async fn reset(&mut self) -> Result<Packet, LinkError> {
        self.state = None;
        self.send_command(CommandCode::Reset).await
    }

    pub async fn zero(&mut self) -> Result<Packet, LinkError> {
        self.send_command(CommandCode::Zero).await
    }

    pub async fn echo(&mut self, text: &str) -> Result<Packet, LinkError> {
        self.send(Packet::new(CommandCode::Echo, text.as_bytes().to_vec())).await
    }
}

/// Open the controller's serial port.
pub fn open_serial(config: &SerialConfig) -> Result<MessageLink<SerialPort>, LinkError> {
    let port = SerialPort::open(&config.port, config.baud).inspect_err(|e| {
        tracing::error!("Failed to open serial port '{}': {}", config.port, e);
    })?;
    tracing::info!("opened {} at {} baud", config.port, config.baud);
    Ok(MessageLink::new(port, Duration::from_millis(config.timeout_ms)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, DuplexStream};

    /// Reads packets from `io` and writes back the frames `reply` returns.
    async fn controller<F>(mut io: DuplexStream, reply: F) -> Vec<Packet>
    where
        F: Fn(&Packet) -> Vec<Vec<u8>>,
    {
        let mut frames = FrameBuffer::new();
        let mut received = Vec::new();
        let mut buf = [0u8; 64];
        loop {
            let n = match io.read(&mut buf).await {
                Ok(0) | Err(_) => return received,
                Ok(n) => n,
            };
            frames.extend(&buf[..n]);
            while let Some(frame) = frames.next_frame() {
                let packet = Packet::decode(&frame).unwrap();
                for answer in reply(&packet) {
                    if io.write_all(&answer).await.is_err() {
                        return received;
                    }
                }
                received.push(packet);
            }
        }
    }

    fn ack(packet: &Packet, payload: Vec<u8>) -> Vec<u8> {
        Packet { seq: packet.seq, code: CommandCode::Ack, payload }.encode()
    }

    #[test]
    fn test_seq_reached_wraps() {
        assert!(seq_reached(5, 5));
        assert!(seq_reached(6, 5));
        assert!(!seq_reached(4, 5));
        assert!(seq_reached(1, u16::MAX));
        assert!(!seq_reached(u16::MAX, 1));
    }

    #[tokio::test]
    async fn test_send_waits_for_ack() {
        let (host, device) = duplex(1024);
        let device = tokio::spawn(controller(device, |p| {
            let note = Packet::new(CommandCode::Message, b"hello".to_vec()).encode();
            let state = CurrentState { queue_length: 1, flags: 1, ..CurrentState::default() };
            vec![note, ack(p, state.encode())]
        }));

        let mut link = MessageLink::new(host, Duration::from_millis(500));
        let reply = link.rmove(&[100, -200]).await.unwrap();
        assert_eq!(reply.seq, 1);
        assert_eq!(link.current_state().unwrap().queue_length, 1);
        assert!(link.current_state().unwrap().running());

        link.run().await.unwrap();
        assert_eq!(link.seq(), 2);

        drop(link);
        let received = device.await.unwrap();
        assert_eq!(received.len(), 2);
        let m = MoveCommand::decode(&received[0]).unwrap();
        assert_eq!(m.code, CommandCode::Rmove);
        assert_eq!(m.steps[..2], [100, -200]);
        assert_eq!(received[1].code, CommandCode::Run);
        assert_eq!(received[1].seq, 2);
    }

    #[tokio::test]
    async fn test_configure_sends_axes() {
        let config: Config = toml::from_str(
            "[[axis]]\nv_max = 1000.0\na_max = 500.0\n[[axis]]\nv_max = 1000.0\na_max = 500.0\n",
        )
        .unwrap();
        let (host, device) = duplex(1024);
        let device = tokio::spawn(controller(device, |p| vec![ack(p, Vec::new())]));

        let mut link = MessageLink::new(host, Duration::from_millis(500));
        link.configure(&config).await.unwrap();
        drop(link);

        let codes: Vec<CommandCode> = device.await.unwrap().iter().map(|p| p.code).collect();
        assert_eq!(codes, vec![CommandCode::Config, CommandCode::Axes, CommandCode::Axes]);
    }

    #[tokio::test]
    async fn test_nack_is_an_error() {
        let (host, device) = duplex(1024);
        tokio::spawn(controller(device, |p| {
            vec![Packet { seq: p.seq, code: CommandCode::Nack, payload: Vec::new() }.encode()]
        }));

        let mut link = MessageLink::new(host, Duration::from_millis(500));
        let err = link.send_command(CommandCode::Set).await.unwrap_err();
        assert!(matches!(err, LinkError::Nack { seq: 1, code: CommandCode::Set }));
    }

    #[tokio::test]
    async fn test_corrupt_frame_is_skipped() {
        let (host, device) = duplex(1024);
        tokio::spawn(controller(device, |p| {
            // Flip a bit of the sequence number after the CRC was computed
            let mut corrupt = ack(p, Vec::new());
            corrupt[1] ^= 0x02;
            let debug = Packet::new(CommandCode::Debug, b"tick".to_vec()).encode();
            vec![corrupt, debug, ack(p, Vec::new())]
        }));

        let mut link = MessageLink::new(host, Duration::from_millis(500));
        let reply = link.send_command(CommandCode::Noop).await.unwrap();
        assert_eq!(reply.seq, 1);
        assert!(link.current_state().is_none());
    }

    #[tokio::test]
    async fn test_timeout_without_ack() {
        let (host, device) = duplex(1024);
        tokio::spawn(controller(device, |_| Vec::new()));

        let mut link = MessageLink::new(host, Duration::from_millis(50));
        let err = link.stop().await.unwrap_err();
        assert!(matches!(err, LinkError::Timeout { seq: 1, code: CommandCode::Stop, .. }));
    }

    #[tokio::test]
    async fn test_closed_link() {
        let (host, device) = duplex(1024);
        drop(device);
        let mut link = MessageLink::new(host, Duration::from_millis(500));
        assert!(link.info().await.is_err());
    }
}
