// MIT License - Copyright (c) 2026 Peter Wright
// Byte stream to the GMS gateway: frame extraction, acknowledgements

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration, Instant};
use tracing::{debug, error, info, trace, warn};

use crate::config::ConnectionConfig;
use crate::constants::{CONFIRM_ACK, CONFIRM_NAK, SEND_NDAT, SEND_NORM, TELEGRAM_START};
use crate::error::{GmsError, Result};
use crate::event::{EventSender, PanelEvent};
use crate::message::{decode_payload, MessageBlock};
use crate::protocol::Command;
use crate::telegram::{self, Telegram};

/// How long the listener waits for the panel's answer to a status request.
const STATUS_RESPONSE_TIMEOUT: Duration = Duration::from_secs(2);

const READ_CHUNK: usize = 1024;

/// One logical connection to the gateway.
///
/// Reads keep partial frames in an internal buffer, so a read that times out
/// loses nothing: the next call continues where it stopped.
///
/// Data telegrams that arrive while a command or query holds the connection
/// are acknowledged and their blocks published on the event channel set with
/// [`Connection::with_events`].
pub struct Connection<S = TcpStream> {
    stream: Option<S>,
    buffer: BytesMut,
    host: String,
    port: u16,
    connect_timeout: Duration,
    request_status_on_announce: bool,
    events: Option<EventSender>,
}

impl Connection<TcpStream> {
    /// A disconnected connection for the configured gateway.
    pub fn new(config: &ConnectionConfig) -> Self {
        Self {
            stream: None,
            buffer: BytesMut::with_capacity(READ_CHUNK),
            host: config.host.clone(),
            port: config.port,
            connect_timeout: config.connect_timeout(),
            request_status_on_announce: config.request_status_on_announce,
            events: None,
        }
    }

    /// Open the TCP stream. Does nothing when already connected.
    pub async fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        info!("Connecting to gateway at {}:{}", self.host, self.port);

        let addr = format!("{}:{}", self.host, self.port);
        let stream = match timeout(self.connect_timeout, TcpStream::connect(addr)).await {
            Ok(Ok(stream)) => stream,
            Ok(Err(e)) => {
                error!("TCP connect failed: {}", e);
                return Err(GmsError::Io(e));
            }
            Err(_) => {
                error!("TCP connect timed out after {:?}", self.connect_timeout);
                return Err(GmsError::ConnectionTimeout);
            }
        };
        stream.set_nodelay(true)?;

        debug!("TCP socket connected");
        self.buffer.clear();
        self.stream = Some(stream);
        Ok(())
    }
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Wrap an already established stream.
    pub fn from_stream(stream: S) -> Self {
        Self {
            stream: Some(stream),
            buffer: BytesMut::with_capacity(READ_CHUNK),
            host: String::new(),
            port: 0,
            connect_timeout: Duration::ZERO,
            request_status_on_announce: false,
            events: None,
        }
    }

    /// Answer unsolicited announces with an input/output status query.
    pub fn with_status_request(mut self, enabled: bool) -> Self {
        self.request_status_on_announce = enabled;
        self
    }

    /// Publish blocks of telegrams read outside the listener to `events`.
    pub fn with_events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Close the stream. Safe to call when already disconnected.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(mut stream) = self.stream.take() {
            info!("Disconnecting from gateway");
            if let Err(e) = stream.shutdown().await {
                debug!("Shutdown error ignored: {}", e);
            }
        }
        self.buffer.clear();
        Ok(())
    }

    /// Write one complete frame.
    pub async fn send_frame(&mut self, frame: &[u8]) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(GmsError::NotConnected)?;
        trace!("TX {}", hex::encode(frame));
        if let Err(e) = write_all_flush(stream, frame).await {
            error!("Failed to write frame: {}", e);
            self.stream = None;
            return Err(GmsError::Io(e));
        }
        Ok(())
    }

    /// Encode and write one telegram.
    pub async fn send_telegram(&mut self, control: u8, address: u8, payload: &[u8]) -> Result<()> {
        self.send_frame(&telegram::encode(control, address, payload)).await
    }

    pub async fn send_command(&mut self, command: &Command) -> Result<()> {
        debug!("Sending command: {:?}", command);
        self.send_frame(&command.to_frame()?).await
    }

    /// Acknowledge the last telegram received from the panel.
    pub async fn send_confirm_ack(&mut self) -> Result<()> {
        self.send_command(&Command::ConfirmAck).await
    }

    /// Read the next frame-shaped byte sequence.
    ///
    /// Leading bytes before a start marker are dropped. A header whose two
    /// length bytes disagree, or without the secondary start marker, is
    /// skipped one byte at a time until the stream resynchronises.
    /// The returned frame has not been validated: pass it to
    /// [`telegram::decode`] or use [`Connection::read_telegram`].
    ///
    /// Returns `Ok(None)` when `wait` elapses first.
    pub async fn read_frame(&mut self, wait: Duration) -> Result<Option<Vec<u8>>> {
        let deadline = Instant::now() + wait;
        loop {
            if let Some(frame) = self.extract_frame() {
                trace!("RX {}", hex::encode(&frame));
                return Ok(Some(frame));
            }

            let stream = self.stream.as_mut().ok_or(GmsError::NotConnected)?;
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(None);
            }

            self.buffer.reserve(READ_CHUNK);
            match timeout(remaining, stream.read_buf(&mut self.buffer)).await {
                Err(_) => return Ok(None),
                Ok(Ok(0)) => {
                    debug!("Reader: connection closed by peer");
                    self.stream = None;
                    return Err(GmsError::Disconnected);
                }
                Ok(Ok(n)) => trace!("Read {} bytes", n),
                Ok(Err(e)) => {
                    error!("Socket read error: {}", e);
                    self.stream = None;
                    return Err(GmsError::Io(e));
                }
            }
        }
    }

    /// Read and decode the next telegram.
    ///
    /// A frame rejected by the codec is returned as [`GmsError::Frame`]; the
    /// connection stays usable.
    pub async fn read_telegram(&mut self, wait: Duration) -> Result<Option<Telegram>> {
        match self.read_frame(wait).await? {
            Some(frame) => Ok(Some(telegram::decode(&frame)?)),
            None => Ok(None),
        }
    }

    /// Read one telegram, acknowledge it if the panel expects that, and
    /// return the message blocks it carried.
    ///
    /// Malformed frames are logged and skipped. Only connection errors are
    /// returned.
    pub async fn read_messages(&mut self, wait: Duration) -> Result<Vec<MessageBlock>> {
        let telegram = match self.read_telegram(wait).await {
            Ok(Some(telegram)) => telegram,
            Ok(None) => return Ok(Vec::new()),
            Err(GmsError::Frame(e)) => {
                warn!("Dropping frame: {}", e);
                return Ok(Vec::new());
            }
            Err(e) => return Err(e),
        };

        match telegram.control {
            SEND_NORM => {
                self.send_confirm_ack().await?;
                if self.request_status_on_announce {
                    return self.request_status().await;
                }
                Ok(Vec::new())
            }
            SEND_NDAT => {
                self.send_confirm_ack().await?;
                Ok(decode_payload(&telegram.payload))
            }
            CONFIRM_ACK | CONFIRM_NAK => {
                debug!("Ignoring unsolicited confirm {:#04x}", telegram.control);
                Ok(Vec::new())
            }
            other => {
                debug!("Ignoring telegram with control {:#04x}", other);
                Ok(Vec::new())
            }
        }
    }

    /// Send the input/output status query and return the blocks of the
    /// panel's answer.
    async fn request_status(&mut self) -> Result<Vec<MessageBlock>> {
        debug!("Requesting block status");
        self.send_command(&Command::StatusQuery).await?;
        match self.await_reply(STATUS_RESPONSE_TIMEOUT, |_| true).await? {
            Some(blocks) => Ok(blocks),
            None => {
                debug!("No status response within {:?}", STATUS_RESPONSE_TIMEOUT);
                Ok(Vec::new())
            }
        }
    }

    /// Wait up to `wait` for a data telegram whose blocks satisfy `accept`.
    ///
    /// Announces are acknowledged; other data telegrams are forwarded as
    /// events. Returns `Ok(None)` when nothing acceptable arrives in time.
    pub async fn await_reply<F>(
        &mut self,
        wait: Duration,
        accept: F,
    ) -> Result<Option<Vec<MessageBlock>>>
    where
        F: Fn(&[MessageBlock]) -> bool,
    {
        let deadline = Instant::now() + wait;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let telegram = match self.read_telegram(remaining).await {
                Ok(Some(telegram)) => telegram,
                Ok(None) => return Ok(None),
                Err(GmsError::Frame(e)) => {
                    warn!("Dropping frame: {}", e);
                    continue;
                }
                Err(e) => return Err(e),
            };
            if telegram.control == SEND_NDAT {
                let blocks = decode_payload(&telegram.payload);
                self.send_confirm_ack().await?;
                if accept(&blocks) {
                    return Ok(Some(blocks));
                }
                self.publish(blocks);
            } else {
                self.forward(&telegram).await?;
            }
        }
    }

    /// Handle a telegram that arrived while waiting for something else.
    ///
    /// Announce and data telegrams are acknowledged, and the blocks of a data
    /// telegram are published. Confirms are left alone.
    pub async fn forward(&mut self, telegram: &Telegram) -> Result<()> {
        match telegram.control {
            SEND_NORM => self.send_confirm_ack().await,
            SEND_NDAT => {
                self.send_confirm_ack().await?;
                self.publish(decode_payload(&telegram.payload));
                Ok(())
            }
            other => {
                debug!("Not forwarding telegram with control {:#04x}", other);
                Ok(())
            }
        }
    }

    fn publish(&self, blocks: Vec<MessageBlock>) {
        match &self.events {
            Some(tx) => {
                for block in blocks {
                    let _ = tx.send(PanelEvent::Block { block });
                }
            }
            None if !blocks.is_empty() => {
                warn!("Dropping {} blocks: no event channel", blocks.len());
            }
            None => {}
        }
    }

    /// Pop one frame-shaped sequence off the front of the buffer.
    fn extract_frame(&mut self) -> Option<Vec<u8>> {
        loop {
            match self.buffer.iter().position(|&b| b == TELEGRAM_START) {
                Some(0) => {}
                Some(skip) => {
                    debug!("Dropping {} bytes before start marker", skip);
                    self.buffer.advance(skip);
                }
                None => {
                    if !self.buffer.is_empty() {
                        debug!("Dropping {} bytes without start marker", self.buffer.len());
                        self.buffer.clear();
                    }
                    return None;
                }
            }

            if self.buffer.len() < 4 {
                return None;
            }
            let length = self.buffer[1];
            if length != self.buffer[2] || self.buffer[3] != TELEGRAM_START {
                debug!("Invalid telegram header, resynchronising");
                self.buffer.advance(1);
                continue;
            }

            let total = length as usize + 6;
            if self.buffer.len() < total {
                return None;
            }
            return Some(self.buffer.split_to(total).to_vec());
        }
    }
}

async fn write_all_flush<S: AsyncWrite + Unpin>(stream: &mut S, frame: &[u8]) -> std::io::Result<()> {
    stream.write_all(frame).await?;
    stream.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{ADDR_CONTROL, ADDR_DATA};
    use tokio::io::{duplex, DuplexStream};

    const ACK: [u8; 8] = [0x68, 0x02, 0x02, 0x68, 0x00, 0x02, 0x02, 0x16];
    const ANNOUNCE: [u8; 8] = [0x68, 0x02, 0x02, 0x68, 0x40, 0x02, 0x42, 0x16];
    const WAIT: Duration = Duration::from_millis(200);

    fn pair() -> (Connection<DuplexStream>, DuplexStream) {
        let (client, panel) = duplex(1024);
        (Connection::from_stream(client), panel)
    }

    async fn read_exact_frame(panel: &mut DuplexStream, len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len];
        panel.read_exact(&mut buf).await.unwrap();
        buf
    }

    #[tokio::test]
    async fn test_read_frame_drops_leading_garbage() {
        let (mut conn, mut panel) = pair();
        let mut bytes = vec![0x00, 0xFF, 0x12];
        bytes.extend_from_slice(&ACK);
        panel.write_all(&bytes).await.unwrap();

        assert_eq!(conn.read_frame(WAIT).await.unwrap(), Some(ACK.to_vec()));
    }

    #[tokio::test]
    async fn test_read_frame_waits_for_split_frame() {
        let (mut conn, mut panel) = pair();
        let frame = telegram::encode(SEND_NDAT, ADDR_DATA, &[0x02, 0x54, b'A']);
        panel.write_all(&frame[..5]).await.unwrap();

        tokio::spawn({
            let rest = frame[5..].to_vec();
            async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                panel.write_all(&rest).await.unwrap();
                // Keep the stream open until the reader is done.
                tokio::time::sleep(Duration::from_millis(200)).await;
            }
        });

        assert_eq!(conn.read_frame(Duration::from_secs(1)).await.unwrap(), Some(frame));
    }

    #[tokio::test]
    async fn test_timeout_keeps_partial_frame() {
        let (mut conn, mut panel) = pair();
        panel.write_all(&ACK[..3]).await.unwrap();

        assert_eq!(conn.read_frame(Duration::from_millis(20)).await.unwrap(), None);

        panel.write_all(&ACK[3..]).await.unwrap();
        assert_eq!(conn.read_frame(WAIT).await.unwrap(), Some(ACK.to_vec()));
    }

    #[tokio::test]
    async fn test_bad_header_resynchronises() {
        let (mut conn, mut panel) = pair();
        let mut bytes = vec![0x68, 0x05, 0x07, 0x68];
        bytes.extend_from_slice(&ANNOUNCE);
        panel.write_all(&bytes).await.unwrap();

        assert_eq!(conn.read_frame(WAIT).await.unwrap(), Some(ANNOUNCE.to_vec()));
    }

    #[tokio::test]
    async fn test_peer_close_is_disconnected() {
        let (mut conn, panel) = pair();
        drop(panel);

        assert!(matches!(conn.read_frame(WAIT).await, Err(GmsError::Disconnected)));
        assert!(!conn.is_connected());
        assert!(matches!(conn.read_frame(WAIT).await, Err(GmsError::NotConnected)));
    }

    #[tokio::test]
    async fn test_read_telegram_reports_checksum_error() {
        let (mut conn, mut panel) = pair();
        let mut frame = ACK;
        frame[6] = 0x03;
        panel.write_all(&frame).await.unwrap();

        assert!(matches!(
            conn.read_telegram(WAIT).await,
            Err(GmsError::Frame(crate::error::FrameError::ChecksumMismatch { .. }))
        ));
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_read_messages_acks_data_telegram() {
        let (mut conn, mut panel) = pair();
        let payload = [0x02, 0x54, b'A', 0x06, 0x02, 0x01, 0x00, 0x01, 0x01, 0x22];
        panel
            .write_all(&telegram::encode(SEND_NDAT, ADDR_CONTROL, &payload))
            .await
            .unwrap();

        let blocks = conn.read_messages(WAIT).await.unwrap();
        assert_eq!(blocks.len(), 2);
        assert_eq!(read_exact_frame(&mut panel, 8).await, ACK.to_vec());
    }

    #[tokio::test]
    async fn test_read_messages_acks_announce() {
        let (mut conn, mut panel) = pair();
        panel.write_all(&ANNOUNCE).await.unwrap();

        assert!(conn.read_messages(WAIT).await.unwrap().is_empty());
        assert_eq!(read_exact_frame(&mut panel, 8).await, ACK.to_vec());
    }

    #[tokio::test]
    async fn test_read_messages_does_not_ack_acks() {
        let (mut conn, mut panel) = pair();
        panel.write_all(&ACK).await.unwrap();
        assert!(conn.read_messages(WAIT).await.unwrap().is_empty());

        let mut buf = [0u8; 8];
        let nothing = timeout(Duration::from_millis(50), panel.read(&mut buf)).await;
        assert!(nothing.is_err(), "no reply expected to a confirm");
    }

    #[tokio::test]
    async fn test_read_messages_skips_malformed_frame() {
        let (mut conn, mut panel) = pair();
        let mut frame = telegram::encode(SEND_NDAT, ADDR_CONTROL, &[0x02, 0x54, b'A']);
        frame[7] ^= 0xFF;
        panel.write_all(&frame).await.unwrap();

        assert!(conn.read_messages(WAIT).await.unwrap().is_empty());
        assert!(conn.is_connected());
    }

    #[tokio::test]
    async fn test_status_request_on_announce() {
        let (client, mut panel) = duplex(1024);
        let mut conn = Connection::from_stream(client).with_status_request(true);

        let gateway = tokio::spawn(async move {
            panel.write_all(&ANNOUNCE).await.unwrap();
            assert_eq!(read_exact_frame(&mut panel, 8).await, ACK.to_vec());

            let query = Command::StatusQuery.to_frame().unwrap();
            assert_eq!(read_exact_frame(&mut panel, query.len()).await, query);

            panel.write_all(&ACK).await.unwrap();
            let status = [0x07, 0x24, 0x00, 0x00, 0x00, 0x01, 0xFF, 0xFE];
            panel
                .write_all(&telegram::encode(SEND_NDAT, ADDR_CONTROL, &status))
                .await
                .unwrap();
            assert_eq!(read_exact_frame(&mut panel, 8).await, ACK.to_vec());
            panel
        });

        let blocks = conn.read_messages(WAIT).await.unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(matches!(blocks[0], MessageBlock::BlockStatus { .. }));
        gateway.await.unwrap();
    }

    #[tokio::test]
    async fn test_forward_acks_and_publishes_data() {
        let (tx, mut rx) = crate::event::event_channel(8);
        let (client, mut panel) = duplex(1024);
        let mut conn = Connection::from_stream(client).with_events(tx);

        let data = Telegram {
            control: SEND_NDAT,
            address: ADDR_CONTROL,
            payload: vec![0x02, 0x54, b'Z'],
        };
        conn.forward(&data).await.unwrap();
        assert_eq!(read_exact_frame(&mut panel, 8).await, ACK.to_vec());
        assert!(matches!(
            rx.try_recv().unwrap(),
            PanelEvent::Block { block: MessageBlock::AsciiText { .. } }
        ));

        let ack = telegram::decode(&ACK).unwrap();
        conn.forward(&ack).await.unwrap();
        let mut buf = [0u8; 8];
        let nothing = timeout(Duration::from_millis(50), panel.read(&mut buf)).await;
        assert!(nothing.is_err(), "confirms are not acknowledged");
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_await_reply_forwards_unrelated_data() {
        let (tx, mut rx) = crate::event::event_channel(8);
        let (client, mut panel) = duplex(1024);
        let mut conn = Connection::from_stream(client).with_events(tx);

        let text = telegram::encode(SEND_NDAT, ADDR_CONTROL, &[0x02, 0x54, b'A']);
        let status = telegram::encode(
            SEND_NDAT,
            ADDR_CONTROL,
            &[0x06, 0x24, 0x00, 0x00, 0x00, 0x71, 0xFE],
        );
        panel.write_all(&text).await.unwrap();
        panel.write_all(&status).await.unwrap();

        let is_status = |blocks: &[MessageBlock]| {
            blocks.iter().any(|b| matches!(b, MessageBlock::BlockStatus { .. }))
        };
        let reply = conn.await_reply(WAIT, is_status).await.unwrap().unwrap();
        assert!(matches!(reply[0], MessageBlock::BlockStatus { .. }));
        assert_eq!(read_exact_frame(&mut panel, 16).await, [ACK, ACK].concat());
        assert!(matches!(
            rx.try_recv().unwrap(),
            PanelEvent::Block { block: MessageBlock::AsciiText { .. } }
        ));
    }

    #[tokio::test]
    async fn test_disconnect_is_idempotent() {
        let (mut conn, _panel) = pair();
        conn.disconnect().await.unwrap();
        conn.disconnect().await.unwrap();
        assert!(!conn.is_connected());
        assert!(matches!(conn.send_confirm_ack().await, Err(GmsError::NotConnected)));
    }
}
