// MIT License - Copyright (c) 2026 Peter Wright
// Two-phase command exchange: announce, data, each acknowledged by the panel

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio::time::Duration;
use tracing::{debug, info, warn};

use crate::constants::{
    MessageType, ADDR_CONTROL, ADDR_DATA, CONFIRM_ACK, CONFIRM_NAK, SEND_NDAT, SEND_NORM,
};
use crate::error::{FrameError, GmsError, Result};
use crate::message::MessageBlock;
use crate::protocol::{data_payload, Command};
use crate::transport::connection::Connection;

/// The handshake step an outcome refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandPhase {
    /// Waiting for the acknowledgement of the announce telegram.
    AnnounceAck,
    /// Waiting for the acknowledgement of the data telegram.
    DataAck,
}

/// Why a phase did not complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseFailure {
    /// No telegram arrived before the ack timeout.
    Timeout,
    /// The panel answered with `CONFIRM_NAK`.
    Nak,
    /// A telegram with some other control code arrived first.
    UnexpectedControl(u8),
    /// The reply was not a valid telegram.
    Frame(FrameError),
}

impl fmt::Display for PhaseFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PhaseFailure::Timeout => write!(f, "timed out"),
            PhaseFailure::Nak => write!(f, "rejected (NAK)"),
            PhaseFailure::UnexpectedControl(c) => write!(f, "unexpected control {:#04x}", c),
            PhaseFailure::Frame(e) => write!(f, "{}", e),
        }
    }
}

/// Result of one two-phase exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CommandOutcome {
    Success,
    Failed {
        phase: CommandPhase,
        reason: PhaseFailure,
    },
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success)
    }
}

/// Progress of a single exchange.
///
/// `Idle -> AwaitAnnounceAck -> AwaitDataAck -> Success`, leaving to
/// `Failed` from either waiting state. One pass per exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitAnnounceAck,
    AwaitDataAck,
    Success,
    Failed {
        phase: CommandPhase,
        reason: PhaseFailure,
    },
}

impl SessionState {
    /// Advance after the current telegram was sent.
    pub fn sent(self) -> Self {
        match self {
            SessionState::Idle => SessionState::AwaitAnnounceAck,
            other => other,
        }
    }

    /// Advance with the panel's reply to the current phase.
    pub fn acknowledged(self, reply: std::result::Result<(), PhaseFailure>) -> Self {
        let phase = match self {
            SessionState::AwaitAnnounceAck => CommandPhase::AnnounceAck,
            SessionState::AwaitDataAck => CommandPhase::DataAck,
            other => return other,
        };
        match (reply, phase) {
            (Ok(()), CommandPhase::AnnounceAck) => SessionState::AwaitDataAck,
            (Ok(()), CommandPhase::DataAck) => SessionState::Success,
            (Err(reason), phase) => SessionState::Failed { phase, reason },
        }
    }

    /// The final outcome, once the exchange is over.
    pub fn outcome(self) -> Option<CommandOutcome> {
        match self {
            SessionState::Success => Some(CommandOutcome::Success),
            SessionState::Failed { phase, reason } => Some(CommandOutcome::Failed { phase, reason }),
            _ => None,
        }
    }
}

/// Sends commands to the panel over the shared connection.
///
/// The connection lock is held for the whole exchange, so the listener
/// cannot read (or acknowledge) the panel's replies in between.
pub struct CommandSession<S> {
    connection: Arc<Mutex<Connection<S>>>,
    ack_timeout: Duration,
}

impl<S> Clone for CommandSession<S> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            ack_timeout: self.ack_timeout,
        }
    }
}

impl<S> CommandSession<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(connection: Arc<Mutex<Connection<S>>>, ack_timeout: Duration) -> Self {
        Self {
            connection,
            ack_timeout,
        }
    }

    /// The connection this session sends on.
    pub fn connection(&self) -> &Arc<Mutex<Connection<S>>> {
        &self.connection
    }

    /// Send one message block through the announce/data handshake.
    ///
    /// Returns `Ok(Failed { .. })` when the panel does not acknowledge a
    /// phase; connection errors are returned as `Err`.
    pub async fn send(&self, msg_type: MessageType, content: &[u8]) -> Result<CommandOutcome> {
        let mut conn = self.connection.lock().await;
        self.exchange(&mut conn, msg_type, content).await
    }

    /// Execute a command.
    ///
    /// Area commands use the handshake; pre-framed queries are written as
    /// they are and count as successful once sent.
    pub async fn execute(&self, command: &Command) -> Result<CommandOutcome> {
        let mut conn = self.connection.lock().await;
        self.execute_on(&mut conn, command).await
    }

    /// [`CommandSession::execute`] on a connection the caller already holds,
    /// for exchanges that keep reading after the command is written.
    pub async fn execute_on(
        &self,
        conn: &mut Connection<S>,
        command: &Command,
    ) -> Result<CommandOutcome> {
        info!("Executing {:?}", command);
        if let Some((msg_type, content)) = command.message()? {
            return self.exchange(conn, msg_type, &content).await;
        }
        conn.send_command(command).await?;
        Ok(CommandOutcome::Success)
    }

    /// Execute a query and wait up to the ack timeout for the data telegram
    /// answering it, as recognised by `accept`.
    pub async fn query<F>(
        &self,
        command: &Command,
        accept: F,
    ) -> Result<Option<Vec<MessageBlock>>>
    where
        F: Fn(&[MessageBlock]) -> bool,
    {
        let mut conn = self.connection.lock().await;
        if !self.execute_on(&mut conn, command).await?.is_success() {
            return Ok(None);
        }
        conn.await_reply(self.ack_timeout, accept).await
    }

    async fn exchange(
        &self,
        conn: &mut Connection<S>,
        msg_type: MessageType,
        content: &[u8],
    ) -> Result<CommandOutcome> {
        let mut state = SessionState::Idle;

        debug!("Announcing {:?} message ({} bytes)", msg_type, content.len());
        conn.send_telegram(SEND_NORM, ADDR_CONTROL, &[]).await?;
        state = state.sent();
        state = state.acknowledged(self.await_ack(conn).await?);

        if state == SessionState::AwaitDataAck {
            let payload = data_payload(msg_type.code(), content);
            conn.send_telegram(SEND_NDAT, ADDR_DATA, &payload).await?;
            state = state.acknowledged(self.await_ack(conn).await?);
        }

        let outcome = state.outcome().unwrap_or(CommandOutcome::Failed {
            phase: CommandPhase::DataAck,
            reason: PhaseFailure::Timeout,
        });
        match outcome {
            CommandOutcome::Success => debug!("Command acknowledged"),
            CommandOutcome::Failed { phase, reason } => {
                warn!("Command failed during {:?}: {}", phase, reason)
            }
        }
        Ok(outcome)
    }

    /// Wait for the panel's confirm telegram.
    ///
    /// Any other telegram fails the phase, after being acknowledged and
    /// published like one the listener had read.
    async fn await_ack(
        &self,
        conn: &mut Connection<S>,
    ) -> Result<std::result::Result<(), PhaseFailure>> {
        let reply = match conn.read_telegram(self.ack_timeout).await {
            Ok(Some(telegram)) => telegram,
            Ok(None) => return Ok(Err(PhaseFailure::Timeout)),
            Err(GmsError::Frame(e)) => return Ok(Err(PhaseFailure::Frame(e))),
            Err(e) => return Err(e),
        };
        Ok(match reply.control {
            CONFIRM_ACK => Ok(()),
            CONFIRM_NAK => Err(PhaseFailure::Nak),
            other => {
                conn.forward(&reply).await?;
                Err(PhaseFailure::UnexpectedControl(other))
            }
        })
    }
}
