// MIT License - Copyright (c) 2026 Peter Wright
// Public entry point: connection, listener task, commands, discovery

use std::collections::HashMap;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::config::{ArmType, ConnectionConfig};
use crate::error::{GmsError, Result};
use crate::event::{event_channel, EventReceiver, EventSender, PanelEvent};
use crate::message::{BlockStatusFields, MessageBlock};
use crate::protocol::Command;
use crate::transport::command::{CommandOutcome, CommandSession};
use crate::transport::discovery::{DiscoveryEngine, DiscoveryReport, NameCache};
use crate::transport::{shared, Connection, SharedConnection};

/// A connected GMS gateway.
///
/// A background listener reads telegrams, acknowledges them and publishes
/// each decoded message block as a [`PanelEvent::Block`]. Commands and
/// discovery share the listener's connection lock.
///
/// # Example
///
/// ```no_run
/// use telenot_gms::{ConnectionConfig, PanelEvent, TelenotPanel};
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let config = ConnectionConfig::builder().host("192.168.0.50").build();
///     let mut panel = TelenotPanel::connect(config).await?;
///
///     let mut events = panel.subscribe();
///     tokio::spawn(async move {
///         while let Ok(event) = events.recv().await {
///             if let PanelEvent::Block { block } = event {
///                 println!("{:?}", block);
///             }
///         }
///     });
///
///     let report = panel.discover_names(&[0x0001, 0x0002, 0x0003]).await?;
///     println!("{} names found", report.found);
///
///     let outcome = panel.arm_home(1).await?;
///     println!("arm home: {:?}", outcome);
///
///     tokio::signal::ctrl_c().await?;
///     panel.disconnect().await?;
///     Ok(())
/// }
/// ```
pub struct TelenotPanel<S = TcpStream> {
    connection: SharedConnection<S>,
    session: CommandSession<S>,
    names: NameCache,
    config: ConnectionConfig,
    event_tx: EventSender,
    listener_handle: Option<JoinHandle<ListenerExit>>,
    shutdown_tx: watch::Sender<bool>,
}

impl TelenotPanel<TcpStream> {
    /// Connect to the gateway and start the listener.
    ///
    /// Retries on transient errors (timeouts, I/O errors) with exponential
    /// backoff. The base delay is `reconnect_delay_ms` from the config and the
    /// maximum number of retries is `max_connect_retries`.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let max_retries = config.max_connect_retries;
        let base_delay_ms = config.reconnect_delay_ms;

        let mut last_error = None;

        for attempt in 0..=max_retries {
            if attempt > 0 {
                let delay_ms = base_delay_ms * (1 << (attempt - 1).min(4));
                warn!(
                    "Connection attempt {} failed, retrying in {:.1}s...",
                    attempt,
                    delay_ms as f64 / 1000.0
                );
                sleep(Duration::from_millis(delay_ms)).await;
            }

            let mut connection = Connection::new(&config);
            match connection.connect().await {
                Ok(()) => return Ok(Self::from_connection(connection, config)),
                Err(e) => {
                    if !e.is_retryable() || attempt == max_retries {
                        return Err(e);
                    }
                    warn!("Connection error (attempt {}): {}", attempt + 1, e);
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or(GmsError::Disconnected))
    }
}

impl<S> TelenotPanel<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Take over an established connection and spawn the listener.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn from_connection(connection: Connection<S>, config: ConnectionConfig) -> Self {
        let (event_tx, _event_rx) = event_channel(256);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let connection = shared(connection.with_events(event_tx.clone()));
        let session = CommandSession::new(connection.clone(), config.ack_timeout());
        let listener_handle = tokio::spawn(run_listener(
            connection.clone(),
            event_tx.clone(),
            config.poll_timeout(),
            shutdown_rx,
        ));

        info!("Connection to gateway established");
        let _ = event_tx.send(PanelEvent::Connected);

        Self {
            connection,
            session,
            names: NameCache::new(),
            config,
            event_tx,
            listener_handle: Some(listener_handle),
            shutdown_tx,
        }
    }

    /// Subscribe to panel events.
    pub fn subscribe(&self) -> EventReceiver {
        self.event_tx.subscribe()
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_connected()
    }

    // --- Commands ---

    /// Arm an area (Sicherungsbereich scharf).
    pub async fn arm_away(&self, area: u8) -> Result<CommandOutcome> {
        self.arm(area, ArmType::Away).await
    }

    /// Arm an area internally (Internbereich ein).
    pub async fn arm_home(&self, area: u8) -> Result<CommandOutcome> {
        self.arm(area, ArmType::Home).await
    }

    pub async fn arm(&self, area: u8, arm_type: ArmType) -> Result<CommandOutcome> {
        debug!("Arming area {} ({:?})", area, arm_type);
        self.execute(&Command::arm(area, arm_type)).await
    }

    /// Disarm an area.
    pub async fn disarm(&self, area: u8) -> Result<CommandOutcome> {
        debug!("Disarming area {}", area);
        self.execute(&Command::Disarm { area }).await
    }

    pub async fn execute(&self, command: &Command) -> Result<CommandOutcome> {
        self.session.execute(command).await
    }

    /// Ask for the occupied inputs (`0x71`) or outputs (`0x72`) and return
    /// the panel's block status for that extension.
    ///
    /// `None` when no matching answer arrives within the ack timeout.
    pub async fn query_used_state(&self, extension: u8) -> Result<Option<BlockStatusFields>> {
        debug!("Querying used state for extension {:#04x}", extension);
        let command = Command::UsedState { extension };
        let reply = self
            .session
            .query(&command, |blocks| {
                blocks.iter().any(|b| used_state_fields(b, extension).is_some())
            })
            .await?;
        Ok(reply.and_then(|blocks| {
            blocks
                .iter()
                .find_map(|b| used_state_fields(b, extension).cloned())
        }))
    }

    // --- Discovery ---

    /// Query the names of `addresses`, adding what is found to the name map.
    pub async fn discover_names(&self, addresses: &[u16]) -> Result<DiscoveryReport> {
        DiscoveryEngine::new(self.session.clone(), self.names.clone())
            .with_retry(self.config.discovery_retry())
            .with_query_delay(self.config.discovery_query_delay())
            .with_events(self.event_tx.clone())
            .discover(addresses)
            .await
    }

    /// Every name discovered so far.
    pub async fn names(&self) -> HashMap<u16, String> {
        self.names.snapshot().await
    }

    /// Stop the listener and close the connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        info!("Disconnecting from gateway");
        let _ = self.shutdown_tx.send(true);

        if let Some(handle) = self.listener_handle.take() {
            let exit = handle.await.unwrap_or_else(|e| {
                debug!("Listener task ended abnormally: {}", e);
                ListenerExit::Shutdown
            });
            // after a connection loss the listener has already said so
            if exit == ListenerExit::Shutdown {
                let _ = self.event_tx.send(PanelEvent::Disconnected);
            }
        }

        self.connection.lock().await.disconnect().await
    }
}

impl<S> Drop for TelenotPanel<S> {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(true);
        if let Some(h) = self.listener_handle.take() {
            h.abort();
        }
    }
}

fn used_state_fields(block: &MessageBlock, extension: u8) -> Option<&BlockStatusFields> {
    match block {
        MessageBlock::BlockStatus { fields: Some(fields), .. }
            if fields.addr_extension == extension =>
        {
            Some(fields)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListenerExit {
    Shutdown,
    ConnectionLost,
}

/// Read, acknowledge and publish until shutdown or connection loss.
async fn run_listener<S>(
    connection: SharedConnection<S>,
    event_tx: EventSender,
    poll_timeout: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> ListenerExit
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    debug!("Listener started");
    let exit = loop {
        if *shutdown_rx.borrow() {
            break ListenerExit::Shutdown;
        }

        let result = tokio::select! {
            _ = shutdown_rx.changed() => break ListenerExit::Shutdown,
            result = async { connection.lock().await.read_messages(poll_timeout).await } => result,
        };

        match result {
            Ok(blocks) => {
                for block in blocks {
                    debug!("Block: {:?}", block.message_type());
                    let _ = event_tx.send(PanelEvent::Block { block });
                }
            }
            Err(e) => {
                warn!("Listener stopped: {}", e);
                let _ = event_tx.send(PanelEvent::Disconnected);
                break ListenerExit::ConnectionLost;
            }
        }
    };
    debug!("Listener stopped");
    exit
}
