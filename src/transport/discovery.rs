// MIT License - Copyright (c) 2026 Peter Wright
// Name discovery via contact-info queries

use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::RwLock;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

use crate::constants::{CONFIRM_ACK, SEND_NDAT, SEND_NORM, TELEGRAM_START};
use crate::error::{GmsError, Result};
use crate::event::{EventSender, PanelEvent};
use crate::message::{decode_contact_record, MessageBlock};
use crate::protocol::Command;
use crate::telegram;
use crate::transport::command::CommandSession;

/// How often, and how patiently, to poll for the reply to one query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 30,
            interval: Duration::from_millis(100),
        }
    }
}

/// Address to name map filled by discovery.
///
/// Entries are only ever inserted or replaced; a query that finds nothing
/// leaves an earlier name in place.
#[derive(Debug, Clone, Default)]
pub struct NameCache {
    names: Arc<RwLock<HashMap<u16, String>>>,
}

impl NameCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a name, returning the one it replaced.
    pub async fn insert(&self, address: u16, name: String) -> Option<String> {
        self.names.write().await.insert(address, name)
    }

    pub async fn get(&self, address: u16) -> Option<String> {
        self.names.read().await.get(&address).cloned()
    }

    pub async fn len(&self) -> usize {
        self.names.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.names.read().await.is_empty()
    }

    /// Copy of the current map.
    pub async fn snapshot(&self) -> HashMap<u16, String> {
        self.names.read().await.clone()
    }
}

/// Summary of one discovery run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveryReport {
    pub queried: usize,
    pub found: usize,
    /// Names found in this run, in query order.
    pub names: Vec<(u16, String)>,
}

/// Whether `frame` is one of the panel's short announce/ack telegrams that
/// arrive ahead of the actual contact-info reply.
pub fn is_echo(frame: &[u8]) -> bool {
    const ANNOUNCE_ECHO: [u8; 7] = [TELEGRAM_START, 0x02, 0x02, TELEGRAM_START, SEND_NORM, 0x02, 0x42];
    const ACK_ECHO: [u8; 7] = [TELEGRAM_START, 0x02, 0x02, TELEGRAM_START, CONFIRM_ACK, 0x02, 0x02];

    let Some((prefix, rest)) = frame.split_at_checked(7) else {
        return false;
    };
    let high_nibble_one = rest.first().is_some_and(|b| b >> 4 == 0x1);
    high_nibble_one && (prefix == ANNOUNCE_ECHO || prefix == ACK_ECHO)
}

/// Collapse runs of whitespace into single spaces and trim the ends.
pub fn normalise_name(name: &str) -> String {
    name.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Queries the panel for the names of caller-supplied addresses.
///
/// Queries go out through the [`CommandSession`]. Its connection lock is
/// taken once per query and released before the inter-query delay, so the
/// listener keeps running between queries.
pub struct DiscoveryEngine<S> {
    session: CommandSession<S>,
    cache: NameCache,
    retry: RetryPolicy,
    query_delay: Duration,
    event_tx: Option<EventSender>,
}

impl<S> DiscoveryEngine<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(session: CommandSession<S>, cache: NameCache) -> Self {
        Self {
            session,
            cache,
            retry: RetryPolicy::default(),
            query_delay: Duration::from_millis(500),
            event_tx: None,
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_query_delay(mut self, delay: Duration) -> Self {
        self.query_delay = delay;
        self
    }

    /// Publish `NameDiscovered` and `DiscoveryComplete` events.
    pub fn with_events(mut self, event_tx: EventSender) -> Self {
        self.event_tx = Some(event_tx);
        self
    }

    pub fn cache(&self) -> &NameCache {
        &self.cache
    }

    /// Query every address in turn.
    ///
    /// Addresses without a name are skipped. A lost connection aborts the
    /// run; names found up to that point stay in the cache.
    pub async fn discover(&self, addresses: &[u16]) -> Result<DiscoveryReport> {
        info!("Querying names for {} addresses", addresses.len());
        let mut names = Vec::new();

        for (i, &address) in addresses.iter().enumerate() {
            if i > 0 {
                sleep(self.query_delay).await;
            }

            let name = match self.query_name(address).await {
                Ok(name) => name,
                Err(e) if is_connection_loss(&e) => {
                    warn!("Name discovery aborted at {:#06x}: {}", address, e);
                    return Err(GmsError::DiscoveryAborted {
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            };

            match name {
                Some(name) => {
                    info!("Discovered name for {:#06x}: '{}'", address, name);
                    self.cache.insert(address, name.clone()).await;
                    if let Some(tx) = &self.event_tx {
                        let _ = tx.send(PanelEvent::NameDiscovered {
                            address,
                            name: name.clone(),
                        });
                    }
                    names.push((address, name));
                }
                None => debug!("No name found for {:#06x}", address),
            }
        }

        let report = DiscoveryReport {
            queried: addresses.len(),
            found: names.len(),
            names,
        };
        info!(
            "Name discovery completed: {}/{} successful",
            report.found, report.queried
        );
        if let Some(tx) = &self.event_tx {
            let _ = tx.send(PanelEvent::DiscoveryComplete {
                queried: report.queried,
                found: report.found,
            });
        }
        Ok(report)
    }

    /// Send one contact-info query and poll for the reply.
    ///
    /// Every valid frame received meanwhile is acknowledged, and data
    /// telegrams other than the reply are published as events. Frames the
    /// codec rejects are dropped unacknowledged. Returns the
    /// whitespace-normalised name, or `None` when the attempts run out.
    pub async fn query_name(&self, address: u16) -> Result<Option<String>> {
        let mut conn = self.session.connection().lock().await;
        self.session
            .execute_on(&mut conn, &Command::ContactInfo { address })
            .await?;

        for _ in 0..self.retry.attempts {
            let Some(frame) = conn.read_frame(self.retry.interval).await? else {
                continue;
            };
            let telegram = match telegram::decode(&frame) {
                Ok(telegram) => telegram,
                Err(e) => {
                    warn!("Dropping frame while querying {:#06x}: {}", address, e);
                    continue;
                }
            };

            if is_echo(&frame) {
                conn.send_confirm_ack().await?;
                continue;
            }
            if let Some(MessageBlock::ContactInfo(record)) = decode_contact_record(&frame) {
                conn.send_confirm_ack().await?;
                let name = normalise_name(&record.name.text);
                debug!(
                    "Contact record for {:#06x} decoded as {}",
                    address,
                    record.name.encoding.as_str()
                );
                return Ok(Some(name));
            }
            match telegram.control {
                SEND_NORM | SEND_NDAT => conn.forward(&telegram).await?,
                _ => conn.send_confirm_ack().await?,
            }
        }

        warn!("No name response for address {:#06x}", address);
        Ok(None)
    }
}

fn is_connection_loss(e: &GmsError) -> bool {
    matches!(
        e,
        GmsError::Disconnected | GmsError::NotConnected | GmsError::Io(_)
    )
}
