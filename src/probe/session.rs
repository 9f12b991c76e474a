//! Probe session state machine
//!
//! One session connects to the probe service, submits a single HTTP probe
//! request and collects node results until the service reports completion.
//! A bounded number of attempts is made with a fixed pause between them.

use crate::config::{normalize_url, ProbeConfig};
use crate::error::ProbeError;
use crate::events::{normalize_node, ProbeEvent, RawNode};
use crate::probe::auth::session_url;
use crate::probe::request::ProbeRequest;
use crate::probe::transport::{Connector, ProbeTransport};
use chrono::Utc;
use log::{debug, error, info, warn};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::{timeout, Instant};

/// Consecutive unparsable messages that end an attempt
pub const MAX_UNPARSABLE_MESSAGES: usize = 5;

/// Phase of a session attempt, used for logging
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Sent,
    Collecting,
    Completed,
    Failed,
    TimedOut,
}

impl SessionState {
    /// Terminal state an attempt error leaves the session in
    fn after(error: &ProbeError) -> Self {
        match error {
            ProbeError::SessionTimeout(_) => SessionState::TimedOut,
            _ => SessionState::Failed,
        }
    }
}

/// Retrying probe session against the distributed probe service
pub struct ProbeSession {
    config: ProbeConfig,
    connector: Arc<dyn Connector>,
    last_txnid: AtomicU64,
}

impl ProbeSession {
    pub fn new(config: ProbeConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            last_txnid: AtomicU64::new(0),
        }
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Probe `url` and return every node result received
    ///
    /// Returns `None` when all attempts failed, which is distinct from an
    /// empty batch returned by a session that completed without data.
    pub async fn run(&self, url: &str) -> Option<Vec<RawNode>> {
        if !self.config.has_credentials() {
            error!("Probe service credentials are not configured");
            return None;
        }

        let url = normalize_url(url);
        let attempts = self.config.retries;

        for attempt in 1..=attempts {
            match self.attempt(&url).await {
                Ok(batch) => {
                    info!(
                        "Probe of {} completed with {} nodes (attempt {}/{})",
                        url,
                        batch.len(),
                        attempt,
                        attempts
                    );
                    return Some(batch);
                }
                Err(e) => {
                    warn!(
                        "Probe attempt {}/{} for {} ended {:?}: {}",
                        attempt,
                        attempts,
                        url,
                        SessionState::after(&e),
                        e
                    );
                }
            }

            if attempt < attempts {
                tokio::time::sleep(self.config.retry_backoff()).await;
            }
        }

        error!("Probe of {} failed after {} attempts", url, attempts);
        None
    }

    /// One connect/send/collect cycle; the transport is closed on every path
    /// once the connection is open
    async fn attempt(&self, url: &str) -> Result<Vec<RawNode>, ProbeError> {
        let ut = Utc::now().timestamp();
        let target = session_url(
            &self.config.host,
            &self.config.username,
            &self.config.token,
            ut,
        );

        debug!("{:?} -> {:?}: {}", SessionState::Idle, SessionState::Connecting, self.config.host);
        let mut transport = self.connector.connect(&target).await?;

        let txnid = self.next_txnid(ut);
        let result = self.exchange(transport.as_mut(), url, txnid).await;
        transport.close().await;
        result
    }

    /// Transaction id for an attempt started at `ut`
    ///
    /// The Unix second, bumped past the previous id so attempts within one
    /// second never share a transaction.
    fn next_txnid(&self, ut: i64) -> u64 {
        let ut = ut.max(0) as u64;
        let previous = self
            .last_txnid
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| {
                Some(ut.max(last + 1))
            })
            .unwrap_or_else(|last| last);
        ut.max(previous + 1)
    }

    async fn exchange(
        &self,
        transport: &mut dyn ProbeTransport,
        url: &str,
        txnid: u64,
    ) -> Result<Vec<RawNode>, ProbeError> {
        let request = ProbeRequest::http_get(
            url,
            txnid,
            &self.config.nodes,
            self.config.test_timeout_seconds,
        );
        transport.send(request.to_message()?).await?;
        info!("Probe request sent for {} (txnid={})", url, txnid);
        debug!("{:?} -> {:?}", SessionState::Sent, SessionState::Collecting);

        self.collect(transport, txnid).await
    }

    async fn collect(
        &self,
        transport: &mut dyn ProbeTransport,
        txnid: u64,
    ) -> Result<Vec<RawNode>, ProbeError> {
        let session_timeout = self.config.session_timeout();
        let deadline = Instant::now() + session_timeout;
        let mut batch = Vec::new();
        let mut unparsable = 0;

        loop {
            let now = Instant::now();
            if now >= deadline {
                return Err(ProbeError::SessionTimeout(session_timeout));
            }
            let wait = self.config.read_timeout().min(deadline - now);

            let frame = match timeout(wait, transport.recv()).await {
                Ok(Ok(frame)) => frame,
                Ok(Err(e)) if e.is_recoverable() => {
                    warn!("{}", e);
                    continue;
                }
                Ok(Err(e)) => return Err(e),
                Err(_) => {
                    debug!("{}", ProbeError::ReceiveTimeout(wait));
                    continue;
                }
            };
            let Some(text) = frame else {
                return Err(ProbeError::ConnectionClosed);
            };

            let event = match ProbeEvent::parse(&text) {
                Ok(event) => {
                    unparsable = 0;
                    event
                }
                Err(e) => {
                    unparsable += 1;
                    warn!("{} ({} in a row)", e, unparsable);
                    if unparsable >= MAX_UNPARSABLE_MESSAGES {
                        return Err(e);
                    }
                    continue;
                }
            };

            match event {
                ProbeEvent::TaskAccept => info!("Probe task accepted (txnid={})", txnid),
                ProbeEvent::NewData(data) => match normalize_node(data) {
                    Some(node) => batch.push(node),
                    None => info!("Ignoring non-object node data"),
                },
                ProbeEvent::TaskEnd => {
                    info!("Probe task finished with {} nodes", batch.len());
                    return Ok(batch);
                }
                ProbeEvent::TaskErr(reason) => return Err(ProbeError::TaskFailed(reason)),
                ProbeEvent::Unknown(tag) => debug!("Ignoring probe message of type '{}'", tag),
            }
        }
    }
}
