//! Message transports for the probe session
//!
//! The session speaks text frames over a [`ProbeTransport`] obtained from a
//! [`Connector`]. The production pair wraps a WebSocket; the scripted pair
//! replays canned frames for tests and dry runs.

use crate::error::ProbeError;
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::Instant;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Limit for the TCP/TLS/WebSocket handshake
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// An open, bidirectional text-frame channel to the probe service
pub trait ProbeTransport: Send {
    /// Send one text frame
    fn send<'a>(
        &'a mut self,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProbeError>> + Send + 'a>>;

    /// Wait for the next text frame; `Ok(None)` once the peer has closed
    ///
    /// Must be cancel-safe: the session drops this future on read timeouts.
    fn recv<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, ProbeError>> + Send + 'a>>;

    /// Release the channel
    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Opens transports to a signed session URL
pub trait Connector: Send + Sync {
    fn connect<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ProbeTransport>, ProbeError>> + Send + 'a>>;
}

/// Connector opening real WebSocket sessions
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    connect_timeout: Duration,
}

impl Default for WebSocketConnector {
    fn default() -> Self {
        Self::new(CONNECT_TIMEOUT)
    }
}

impl WebSocketConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn open(&self, url: &str) -> Result<Box<dyn ProbeTransport>, ProbeError> {
        let (stream, response) =
            tokio::time::timeout(self.connect_timeout, tokio_tungstenite::connect_async(url))
                .await
                .map_err(|_| {
                    ProbeError::ConnectFailure(format!(
                        "handshake timed out after {:?}",
                        self.connect_timeout
                    ))
                })?
                .map_err(|e| ProbeError::ConnectFailure(e.to_string()))?;

        debug!("WebSocket connected (HTTP {})", response.status());
        Ok(Box::new(WebSocketTransport { stream }))
    }
}

impl Connector for WebSocketConnector {
    fn connect<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ProbeTransport>, ProbeError>> + Send + 'a>>
    {
        Box::pin(self.open(url))
    }
}

/// WebSocket-backed transport
pub struct WebSocketTransport {
    stream: WsStream,
}

impl ProbeTransport for WebSocketTransport {
    fn send<'a>(
        &'a mut self,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProbeError>> + Send + 'a>> {
        Box::pin(async move {
            self.stream
                .send(Message::Text(text.into()))
                .await
                .map_err(|e| ProbeError::SendFailure(e.to_string()))
        })
    }

    fn recv<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, ProbeError>> + Send + 'a>> {
        Box::pin(async move {
            loop {
                match self.stream.next().await {
                    Some(Ok(Message::Text(text))) => return Ok(Some(text.as_str().to_owned())),
                    Some(Ok(Message::Binary(bytes))) => {
                        return Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
                    }
                    Some(Ok(Message::Close(frame))) => {
                        debug!("WebSocket closed by peer: {:?}", frame);
                        return Ok(None);
                    }
                    // Ping/pong and raw frames carry no payload for us
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        warn!("WebSocket receive error: {}", e);
                        return Err(ProbeError::ConnectionClosed);
                    }
                    None => return Ok(None),
                }
            }
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            if let Err(e) = self.stream.close(None).await {
                debug!("Ignoring error while closing WebSocket: {}", e);
            }
        })
    }
}

/// One step of a scripted session, replayed by [`ScriptedTransport::recv`]
#[derive(Debug, Clone)]
pub enum ScriptStep {
    /// Deliver a text frame
    Frame(String),
    /// Stay silent for a while before the next step
    Pause(Duration),
    /// Peer closes the connection
    Close,
    /// Transport-level failure
    Fail(ProbeError),
}

/// How one scripted connection attempt behaves
#[derive(Debug, Clone)]
pub enum ConnectScript {
    /// Handshake fails with the given message
    Refuse(String),
    /// Handshake succeeds; `recv` replays `steps`, then stays silent forever
    Accept {
        steps: Vec<ScriptStep>,
        send_error: Option<String>,
    },
    /// Handshake takes `Duration`, then behaves like the inner script
    Slow(Duration, Box<ConnectScript>),
}

impl ConnectScript {
    /// Accept the connection and replay the given frames
    pub fn frames<I, S>(frames: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Accept {
            steps: frames.into_iter().map(|f| ScriptStep::Frame(f.into())).collect(),
            send_error: None,
        }
    }

    pub fn steps(steps: Vec<ScriptStep>) -> Self {
        Self::Accept {
            steps,
            send_error: None,
        }
    }

    /// Delay the handshake of this script by `handshake`
    pub fn slow(self, handshake: Duration) -> Self {
        Self::Slow(handshake, Box::new(self))
    }
}

/// Observations shared between a [`ScriptedConnector`] and its transports
#[derive(Debug, Default)]
pub struct ScriptStats {
    connects: AtomicUsize,
    closes: AtomicUsize,
    urls: Mutex<Vec<String>>,
    sent: Mutex<Vec<String>>,
}

impl ScriptStats {
    /// Connection attempts, refused ones included
    pub fn connects(&self) -> usize {
        self.connects.load(Ordering::SeqCst)
    }

    /// Transports released
    pub fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }

    /// Session URLs requested, in order
    pub fn urls(&self) -> Vec<String> {
        self.urls.lock().map(|u| u.clone()).unwrap_or_default()
    }

    /// Frames sent over accepted transports, in order
    pub fn sent(&self) -> Vec<String> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

/// Connector replaying one [`ConnectScript`] per attempt
///
/// Attempts beyond the scripted ones are refused.
#[derive(Debug, Default)]
pub struct ScriptedConnector {
    scripts: Mutex<VecDeque<ConnectScript>>,
    stats: Arc<ScriptStats>,
}

impl ScriptedConnector {
    pub fn new(scripts: Vec<ConnectScript>) -> Self {
        Self {
            scripts: Mutex::new(scripts.into()),
            stats: Arc::new(ScriptStats::default()),
        }
    }

    /// Queue a script for a later attempt
    pub fn push(&self, script: ConnectScript) {
        if let Ok(mut scripts) = self.scripts.lock() {
            scripts.push_back(script);
        }
    }

    pub fn stats(&self) -> Arc<ScriptStats> {
        Arc::clone(&self.stats)
    }
}

impl Connector for ScriptedConnector {
    fn connect<'a>(
        &'a self,
        url: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Box<dyn ProbeTransport>, ProbeError>> + Send + 'a>>
    {
        Box::pin(async move {
            self.stats.connects.fetch_add(1, Ordering::SeqCst);
            if let Ok(mut urls) = self.stats.urls.lock() {
                urls.push(url.to_string());
            }

            let mut script = self
                .scripts
                .lock()
                .ok()
                .and_then(|mut scripts| scripts.pop_front());
            while let Some(ConnectScript::Slow(handshake, inner)) = script {
                tokio::time::sleep(handshake).await;
                script = Some(*inner);
            }

            match script {
                Some(ConnectScript::Accept { steps, send_error }) => {
                    Ok(Box::new(ScriptedTransport {
                        steps: steps.into(),
                        pause_until: None,
                        send_error,
                        stats: Arc::clone(&self.stats),
                    }) as Box<dyn ProbeTransport>)
                }
                Some(ConnectScript::Refuse(reason)) => Err(ProbeError::ConnectFailure(reason)),
                Some(ConnectScript::Slow(..)) | None => Err(ProbeError::ConnectFailure(
                    "no scripted connection left".to_string(),
                )),
            }
        })
    }
}

/// Transport replaying scripted steps
pub struct ScriptedTransport {
    steps: VecDeque<ScriptStep>,
    pause_until: Option<Instant>,
    send_error: Option<String>,
    stats: Arc<ScriptStats>,
}

impl ProbeTransport for ScriptedTransport {
    fn send<'a>(
        &'a mut self,
        text: String,
    ) -> Pin<Box<dyn Future<Output = Result<(), ProbeError>> + Send + 'a>> {
        Box::pin(async move {
            if let Some(reason) = &self.send_error {
                return Err(ProbeError::SendFailure(reason.clone()));
            }
            if let Ok(mut sent) = self.stats.sent.lock() {
                sent.push(text);
            }
            Ok(())
        })
    }

    fn recv<'a>(
        &'a mut self,
    ) -> Pin<Box<dyn Future<Output = Result<Option<String>, ProbeError>> + Send + 'a>> {
        Box::pin(async move {
            loop {
                match self.steps.front().cloned() {
                    Some(ScriptStep::Pause(duration)) => {
                        // Deadline is kept across cancelled reads
                        let until = *self
                            .pause_until
                            .get_or_insert_with(|| Instant::now() + duration);
                        tokio::time::sleep_until(until).await;
                        self.pause_until = None;
                        self.steps.pop_front();
                    }
                    Some(ScriptStep::Frame(text)) => {
                        self.steps.pop_front();
                        return Ok(Some(text));
                    }
                    Some(ScriptStep::Close) => {
                        self.steps.pop_front();
                        return Ok(None);
                    }
                    Some(ScriptStep::Fail(error)) => {
                        self.steps.pop_front();
                        return Err(error);
                    }
                    None => std::future::pending::<()>().await,
                }
            }
        })
    }

    fn close<'a>(&'a mut self) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>> {
        Box::pin(async move {
            self.stats.closes.fetch_add(1, Ordering::SeqCst);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_connector_replays_in_order() {
        let connector = ScriptedConnector::new(vec![
            ConnectScript::Refuse("boom".to_string()),
            ConnectScript::frames(["one", "two"]),
        ]);
        let stats = connector.stats();

        let refused = connector.connect("wss://a").await;
        assert!(matches!(refused, Err(ProbeError::ConnectFailure(reason)) if reason == "boom"));

        let mut transport = connector.connect("wss://b").await.unwrap();
        transport.send("hello".to_string()).await.unwrap();
        assert_eq!(transport.recv().await.unwrap().as_deref(), Some("one"));
        assert_eq!(transport.recv().await.unwrap().as_deref(), Some("two"));
        transport.close().await;

        assert_eq!(stats.connects(), 2);
        assert_eq!(stats.closes(), 1);
        assert_eq!(stats.urls(), vec!["wss://a", "wss://b"]);
        assert_eq!(stats.sent(), vec!["hello"]);
    }

    #[tokio::test]
    async fn test_scripted_connector_refuses_when_exhausted() {
        let connector = ScriptedConnector::default();
        assert!(connector.connect("wss://a").await.is_err());

        connector.push(ConnectScript::steps(vec![ScriptStep::Close]));
        let mut transport = connector.connect("wss://a").await.unwrap();
        assert_eq!(transport.recv().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scripted_send_error() {
        let connector = ScriptedConnector::new(vec![ConnectScript::Accept {
            steps: vec![],
            send_error: Some("broken pipe".to_string()),
        }]);
        let mut transport = connector.connect("wss://a").await.unwrap();
        assert_eq!(
            transport.send("x".to_string()).await,
            Err(ProbeError::SendFailure("broken pipe".to_string()))
        );
        assert!(connector.stats().sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_scripted_pause_survives_cancellation() {
        let connector = ScriptedConnector::new(vec![ConnectScript::steps(vec![
            ScriptStep::Pause(Duration::from_secs(8)),
            ScriptStep::Frame("late".to_string()),
        ])]);
        let mut transport = connector.connect("wss://a").await.unwrap();

        let first = tokio::time::timeout(Duration::from_secs(5), transport.recv()).await;
        assert!(first.is_err());

        // The next read only waits out the remainder of the pause
        let started = Instant::now();
        let second = tokio::time::timeout(Duration::from_secs(5), transport.recv()).await;
        assert_eq!(second.unwrap().unwrap().as_deref(), Some("late"));
        assert_eq!(started.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_handshake_delays_connect() {
        let connector = ScriptedConnector::new(vec![
            ConnectScript::frames(["hi"]).slow(Duration::from_secs(40))
        ]);

        let started = Instant::now();
        let mut transport = connector.connect("wss://a").await.unwrap();
        assert_eq!(started.elapsed(), Duration::from_secs(40));
        assert_eq!(transport.recv().await.unwrap().as_deref(), Some("hi"));
    }
}
