/// Session URL signing
pub mod auth;
/// Probe request message
pub mod request;
/// Retrying probe session
pub mod session;
/// WebSocket and scripted transports
pub mod transport;

pub use request::ProbeRequest;
pub use session::{ProbeSession, SessionState};
pub use transport::{
    ConnectScript, Connector, ProbeTransport, ScriptStep, ScriptedConnector, WebSocketConnector,
};
