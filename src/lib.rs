//! SSE Bridge - duplex MCP transport
//!
//! Pairs a one-way Server-Sent-Events stream with a separate POST
//! channel to form one logical bidirectional JSON-RPC connection:
//! session establishment, endpoint announcement, message correlation,
//! and stream lifecycle. The application behind the bridge plugs in
//! through the [`session::RpcHandler`] trait.

pub mod error;
pub mod probe;
pub mod registry;
pub mod rpc;
pub mod server;
pub mod session;
pub mod sse;

pub use error::{BridgeError, Result};
pub use registry::SessionRegistry;
pub use server::{ServerConfig, SseServer};
pub use session::{RpcHandler, Session, SessionContext, SessionState};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
