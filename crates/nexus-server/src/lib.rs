//! # nexus-server
//!
//! Message routing on top of a persistent, message-framed connection.
//!
//! - **Transport seam**: [`transport::FrameReader`] / [`transport::FrameWriter`],
//!   with an axum `WebSocket` adapter and an in-memory pair for tests
//! - **Connection**: outbound queue, lifecycle token, per-connection stream
//!   cancellation table, send hooks
//! - **Router**: fire-and-forget handlers and cancellable stream handlers,
//!   kill packets (`-<type>` + stream id), one codec per router
//! - **Pool**: live connections, join/leave observers, broadcast
//! - **Server**: axum listener with `/ws`, `/health` and `/metrics`

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
pub mod context;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod pool;
pub mod router;
pub mod server;
pub mod shutdown;
pub mod transport;

pub use connection::{Connection, ConnectionId};
pub use context::StreamContext;
pub use errors::{RoutingError, TransportError};
pub use pool::Pool;
pub use router::{Dispatch, Handler, Router, RouterConfig, StreamHandler};
pub use server::NexusServer;
pub use transport::Transport;
