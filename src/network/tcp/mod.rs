//! Plain TCP: one connection per message, closed by the sender once the frame
//! is written.

pub mod client;
pub mod server;

pub use client::TcpTransport;
pub use server::TcpServer;

use std::time::Duration;

/// Largest frame a listener accepts: one full chunk plus a generous header.
pub const MAX_FRAME_BYTES: u64 = 1 << 20;
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);
pub const READ_TIMEOUT: Duration = Duration::from_secs(10);
