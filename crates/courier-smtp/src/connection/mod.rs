//! Socket handling and the per-connection session.

mod session;
mod stream;

pub use session::{Capabilities, Session};
pub use stream::{Connection, SocketFactory, TlsSocketFactory};
