//! Operator console for voxbust - line-delimited JSON over TCP
//!
//! Start the console in your app:
//! ```ignore
//! let handler = Arc::new(Mutex::new(MyHandler::new(engine.clone())));
//! let _server = DebugServer::start(handler, DEFAULT_PORT);
//! ```

pub mod protocol;
pub mod server;

pub use protocol::*;
pub use server::{DebugHandler, DebugServer, ServerError};

/// Default console port
pub const DEFAULT_PORT: u16 = 9743;
