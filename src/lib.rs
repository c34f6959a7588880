//! namesignal library exports for the binary and integration tests.
//!
//! Claims a well-known name on the D-Bus session bus, releases it after a
//! delay, and waits for the daemon's `NameLost` signal.

pub mod bus;
pub mod config;
pub mod diagnostics;
pub mod session;

// Re-export commonly used types for convenience
pub use bus::{NameBus, ZbusNameBus};
pub use config::Config;
pub use session::{run_client, BusSession, ClientExit};
