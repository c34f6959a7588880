//! Message bus seam for the session client.
//!
//! The session only needs three primitives from the bus daemon: request a
//! well-known name, release it, and listen for `NameLost`. They are expressed
//! by the [`NameBus`] trait so the event loop can run against the real
//! session bus ([`ZbusNameBus`]) or an in-memory double in tests.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐   RequestName / ReleaseName   ┌────────────────────┐
//! │  BusSession     │──────────────────────────────>│ org.freedesktop.   │
//! │  (NameBus)      │<──────────────────────────────│ DBus (daemon)      │
//! └─────────────────┘        NameLost(name)         └────────────────────┘
//! ```

mod zbus_bus;

use async_trait::async_trait;
use futures_util::stream::BoxStream;
use std::fmt;
use thiserror::Error;

pub use zbus_bus::ZbusNameBus;

/// Well-known name of the bus daemon.
pub const DBUS_SERVICE: &str = "org.freedesktop.DBus";

/// Object path of the bus daemon.
pub const DBUS_PATH: &str = "/org/freedesktop/DBus";

/// Interface carrying the `NameLost` signal.
pub const DBUS_INTERFACE: &str = "org.freedesktop.DBus";

/// Signal emitted by the daemon when this connection loses a name.
pub const NAME_LOST_SIGNAL: &str = "NameLost";

/// Name claimed when none is configured.
pub const DEFAULT_NAME: &str = "org.DBusTest.SignalTest";

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BusError {
    #[error("{0}")]
    Connect(String),

    #[error("Invalid bus name '{name}': {reason}")]
    InvalidName { name: String, reason: String },

    /// A bus call failed. The detail is `None` when the daemon gave no reason.
    #[error("{}", .0.as_deref().unwrap_or("no error detail"))]
    Call(Option<String>),

    #[error("Failed to subscribe to {NAME_LOST_SIGNAL}: {0}")]
    Subscribe(String),
}

impl BusError {
    /// Human-readable reason attached to a failed call, if any.
    pub fn detail(&self) -> Option<&str> {
        match self {
            BusError::Call(detail) => detail.as_deref(),
            BusError::Connect(reason) | BusError::Subscribe(reason) => Some(reason),
            BusError::InvalidName { reason, .. } => Some(reason),
        }
    }
}

/// Flags sent with a name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NameFlags {
    /// Let another connection displace us later.
    pub allow_replacement: bool,
}

impl NameFlags {
    pub const ALLOW_REPLACEMENT: NameFlags = NameFlags {
        allow_replacement: true,
    };
}

/// Daemon reply to a name request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestReply {
    PrimaryOwner,
    InQueue,
    Exists,
    AlreadyOwner,
}

/// Daemon reply to a name release.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseReply {
    Released,
    NonExistent,
    NotOwner,
}

impl fmt::Display for RequestReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestReply::PrimaryOwner => "primary owner",
            RequestReply::InQueue => "in queue",
            RequestReply::Exists => "exists",
            RequestReply::AlreadyOwner => "already owner",
        };
        f.write_str(s)
    }
}

impl fmt::Display for ReleaseReply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ReleaseReply::Released => "released",
            ReleaseReply::NonExistent => "non-existent",
            ReleaseReply::NotOwner => "not owner",
        };
        f.write_str(s)
    }
}

/// Stream of names reported by `NameLost` signals.
pub type LostNames = BoxStream<'static, String>;

/// Name-ownership primitives of the bus daemon.
#[async_trait]
pub trait NameBus: Send + Sync {
    /// Ask the daemon for `name`.
    async fn request_name(&self, name: &str, flags: NameFlags) -> Result<RequestReply, BusError>;

    /// Give `name` back to the daemon.
    async fn release_name(&self, name: &str) -> Result<ReleaseReply, BusError>;

    /// Start listening for `NameLost`. Dropping the stream removes the listener.
    async fn subscribe_name_lost(&self) -> Result<LostNames, BusError>;
}
