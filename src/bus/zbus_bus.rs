//! `NameBus` over a real D-Bus connection.

use async_trait::async_trait;
use futures_util::StreamExt;
use tracing::{debug, info};
use zbus::fdo::{DBusProxy, ReleaseNameReply, RequestNameFlags, RequestNameReply};
use zbus::names::WellKnownName;
use zbus::{connection::Builder, Connection};

use super::{
    BusError, LostNames, NameBus, NameFlags, ReleaseReply, RequestReply, DBUS_INTERFACE,
    DBUS_PATH, DBUS_SERVICE,
};

/// Session bus link plus a proxy for the bus daemon.
///
/// The connection lives as long as this value; nothing closes it explicitly.
pub struct ZbusNameBus {
    connection: Connection,
    proxy: DBusProxy<'static>,
}

impl ZbusNameBus {
    /// Connect to the session bus, or to `address` when one is given.
    pub async fn connect(address: Option<&str>) -> Result<Self, BusError> {
        let connection = match address {
            Some(address) => {
                debug!("Connecting to bus at {}", address);
                Builder::address(address)
                    .map_err(connect_error)?
                    .build()
                    .await
                    .map_err(connect_error)?
            }
            None => Connection::session().await.map_err(connect_error)?,
        };

        let proxy = DBusProxy::builder(&connection)
            .destination(DBUS_SERVICE)
            .map_err(connect_error)?
            .path(DBUS_PATH)
            .map_err(connect_error)?
            .interface(DBUS_INTERFACE)
            .map_err(connect_error)?
            .build()
            .await
            .map_err(connect_error)?;

        info!(
            "Connected to D-Bus (unique name: {})",
            connection
                .unique_name()
                .map_or_else(|| "<unknown>".to_string(), |n| n.to_string())
        );

        Ok(Self { connection, proxy })
    }

    /// Get a reference to the connection for advanced usage.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }
}

fn connect_error(e: zbus::Error) -> BusError {
    BusError::Connect(e.to_string())
}

fn well_known(name: &str) -> Result<WellKnownName<'_>, BusError> {
    WellKnownName::try_from(name).map_err(|e| BusError::InvalidName {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

impl From<zbus::fdo::Error> for BusError {
    fn from(e: zbus::fdo::Error) -> Self {
        let message = e.to_string();
        if message.trim().is_empty() {
            BusError::Call(None)
        } else {
            BusError::Call(Some(message))
        }
    }
}

impl From<RequestNameReply> for RequestReply {
    fn from(reply: RequestNameReply) -> Self {
        match reply {
            RequestNameReply::PrimaryOwner => RequestReply::PrimaryOwner,
            RequestNameReply::InQueue => RequestReply::InQueue,
            RequestNameReply::Exists => RequestReply::Exists,
            RequestNameReply::AlreadyOwner => RequestReply::AlreadyOwner,
        }
    }
}

impl From<ReleaseNameReply> for ReleaseReply {
    fn from(reply: ReleaseNameReply) -> Self {
        match reply {
            ReleaseNameReply::Released => ReleaseReply::Released,
            ReleaseNameReply::NonExistent => ReleaseReply::NonExistent,
            ReleaseNameReply::NotOwner => ReleaseReply::NotOwner,
        }
    }
}

#[async_trait]
impl NameBus for ZbusNameBus {
    async fn request_name(&self, name: &str, flags: NameFlags) -> Result<RequestReply, BusError> {
        let name = well_known(name)?;
        debug!("RequestName {} (allow_replacement={})", name, flags.allow_replacement);

        let reply = if flags.allow_replacement {
            self.proxy
                .request_name(name, RequestNameFlags::AllowReplacement.into())
                .await?
        } else {
            self.proxy.request_name(name, Default::default()).await?
        };

        Ok(reply.into())
    }

    async fn release_name(&self, name: &str) -> Result<ReleaseReply, BusError> {
        let name = well_known(name)?;
        debug!("ReleaseName {}", name);
        Ok(self.proxy.release_name(name).await?.into())
    }

    async fn subscribe_name_lost(&self) -> Result<LostNames, BusError> {
        let stream = self
            .proxy
            .receive_name_lost()
            .await
            .map_err(|e| BusError::Subscribe(e.to_string()))?;

        debug!("Subscribed to NameLost on {}", DBUS_PATH);

        Ok(stream
            .map(|signal| match signal.args() {
                Ok(args) => args.name().to_string(),
                Err(e) => {
                    debug!("NameLost carried unreadable arguments: {}", e);
                    String::new()
                }
            })
            .boxed())
    }
}
