use std::{future::Future, pin::Pin, time::Duration};

use log::{info, warn};
use thiserror::Error;
use tonic::transport::{Channel, ClientTlsConfig, Endpoint};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Closed,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("InvalidAddress {address}: {source}")]
    InvalidAddress {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("Timed out after {timeout:?} waiting for {address} to become ready")]
    Timeout { address: String, timeout: Duration },
    #[error("TransportError connecting to {address}: {source}")]
    Transport {
        address: String,
        #[source]
        source: tonic::transport::Error,
    },
    #[error("Channel already closed")]
    Closed,
}

/// Prefixes a bare `host:port` with `http://`. Addresses with a scheme are kept as-is.
pub fn normalize_address(address: &str) -> String {
    if address.starts_with("http://") || address.starts_with("https://") {
        address.to_string()
    } else {
        format!("http://{address}")
    }
}

pub fn create_endpoint(address: &str) -> Result<Endpoint, ConnectionError> {
    let url = normalize_address(address);
    let invalid = |source| ConnectionError::InvalidAddress {
        address: url.clone(),
        source,
    };
    let mut endpoint = Endpoint::from_shared(url.clone()).map_err(invalid)?;
    if url.starts_with("https") {
        endpoint = endpoint
            .tls_config(ClientTlsConfig::new())
            .map_err(invalid)?;
    }
    Ok(endpoint)
}

pub type ConnectFuture =
    Pin<Box<dyn Future<Output = Result<Channel, tonic::transport::Error>> + Send>>;

fn connect_endpoint(endpoint: Endpoint) -> ConnectFuture {
    Box::pin(async move { endpoint.connect().await })
}

/// Owns the transport handle to the payment service.
///
/// A manager makes a single bounded connection attempt per [`ChannelManager::connect`] call and
/// never reconnects on its own. Once closed it stays closed.
#[derive(Debug)]
pub struct ChannelManager {
    address: String,
    state: ConnectionState,
    channel: Option<Channel>,
    connector: fn(Endpoint) -> ConnectFuture,
}

impl ChannelManager {
    pub fn new(address: impl Into<String>) -> Self {
        Self::with_connector(address, connect_endpoint)
    }

    pub fn with_connector(
        address: impl Into<String>,
        connector: fn(Endpoint) -> ConnectFuture,
    ) -> Self {
        Self {
            address: address.into(),
            state: ConnectionState::Disconnected,
            channel: None,
            connector,
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns a handle to the underlying channel, only while connected.
    pub fn channel(&self) -> Option<Channel> {
        match self.state {
            ConnectionState::Connected => self.channel.clone(),
            _ => None,
        }
    }

    /// Waits at most `timeout` for the channel to become ready.
    /// On failure the manager is left `Disconnected` and no RPC may be issued.
    pub async fn connect(&mut self, timeout: Duration) -> Result<(), ConnectionError> {
        match self.state {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => return Err(ConnectionError::Closed),
            ConnectionState::Disconnected | ConnectionState::Connecting => {}
        }

        self.state = ConnectionState::Connecting;
        match self.try_connect(timeout).await {
            Ok(channel) => {
                self.channel = Some(channel);
                self.state = ConnectionState::Connected;
                info!("Connected to payment service at {}", self.address);
                Ok(())
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                warn!("Failed to connect to payment service. Error: {e}");
                Err(e)
            }
        }
    }

    async fn try_connect(&self, timeout: Duration) -> Result<Channel, ConnectionError> {
        let endpoint = create_endpoint(&self.address)?;
        match tokio::time::timeout(timeout, (self.connector)(endpoint)).await {
            Ok(Ok(channel)) => Ok(channel),
            Ok(Err(source)) => Err(ConnectionError::Transport {
                address: self.address.clone(),
                source,
            }),
            Err(_) => Err(ConnectionError::Timeout {
                address: self.address.clone(),
                timeout,
            }),
        }
    }

    /// Releases the transport handle. Calling it again after the first close does nothing.
    pub fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.channel = None;
        self.state = ConnectionState::Closed;
        info!("Disconnected from payment service at {}", self.address);
    }
}
