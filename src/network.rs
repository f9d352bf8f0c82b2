//! Network association
//!
//! On the microcontroller this joins a wireless network. A Linux host is
//! already attached, so association means the broker host resolves to at
//! least one address.

use async_trait::async_trait;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Failed to resolve {host}: {source}")]
    Resolve {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("{host} resolved to no addresses")]
    NoAddress { host: String },
}

/// Link to the network the broker is reachable on
#[async_trait]
pub trait NetworkLink: Send {
    /// One association attempt; the caller owns the retry policy
    async fn associate(&mut self) -> Result<(), NetworkError>;

    fn is_associated(&self) -> bool;
}

/// Treats successful DNS resolution of the broker as association
#[derive(Debug, Clone)]
pub struct ResolverNetwork {
    host: String,
    port: u16,
    associated: bool,
}

impl ResolverNetwork {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            associated: false,
        }
    }
}

#[async_trait]
impl NetworkLink for ResolverNetwork {
    async fn associate(&mut self) -> Result<(), NetworkError> {
        let mut addrs = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|source| {
                self.associated = false;
                NetworkError::Resolve {
                    host: self.host.clone(),
                    source,
                }
            })?;

        match addrs.next() {
            Some(addr) => {
                debug!(host = %self.host, %addr, "Broker host resolved");
                self.associated = true;
                Ok(())
            }
            None => {
                self.associated = false;
                Err(NetworkError::NoAddress {
                    host: self.host.clone(),
                })
            }
        }
    }

    fn is_associated(&self) -> bool {
        self.associated
    }
}
