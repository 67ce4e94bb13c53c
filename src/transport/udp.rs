//! UDP binding with bincode framing
//!
//! One datagram carries one bincode-encoded [`Message`]. The socket binds
//! to the port of the configured endpoint URI; a background task decodes
//! inbound datagrams and forwards them on the returned channel, dropping
//! anything that does not parse.

use crate::error::{Error, Result};
use crate::protocol::Message;
use crate::transport::{Transport, INBOUND_QUEUE_LEN};
use async_trait::async_trait;
use log::{debug, trace, warn};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use url::Url;

/// Largest datagram the receiver accepts
const MAX_DATAGRAM: usize = 64 * 1024;

pub struct UdpTransport {
    socket: Arc<UdpSocket>,
    endpoint: Url,
}

impl UdpTransport {
    /// Bind the port named by `endpoint` and start receiving
    ///
    /// Returns the transport and the channel carrying decoded inbound
    /// messages.
    pub async fn bind(endpoint: Url) -> Result<(Arc<Self>, mpsc::Receiver<Message>)> {
        let port = endpoint
            .port()
            .ok_or_else(|| Error::InvalidEndpoint(format!("no port in {}", endpoint)))?;
        let socket = Arc::new(
            UdpSocket::bind(("0.0.0.0", port))
                .await
                .map_err(|e| Error::Transport(format!("failed to bind port {}: {}", port, e)))?,
        );

        let (inbound, receiver) = mpsc::channel(INBOUND_QUEUE_LEN);
        let recv_socket = socket.clone();
        tokio::spawn(async move {
            let mut buffer = vec![0u8; MAX_DATAGRAM];
            loop {
                match recv_socket.recv_from(&mut buffer).await {
                    Ok((len, from)) => match Message::from_wire(&buffer[..len]) {
                        Ok(message) => {
                            trace!("{} bytes ({}) from {}", len, message.kind_name(), from);
                            if inbound.send(message).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => debug!("undecodable datagram from {}: {}", from, e),
                    },
                    Err(e) => {
                        warn!("receive error: {}", e);
                    }
                }
            }
        });

        Ok((Arc::new(UdpTransport { socket, endpoint }), receiver))
    }
}

/// Socket address named by an endpoint URI
async fn resolve(endpoint: &Url) -> Result<SocketAddr> {
    let host = endpoint
        .host_str()
        .ok_or_else(|| Error::InvalidEndpoint(format!("no host in {}", endpoint)))?;
    let port = endpoint
        .port()
        .ok_or_else(|| Error::InvalidEndpoint(format!("no port in {}", endpoint)))?;
    tokio::net::lookup_host((host, port))
        .await
        .map_err(|e| Error::InvalidEndpoint(format!("unresolvable endpoint {}: {}", endpoint, e)))?
        .next()
        .ok_or_else(|| Error::InvalidEndpoint(format!("unresolvable endpoint {}", endpoint)))
}

#[async_trait]
impl Transport for UdpTransport {
    fn local_endpoint(&self) -> &Url {
        &self.endpoint
    }

    async fn send(&self, to: &Url, message: &Message) -> Result<()> {
        let address = resolve(to).await?;
        let bytes = message.to_wire()?;
        self.socket
            .send_to(&bytes, address)
            .await
            .map_err(|e| Error::Transport(format!("send to {} failed: {}", to, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_resolve_endpoint() {
        let endpoint: Url = "udp://127.0.0.1:9001/kademlia".parse().unwrap();
        assert_eq!(
            resolve(&endpoint).await.unwrap(),
            "127.0.0.1:9001".parse().unwrap()
        );

        let no_port: Url = "udp://127.0.0.1/kademlia".parse().unwrap();
        assert!(resolve(&no_port).await.is_err());
    }
}
