use crate::config::Settings;
use crate::core::Blockchain;
use crate::error::{BlockchainError, Result};
use crate::network::channel::Channel;
use crate::network::client::Client;
use crate::network::peer::Peer;
use log::{error, info, warn};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Full node listening for inbound peers
pub struct Server {
    client: Client,
    listener: TcpListener,
    local_addr: SocketAddr,
    // Inbound sessions, closed on shutdown
    sessions: Mutex<Vec<Arc<Peer>>>,
    shutdown: CancellationToken,
}

impl Server {
    /// Binds the listen address. An empty advertised address becomes the
    /// bound one, so port 0 works for tests.
    pub async fn bind(settings: &Settings, ledger: Blockchain) -> Result<Server> {
        let listener = TcpListener::bind(&settings.listen_address)
            .await
            .map_err(|e| {
                BlockchainError::Connection(format!(
                    "Failed to bind to {}: {e}",
                    settings.listen_address
                ))
            })?;
        let local_addr = listener.local_addr()?;
        let advertised = settings.advertised(local_addr);
        info!("Server listening on {local_addr}, announced as {advertised}");

        Ok(Server {
            client: Client::full_node(ledger, &advertised, settings),
            listener,
            local_addr,
            sessions: Mutex::new(Vec::new()),
            shutdown: CancellationToken::new(),
        })
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn address(&self) -> &str {
        self.client.address()
    }

    /// Number of live inbound sessions
    pub fn session_count(&self) -> usize {
        match self.sessions.lock() {
            Ok(sessions) => sessions.iter().filter(|peer| peer.is_alive()).count(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    /// Accepts connections until `shutdown` is called
    pub async fn run(&self) -> Result<()> {
        loop {
            let accepted = tokio::select! {
                _ = self.shutdown.cancelled() => break,
                accepted = self.listener.accept() => accepted,
            };
            let (stream, remote) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    error!("Error accepting connection: {e}");
                    continue;
                }
            };
            if let Err(e) = stream.set_nodelay(true) {
                warn!("Failed to set TCP_NODELAY for {remote}: {e}");
            }
            info!("Accepted connection from {remote}");

            let peer = Peer::spawn(
                Channel::tcp(stream, remote.to_string()),
                self.client.handler(),
                self.client.request_timeout(),
            );
            let mut sessions = match self.sessions.lock() {
                Ok(sessions) => sessions,
                Err(poisoned) => poisoned.into_inner(),
            };
            sessions.retain(|session| session.is_alive());
            sessions.push(peer);
        }
        info!("Server on {} stopped accepting", self.local_addr);
        Ok(())
    }

    /// Stops accepting, closes inbound sessions, then the outbound ones
    pub async fn shutdown(&self) {
        self.shutdown.cancel();
        let sessions: Vec<Arc<Peer>> = match self.sessions.lock() {
            Ok(mut sessions) => sessions.drain(..).collect(),
            Err(poisoned) => poisoned.into_inner().drain(..).collect(),
        };
        for session in sessions {
            session.close().await;
        }
        self.client.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::channel::{Connector, TcpConnector};
    use crate::network::message::{Request, ResponseBody};
    use crate::storage::SledRepository;
    use std::time::Duration;

    fn settings() -> Settings {
        Settings {
            listen_address: "127.0.0.1:0".to_string(),
            ..Settings::default()
        }
    }

    #[tokio::test]
    async fn test_inbound_session_is_served() {
        let ledger = Blockchain::new(Arc::new(SledRepository::temporary().unwrap()), 0).unwrap();
        let server = Arc::new(Server::bind(&settings(), ledger).await.unwrap());
        let running = tokio::spawn({
            let server = server.clone();
            async move { server.run().await }
        });

        let channel = TcpConnector::new(Duration::from_secs(5))
            .connect(&server.local_addr().to_string())
            .await
            .unwrap();
        let light = Client::light(&settings());
        let peer = Peer::spawn(channel, light.handler(), Duration::from_secs(5));
        let response = peer
            .request(Request::GetServerAddress, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(
            response.body,
            ResponseBody::ServerAddress {
                uri: server.local_addr().to_string()
            }
        );
        assert_eq!(server.session_count(), 1);

        peer.close().await;
        server.shutdown().await;
        running.await.unwrap().unwrap();
    }
}
