use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::dispatcher::Dispatcher;
use crate::error::{Error, Result};
use crate::lease::LeasePool;

const RECV_BUFFER_SIZE: usize = 1500;

/// UDP transport around a [`Dispatcher`].
///
/// Each datagram is handled on its own task; replies go to
/// [`ReplyDestination::resolve`](crate::ReplyDestination::resolve) of the
/// sender's address. Expired leases are swept on `sweep_interval_seconds`.
pub struct DhcpServer {
    dispatcher: Dispatcher,
    socket: Arc<UdpSocket>,
}

impl DhcpServer {
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;

        let socket = Arc::new(Self::create_socket(&config)?);
        let pool = LeasePool::from_config(&config)?;

        info!(
            "DHCP server starting on {}:{}",
            config.server_ip, config.listen_port
        );
        info!(
            "IP pool: {} - {} ({} addresses)",
            config.pool_start,
            config.pool_end,
            config.pool_size()
        );

        Ok(Self {
            dispatcher: Dispatcher::new(Arc::new(config), Arc::new(pool)),
            socket,
        })
    }

    fn create_socket(config: &Config) -> Result<UdpSocket> {
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))
            .map_err(|error| Error::Socket(format!("Failed to create socket: {}", error)))?;

        socket
            .set_reuse_address(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_REUSEADDR: {}", error)))?;

        socket
            .set_broadcast(true)
            .map_err(|error| Error::Socket(format!("Failed to set SO_BROADCAST: {}", error)))?;

        socket
            .set_nonblocking(true)
            .map_err(|error| Error::Socket(format!("Failed to set non-blocking: {}", error)))?;

        let bind_addr = SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, config.listen_port);
        socket.bind(&bind_addr.into()).map_err(|error| {
            Error::Socket(format!("Failed to bind to {}: {}", bind_addr, error))
        })?;

        let std_socket: std::net::UdpSocket = socket.into();
        let tokio_socket = UdpSocket::from_std(std_socket).map_err(|error| {
            Error::Socket(format!("Failed to convert to tokio socket: {}", error))
        })?;

        Ok(tokio_socket)
    }

    pub async fn run(&self) -> Result<()> {
        let mut buffer = [0u8; RECV_BUFFER_SIZE];
        let mut sweep = tokio::time::interval(self.dispatcher.config().sweep_interval());

        info!("DHCP server ready and listening");

        loop {
            tokio::select! {
                received = self.socket.recv_from(&mut buffer) => match received {
                    Ok((size, source)) => {
                        let data = buffer[..size].to_vec();
                        let dispatcher = self.dispatcher.clone();
                        let socket = Arc::clone(&self.socket);

                        tokio::spawn(async move {
                            handle_datagram(&dispatcher, &socket, &data, source).await;
                        });
                    }
                    Err(error) => {
                        error!("Error receiving packet: {}", error);
                    }
                },
                _ = sweep.tick() => {
                    let reclaimed = self.dispatcher.pool().sweep().await;
                    if reclaimed > 0 {
                        info!("Reclaimed {} expired or declined address(es)", reclaimed);
                    }
                }
            }
        }
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.socket.local_addr()?)
    }

    pub fn config(&self) -> &Config {
        self.dispatcher.config()
    }

    pub fn pool(&self) -> &LeasePool {
        self.dispatcher.pool()
    }
}

async fn handle_datagram(dispatcher: &Dispatcher, socket: &UdpSocket, data: &[u8], source: SocketAddr) {
    match dispatcher.handle_datagram(data).await {
        Ok(Some(reply)) => {
            let destination = reply.destination.resolve(source);
            if let Err(error) = socket.send_to(&reply.payload, destination).await {
                warn!(
                    "Failed to send {} to {}: {}",
                    reply.message_type, destination, error
                );
            } else {
                debug!("Sent {} to {}", reply.message_type, destination);
            }
        }
        Ok(None) => {}
        Err(error) => {
            warn!("Error handling packet from {}: {}", source, error);
        }
    }
}
