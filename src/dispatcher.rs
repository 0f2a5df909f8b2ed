//! The DHCP protocol state machine.
//!
//! [`Dispatcher::handle_datagram`] takes one raw datagram and returns the
//! reply to send, if any. It performs no I/O: decoding and encoding go
//! through [`Message`] and [`Options`], and the only shared state it
//! touches is the [`LeasePool`].
//!
//! | Incoming | Outgoing |
//! |---|---|
//! | DISCOVER | OFFER, or nothing when the pool is exhausted |
//! | REQUEST | ACK, NAK, or nothing when addressed to another server |
//! | DECLINE, RELEASE | nothing |
//! | INFORM | ACK without an address |
//! | OFFER, ACK, NAK | [`Error::UnexpectedMessageType`] |

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::lease::{HardwareAddr, LeasePool};
use crate::message::{BOOTREQUEST, Message};
use crate::options::{MessageType, Options};

/// UDP port DHCP servers and relay agents listen on.
pub const DHCP_SERVER_PORT: u16 = 67;

/// Where a reply should be sent, relative to the request's source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplyDestination {
    /// Back to the relay agent at `giaddr`, on the server port.
    Relay(Ipv4Addr),
    /// To the limited broadcast address.
    Broadcast,
    /// To the client's configured address (`ciaddr`).
    Unicast(Ipv4Addr),
    /// Back to wherever the request came from.
    Source,
}

impl ReplyDestination {
    /// Picks the destination for a reply to `request` (RFC 2131 §4.1).
    pub fn for_reply(request: &Message, message_type: MessageType) -> Self {
        if !request.giaddr().is_unspecified() {
            Self::Relay(request.giaddr())
        } else if message_type == MessageType::Nak || request.is_broadcast() {
            Self::Broadcast
        } else if !request.ciaddr().is_unspecified() {
            Self::Unicast(request.ciaddr())
        } else {
            Self::Source
        }
    }

    /// Resolves to a socket address given the request's source.
    ///
    /// Broadcast replies keep the source port. A source of `0.0.0.0` (a
    /// client with no address yet) is also answered by broadcast.
    pub fn resolve(&self, source: SocketAddr) -> SocketAddr {
        let broadcast = SocketAddr::new(IpAddr::V4(Ipv4Addr::BROADCAST), source.port());
        match *self {
            Self::Relay(giaddr) => SocketAddr::new(IpAddr::V4(giaddr), DHCP_SERVER_PORT),
            Self::Broadcast => broadcast,
            Self::Unicast(ciaddr) => SocketAddr::new(IpAddr::V4(ciaddr), source.port()),
            Self::Source if source.ip().is_unspecified() => broadcast,
            Self::Source => source,
        }
    }
}

/// A reply ready for the transport.
#[derive(Debug, Clone)]
pub struct Reply {
    pub message_type: MessageType,
    pub message: Message,
    /// `message` encoded for the wire.
    pub payload: Vec<u8>,
    pub destination: ReplyDestination,
}

impl Reply {
    fn new(request: &Message, message_type: MessageType, message: Message) -> Self {
        Self {
            message_type,
            payload: message.encode(),
            message,
            destination: ReplyDestination::for_reply(request, message_type),
        }
    }
}

/// Maps each request to a lease pool operation and a reply.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    config: Arc<Config>,
    pool: Arc<LeasePool>,
}

impl Dispatcher {
    pub fn new(config: Arc<Config>, pool: Arc<LeasePool>) -> Self {
        Self { config, pool }
    }

    /// Builds a dispatcher with a fresh pool for `config`.
    pub fn from_config(config: Config) -> Result<Self> {
        let pool = LeasePool::from_config(&config)?;
        Ok(Self::new(Arc::new(config), Arc::new(pool)))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn pool(&self) -> &Arc<LeasePool> {
        &self.pool
    }

    /// Processes one datagram.
    ///
    /// Returns `Ok(None)` when the protocol calls for silence.
    ///
    /// # Errors
    ///
    /// - [`Error::Decode`] for malformed datagrams
    /// - [`Error::NotBootRequest`] for anything but BOOTREQUEST
    /// - [`Error::NotDhcp`] for plain BOOTP (no magic cookie)
    /// - [`Error::MissingOption`] / [`Error::InvalidSize`] for a missing or
    ///   malformed message type
    /// - [`Error::MissingHardwareAddress`] for DISCOVER, REQUEST, DECLINE
    ///   and RELEASE without a client hardware address
    /// - [`Error::UnexpectedMessageType`] for OFFER, ACK and NAK
    pub async fn handle_datagram(&self, data: &[u8]) -> Result<Option<Reply>> {
        let request = Message::decode(data)?;

        if request.op() != BOOTREQUEST {
            return Err(Error::NotBootRequest(request.op()));
        }

        if !request.is_dhcp() {
            return Err(Error::NotDhcp);
        }

        let options = request.options()?;
        let message_type = options.message_type()?;
        let client = request.hardware_addr();

        info!("{} from {}", message_type, client);

        if client.is_unset()
            && matches!(
                message_type,
                MessageType::Discover
                    | MessageType::Request
                    | MessageType::Decline
                    | MessageType::Release
            )
        {
            return Err(Error::MissingHardwareAddress(message_type));
        }

        match message_type {
            MessageType::Discover => self.handle_discover(&request, &options, client).await,
            MessageType::Request => self.handle_request(&request, &options, client).await,
            MessageType::Decline => self.handle_decline(client).await,
            MessageType::Release => self.handle_release(client).await,
            MessageType::Inform => Ok(Some(self.handle_inform(&request, &options, client))),
            MessageType::Offer | MessageType::Ack | MessageType::Nak => {
                Err(Error::UnexpectedMessageType(message_type))
            }
        }
    }

    async fn handle_discover(
        &self,
        request: &Message,
        options: &Options,
        client: HardwareAddr,
    ) -> Result<Option<Reply>> {
        let lease = match self.pool.get_lease(&client).await {
            Ok(lease) => lease,
            Err(Error::PoolExhausted) => {
                warn!("Pool exhausted, cannot offer IP to {}", client);
                return Ok(None);
            }
            Err(error) => return Err(error),
        };

        let reply_options = self.lease_options(MessageType::Offer, options);
        let offer = Message::build_reply(request, &lease, &reply_options);

        info!("OFFER {} to {}", lease.ip, client);

        Ok(Some(Reply::new(request, MessageType::Offer, offer)))
    }

    async fn handle_request(
        &self,
        request: &Message,
        options: &Options,
        client: HardwareAddr,
    ) -> Result<Option<Reply>> {
        if let Some(server_id) = options.server_identifier()
            && server_id != self.config.server_ip
        {
            info!("REQUEST from {} is for different server {}", client, server_id);
            if let Some(ip) = self.pool.withdraw_offer(&client).await {
                info!("Withdrew OFFER {} from {}", ip, client);
            }
            return Ok(None);
        }

        let ciaddr = request.ciaddr();
        let requested = options
            .requested_ip()
            .or((!ciaddr.is_unspecified()).then_some(ciaddr));

        let Some(requested) = requested else {
            return Ok(Some(self.nak(request, client, "No IP address in REQUEST")));
        };

        let lease = match self.pool.confirm(&client, requested).await {
            Ok(lease) => lease,
            Err(Error::LeaseMismatch { .. }) => {
                let reason = format!("{} is not leased to this client", requested);
                return Ok(Some(self.nak(request, client, &reason)));
            }
            Err(error) => return Err(error),
        };

        let reply_options = self.lease_options(MessageType::Ack, options);
        let ack = Message::build_reply(request, &lease, &reply_options);

        info!(
            "ACK {} to {} (lease: {} seconds)",
            lease.ip,
            client,
            lease.duration.as_secs()
        );

        Ok(Some(Reply::new(request, MessageType::Ack, ack)))
    }

    async fn handle_decline(&self, client: HardwareAddr) -> Result<Option<Reply>> {
        match self.pool.decline(&client).await {
            Ok(ip) => warn!("DECLINE from {} for {} - marked IP as unavailable", client, ip),
            Err(Error::NotFound(_)) => warn!("DECLINE from {} with no lease on record", client),
            Err(error) => return Err(error),
        }
        Ok(None)
    }

    async fn handle_release(&self, client: HardwareAddr) -> Result<Option<Reply>> {
        match self.pool.release(&client).await {
            Ok(ip) => info!("RELEASE from {} for {}", client, ip),
            Err(Error::NotFound(_)) => warn!("RELEASE from {} with no lease on record", client),
            Err(error) => return Err(error),
        }
        Ok(None)
    }

    fn handle_inform(&self, request: &Message, options: &Options, client: HardwareAddr) -> Reply {
        let mut reply_options = self.config_options();
        reply_options.retain_requested(options.parameter_request_list());
        reply_options.set_message_type(MessageType::Ack);
        reply_options.set_server_identifier(self.config.server_ip);

        let ack = Message::build_reply_with_address(request, Ipv4Addr::UNSPECIFIED, &reply_options);

        info!("INFORM response to {}", client);

        Reply::new(request, MessageType::Ack, ack)
    }

    fn nak(&self, request: &Message, client: HardwareAddr, reason: &str) -> Reply {
        let mut options = Options::new();
        options.set_message_type(MessageType::Nak);
        options.set_server_identifier(self.config.server_ip);

        let nak = Message::build_reply_with_address(request, Ipv4Addr::UNSPECIFIED, &options);

        warn!("NAK to {}: {}", client, reason);

        Reply::new(request, MessageType::Nak, nak)
    }

    /// Options for OFFER and ACK: configuration filtered by the client's
    /// parameter request list, plus the lease timers.
    fn lease_options(&self, message_type: MessageType, request_options: &Options) -> Options {
        let mut options = self.config_options();
        options.retain_requested(request_options.parameter_request_list());
        options.set_message_type(message_type);
        options.set_server_identifier(self.config.server_ip);
        options.set_lease_duration(self.config.lease_duration());
        options.set_renewal_time(self.config.renewal_time());
        options.set_rebinding_time(self.config.rebinding_time());
        options
    }

    fn config_options(&self) -> Options {
        let mut options = Options::new();
        options.set_subnet_mask(self.config.subnet_mask);

        if let Some(gateway) = self.config.gateway {
            options.set_routers(&[gateway]);
        }

        if !self.config.dns_servers.is_empty() {
            options.set_dns_servers(&self.config.dns_servers);
        }

        if let Some(ref domain) = self.config.domain_name {
            options.set_domain_name(domain);
        }

        options.set_broadcast_address(self.config.calculate_broadcast());
        options
    }
}
