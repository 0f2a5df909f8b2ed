//! DHCP options as defined in RFC 2132.
//!
//! DHCP uses options to convey configuration parameters between servers and clients.
//! Each option has a code (1 byte), length (1 byte), and variable-length data,
//! except `Pad` (0) and `End` (255), which are a single byte each.
//!
//! [`Options`] stores the option area as a map from code to raw value bytes.
//! The codec itself is agnostic about option semantics: unknown codes are
//! stored verbatim and re-emitted unchanged. Typed accessors interpret the
//! handful of codes the server acts on.
//!
//! # References
//!
//! - RFC 2132: DHCP Options and BOOTP Vendor Extensions

use std::collections::BTreeMap;
use std::collections::btree_map;
use std::net::Ipv4Addr;
use std::time::Duration;

use crate::error::{DecodeError, Error, Result};

/// Maximum number of bytes an option value can carry (1-byte length field).
pub const MAX_OPTION_LEN: usize = 255;

/// DHCP option codes as defined in RFC 2132.
///
/// Only codes used by this implementation are defined; any other code is
/// carried as raw bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OptionCode {
    /// Padding (no operation). Used for alignment.
    Pad = 0,
    /// Subnet mask (RFC 2132 §3.3).
    SubnetMask = 1,
    /// Router/gateway addresses (RFC 2132 §3.5).
    Router = 3,
    /// DNS server addresses (RFC 2132 §3.8).
    DnsServer = 6,
    /// Client hostname (RFC 2132 §3.14).
    Hostname = 12,
    /// Domain name for DNS resolution (RFC 2132 §3.17).
    DomainName = 15,
    /// Broadcast address (RFC 2132 §5.3).
    BroadcastAddress = 28,
    /// Requested IP address (RFC 2132 §9.1).
    RequestedIpAddress = 50,
    /// IP address lease time in seconds (RFC 2132 §9.2).
    LeaseTime = 51,
    /// Option overload - indicates sname/file fields contain options (RFC 2132 §9.3).
    OptionOverload = 52,
    /// DHCP message type (RFC 2132 §9.6).
    MessageType = 53,
    /// Server identifier (RFC 2132 §9.7).
    ServerIdentifier = 54,
    /// Parameter request list (RFC 2132 §9.8).
    ParameterRequestList = 55,
    /// Renewal time T1 (RFC 2132 §9.11).
    RenewalTime = 58,
    /// Rebinding time T2 (RFC 2132 §9.12).
    RebindingTime = 59,
    /// Client identifier (RFC 2132 §9.14).
    ClientIdentifier = 61,
    /// End of options marker.
    End = 255,
}

/// DHCP message types (Option 53) as defined in RFC 2132 §9.6.
///
/// These values indicate the purpose of a DHCP message in the protocol exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    /// Client broadcast to locate servers.
    Discover = 1,
    /// Server response to DISCOVER with IP offer.
    Offer = 2,
    /// Client request for offered parameters.
    Request = 3,
    /// Client indicates address is already in use.
    Decline = 4,
    /// Server acknowledgement with configuration.
    Ack = 5,
    /// Server negative acknowledgement.
    Nak = 6,
    /// Client releases IP address.
    Release = 7,
    /// Client requests config without IP allocation.
    Inform = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::Discover),
            2 => Ok(Self::Offer),
            3 => Ok(Self::Request),
            4 => Ok(Self::Decline),
            5 => Ok(Self::Ack),
            6 => Ok(Self::Nak),
            7 => Ok(Self::Release),
            8 => Ok(Self::Inform),
            other => Err(other),
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Discover => write!(f, "DISCOVER"),
            Self::Offer => write!(f, "OFFER"),
            Self::Request => write!(f, "REQUEST"),
            Self::Decline => write!(f, "DECLINE"),
            Self::Ack => write!(f, "ACK"),
            Self::Nak => write!(f, "NAK"),
            Self::Release => write!(f, "RELEASE"),
            Self::Inform => write!(f, "INFORM"),
        }
    }
}

/// Option overload flags (Option 52) as defined in RFC 2132 §9.3.
///
/// Indicates that the `sname` and/or `file` fields in the DHCP packet
/// header contain DHCP options instead of their normal content.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OverloadFlag {
    /// The `file` field contains options.
    File = 1,
    /// The `sname` field contains options.
    Sname = 2,
    /// Both `file` and `sname` fields contain options.
    Both = 3,
}

impl TryFrom<u8> for OverloadFlag {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            1 => Ok(Self::File),
            2 => Ok(Self::Sname),
            3 => Ok(Self::Both),
            other => Err(other),
        }
    }
}

impl OverloadFlag {
    pub fn covers_file(self) -> bool {
        matches!(self, Self::File | Self::Both)
    }

    pub fn covers_sname(self) -> bool {
        matches!(self, Self::Sname | Self::Both)
    }
}

/// The option area of a DHCP message: option code to raw value bytes.
///
/// Keys are unique and never `Pad` or `End`; values never exceed
/// [`MAX_OPTION_LEN`] bytes. Both rules are enforced on insertion, so
/// [`encode`](Self::encode) cannot fail. Entries are kept in ascending code
/// order, which makes the wire output deterministic.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Options {
    entries: BTreeMap<u8, Vec<u8>>,
}

impl Options {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses a TLV option area.
    ///
    /// `Pad` bytes are skipped, `End` stops the scan (anything after it is
    /// ignored), every other code is read as `[code, len, value...]`. When a
    /// code repeats, the first occurrence is kept.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::TruncatedOptions`] if a length byte or the
    /// declared value runs past the end of `data`.
    pub fn decode(data: &[u8]) -> std::result::Result<Self, DecodeError> {
        let mut entries = BTreeMap::new();
        let mut index = 0;

        while index < data.len() {
            let code = data[index];

            if code == OptionCode::Pad as u8 {
                index += 1;
                continue;
            }

            if code == OptionCode::End as u8 {
                break;
            }

            let Some(&length) = data.get(index + 1) else {
                return Err(DecodeError::TruncatedOptions);
            };
            let start = index + 2;
            let end = start + length as usize;
            let Some(value) = data.get(start..end) else {
                return Err(DecodeError::TruncatedOptions);
            };

            entries.entry(code).or_insert_with(|| value.to_vec());
            index = end;
        }

        Ok(Self { entries })
    }

    /// Encodes the options as `[code, len, value...]` in ascending code
    /// order, followed by a single `End` byte. No padding is added.
    pub fn encode(&self) -> Vec<u8> {
        let size = self
            .entries
            .values()
            .map(|value| 2 + value.len())
            .sum::<usize>()
            + 1;
        let mut result = Vec::with_capacity(size);

        for (code, value) in &self.entries {
            result.push(*code);
            result.push(value.len() as u8);
            result.extend_from_slice(value);
        }

        result.push(OptionCode::End as u8);
        result
    }

    /// Stores a raw option value, replacing any previous value for `code`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidOption`] for `Pad`/`End` or for values longer
    /// than 255 bytes.
    pub fn insert(&mut self, code: u8, value: impl Into<Vec<u8>>) -> Result<()> {
        let value = value.into();
        if code == OptionCode::Pad as u8 || code == OptionCode::End as u8 {
            return Err(Error::InvalidOption(format!(
                "code {} is a structural marker",
                code
            )));
        }
        if value.len() > MAX_OPTION_LEN {
            return Err(Error::InvalidOption(format!(
                "option {} value is {} bytes (maximum {})",
                code,
                value.len(),
                MAX_OPTION_LEN
            )));
        }
        self.entries.insert(code, value);
        Ok(())
    }

    /// Stores a value whose length is known to fit, for the typed setters.
    fn put(&mut self, code: OptionCode, value: Vec<u8>) {
        debug_assert!(value.len() <= MAX_OPTION_LEN);
        self.entries.insert(code as u8, value);
    }

    pub fn get(&self, code: u8) -> Option<&[u8]> {
        self.entries.get(&code).map(Vec::as_slice)
    }

    pub fn remove(&mut self, code: u8) -> Option<Vec<u8>> {
        self.entries.remove(&code)
    }

    pub fn contains(&self, code: u8) -> bool {
        self.entries.contains_key(&code)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (u8, &[u8])> {
        self.entries
            .iter()
            .map(|(code, value)| (*code, value.as_slice()))
    }

    /// Adds every entry of `other` whose code is not already present.
    pub fn merge_missing(&mut self, other: Options) {
        for (code, value) in other.entries {
            if let btree_map::Entry::Vacant(slot) = self.entries.entry(code) {
                slot.insert(value);
            }
        }
    }

    /// Returns the DHCP message type (Option 53).
    ///
    /// # Errors
    ///
    /// - [`Error::MissingOption`] if the option is absent (plain BOOTP)
    /// - [`Error::InvalidSize`] if the value is not exactly one byte
    /// - [`DecodeError::InvalidMessageType`] if the value is outside 1..=8
    pub fn message_type(&self) -> Result<MessageType> {
        let code = OptionCode::MessageType as u8;
        let data = self.get(code).ok_or(Error::MissingOption(code))?;
        if data.len() != 1 {
            return Err(Error::InvalidSize {
                code,
                expected: 1,
                actual: data.len(),
            });
        }
        MessageType::try_from(data[0])
            .map_err(|value| Error::Decode(DecodeError::InvalidMessageType(value)))
    }

    pub fn set_message_type(&mut self, message_type: MessageType) {
        self.put(OptionCode::MessageType, vec![message_type as u8]);
    }

    /// Sets the lease time (Option 51) as big-endian seconds.
    ///
    /// Durations beyond `u32::MAX` seconds saturate, which RFC 2132 reads
    /// as an infinite lease.
    pub fn set_lease_duration(&mut self, duration: Duration) {
        self.put(OptionCode::LeaseTime, saturating_seconds(duration).to_be_bytes().to_vec());
    }

    pub fn set_server_identifier(&mut self, server: Ipv4Addr) {
        self.put(OptionCode::ServerIdentifier, server.octets().to_vec());
    }

    pub fn set_renewal_time(&mut self, duration: Duration) {
        self.put(OptionCode::RenewalTime, saturating_seconds(duration).to_be_bytes().to_vec());
    }

    pub fn set_rebinding_time(&mut self, duration: Duration) {
        self.put(
            OptionCode::RebindingTime,
            saturating_seconds(duration).to_be_bytes().to_vec(),
        );
    }

    pub fn set_subnet_mask(&mut self, mask: Ipv4Addr) {
        self.put(OptionCode::SubnetMask, mask.octets().to_vec());
    }

    pub fn set_broadcast_address(&mut self, address: Ipv4Addr) {
        self.put(OptionCode::BroadcastAddress, address.octets().to_vec());
    }

    /// Sets the router list (Option 3). At most 63 addresses fit in one option.
    pub fn set_routers(&mut self, routers: &[Ipv4Addr]) {
        self.put(OptionCode::Router, encode_addresses(routers));
    }

    /// Sets the DNS server list (Option 6). At most 63 addresses fit in one option.
    pub fn set_dns_servers(&mut self, servers: &[Ipv4Addr]) {
        self.put(OptionCode::DnsServer, encode_addresses(servers));
    }

    /// Sets the domain name (Option 15), truncated to 255 bytes.
    pub fn set_domain_name(&mut self, domain: &str) {
        let bytes = domain.as_bytes();
        let len = bytes.len().min(MAX_OPTION_LEN);
        self.put(OptionCode::DomainName, bytes[..len].to_vec());
    }

    /// Returns the requested IP address (Option 50) if present and well-formed.
    ///
    /// Clients include this in DISCOVER to request a specific IP,
    /// and in REQUEST to confirm the offered IP.
    pub fn requested_ip(&self) -> Option<Ipv4Addr> {
        self.address(OptionCode::RequestedIpAddress)
    }

    /// Returns the server identifier (Option 54) if present and well-formed.
    ///
    /// Clients include this in REQUEST to indicate which server's
    /// offer they are accepting.
    pub fn server_identifier(&self) -> Option<Ipv4Addr> {
        self.address(OptionCode::ServerIdentifier)
    }

    pub fn lease_time(&self) -> Option<Duration> {
        self.seconds(OptionCode::LeaseTime)
    }

    pub fn renewal_time(&self) -> Option<Duration> {
        self.seconds(OptionCode::RenewalTime)
    }

    pub fn rebinding_time(&self) -> Option<Duration> {
        self.seconds(OptionCode::RebindingTime)
    }

    /// Returns the parameter request list (Option 55) if present.
    ///
    /// This is a list of option codes the client wants in the response.
    pub fn parameter_request_list(&self) -> Option<&[u8]> {
        self.get(OptionCode::ParameterRequestList as u8)
    }

    /// Returns the client hostname (Option 12), lossily decoded.
    pub fn hostname(&self) -> Option<String> {
        self.get(OptionCode::Hostname as u8)
            .map(|data| String::from_utf8_lossy(data).into_owned())
    }

    /// Returns the overload flag (Option 52) if present and valid.
    pub fn overload(&self) -> Option<OverloadFlag> {
        match self.get(OptionCode::OptionOverload as u8) {
            Some([flag]) => OverloadFlag::try_from(*flag).ok(),
            _ => None,
        }
    }

    /// Drops every option the client did not ask for.
    ///
    /// Message type, server identifier and the lease timers are always
    /// kept. Without a parameter request list nothing is removed.
    pub fn retain_requested(&mut self, parameter_request_list: Option<&[u8]>) {
        let Some(prl) = parameter_request_list else {
            return;
        };

        self.entries
            .retain(|code, _| matches!(*code, 51 | 53 | 54 | 58 | 59) || prl.contains(code));
    }

    fn address(&self, code: OptionCode) -> Option<Ipv4Addr> {
        match self.get(code as u8) {
            Some(&[a, b, c, d]) => Some(Ipv4Addr::new(a, b, c, d)),
            _ => None,
        }
    }

    fn seconds(&self, code: OptionCode) -> Option<Duration> {
        match self.get(code as u8) {
            Some(&[a, b, c, d]) => Some(Duration::from_secs(
                u32::from_be_bytes([a, b, c, d]) as u64,
            )),
            _ => None,
        }
    }
}

impl<'a> IntoIterator for &'a Options {
    type Item = (&'a u8, &'a Vec<u8>);
    type IntoIter = btree_map::Iter<'a, u8, Vec<u8>>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

fn saturating_seconds(duration: Duration) -> u32 {
    u32::try_from(duration.as_secs()).unwrap_or(u32::MAX)
}

/// Maximum number of IPv4 addresses in a single option.
///
/// Options have a 1-byte length field, so maximum data is 255 bytes.
/// With 4 bytes per IPv4 address, that's 63 addresses maximum.
const MAX_ADDRESSES_PER_OPTION: usize = 63;

fn encode_addresses(addrs: &[Ipv4Addr]) -> Vec<u8> {
    addrs
        .iter()
        .take(MAX_ADDRESSES_PER_OPTION)
        .flat_map(|addr| addr.octets())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_type_conversions() {
        for value in 1..=8u8 {
            let msg_type = MessageType::try_from(value).unwrap();
            assert_eq!(msg_type as u8, value);
        }
        assert!(MessageType::try_from(0).is_err());
        assert!(MessageType::try_from(9).is_err());
    }

    #[test]
    fn test_message_type_display() {
        assert_eq!(format!("{}", MessageType::Discover), "DISCOVER");
        assert_eq!(format!("{}", MessageType::Offer), "OFFER");
        assert_eq!(format!("{}", MessageType::Request), "REQUEST");
        assert_eq!(format!("{}", MessageType::Decline), "DECLINE");
        assert_eq!(format!("{}", MessageType::Ack), "ACK");
        assert_eq!(format!("{}", MessageType::Nak), "NAK");
        assert_eq!(format!("{}", MessageType::Release), "RELEASE");
        assert_eq!(format!("{}", MessageType::Inform), "INFORM");
    }

    #[test]
    fn test_decode_skips_pad_and_stops_at_end() {
        let data = [0, 0, 53, 1, 1, 0, 255, 51, 4, 0, 0];
        let options = Options::decode(&data).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options.message_type().unwrap(), MessageType::Discover);
        assert!(!options.contains(OptionCode::LeaseTime as u8));
    }

    #[test]
    fn test_decode_without_end_marker() {
        let data = [53, 1, 3, 50, 4, 10, 0, 0, 7];
        let options = Options::decode(&data).unwrap();
        assert_eq!(options.message_type().unwrap(), MessageType::Request);
        assert_eq!(options.requested_ip(), Some(Ipv4Addr::new(10, 0, 0, 7)));
    }

    #[test]
    fn test_truncated_length_byte() {
        assert_eq!(Options::decode(&[51]), Err(DecodeError::TruncatedOptions));
    }

    #[test]
    fn test_truncated_value() {
        assert_eq!(
            Options::decode(&[51, 4, 0, 0]),
            Err(DecodeError::TruncatedOptions)
        );
    }

    #[test]
    fn test_unknown_option_preserved() {
        let options = Options::decode(&[200, 4, 0xde, 0xad, 0xbe, 0xef, 255]).unwrap();
        assert_eq!(options.get(200), Some(&[0xde, 0xad, 0xbe, 0xef][..]));

        let encoded = options.encode();
        assert_eq!(encoded, vec![200, 4, 0xde, 0xad, 0xbe, 0xef, 255]);
    }

    #[test]
    fn test_zero_length_option() {
        let options = Options::decode(&[55, 0, 255]).unwrap();
        assert_eq!(options.parameter_request_list(), Some(&[][..]));
    }

    #[test]
    fn test_duplicate_code_keeps_first() {
        let options = Options::decode(&[53, 1, 1, 53, 1, 3, 255]).unwrap();
        assert_eq!(options.len(), 1);
        assert_eq!(options.message_type().unwrap(), MessageType::Discover);
    }

    #[test]
    fn test_encode_is_sorted_and_terminated() {
        let mut options = Options::new();
        options.set_server_identifier(Ipv4Addr::new(10, 0, 0, 1));
        options.set_message_type(MessageType::Offer);
        options.set_lease_duration(Duration::from_secs(3600));

        let encoded = options.encode();
        assert_eq!(
            encoded,
            vec![
                51, 4, 0, 0, 0x0e, 0x10, //
                53, 1, 2, //
                54, 4, 10, 0, 0, 1, //
                255,
            ]
        );
    }

    #[test]
    fn test_empty_options_encode_to_end() {
        assert_eq!(Options::new().encode(), vec![255]);
    }

    #[test]
    fn test_message_type_errors() {
        let options = Options::new();
        assert!(matches!(options.message_type(), Err(Error::MissingOption(53))));

        let options = Options::decode(&[53, 2, 1, 1]).unwrap();
        assert!(matches!(
            options.message_type(),
            Err(Error::InvalidSize { code: 53, expected: 1, actual: 2 })
        ));

        let options = Options::decode(&[53, 1, 9]).unwrap();
        assert!(matches!(
            options.message_type(),
            Err(Error::Decode(DecodeError::InvalidMessageType(9)))
        ));
    }

    #[test]
    fn test_insert_rejects_markers_and_long_values() {
        let mut options = Options::new();
        assert!(options.insert(0, vec![1]).is_err());
        assert!(options.insert(255, vec![1]).is_err());
        assert!(options.insert(100, vec![0u8; 256]).is_err());
        assert!(options.insert(100, vec![0u8; 255]).is_ok());
        assert_eq!(options.get(100).map(<[u8]>::len), Some(255));
    }

    #[test]
    fn test_lease_duration_saturates() {
        let mut options = Options::new();
        options.set_lease_duration(Duration::from_secs(u64::MAX));
        assert_eq!(options.get(51), Some(&[0xff, 0xff, 0xff, 0xff][..]));

        options.set_lease_duration(Duration::from_secs(86400));
        assert_eq!(options.lease_time(), Some(Duration::from_secs(86400)));
    }

    #[test]
    fn test_typed_accessors_reject_bad_lengths() {
        let options = Options::decode(&[50, 3, 10, 0, 0, 54, 5, 1, 2, 3, 4, 5]).unwrap();
        assert_eq!(options.requested_ip(), None);
        assert_eq!(options.server_identifier(), None);
    }

    #[test]
    fn test_router_list_capped() {
        let routers: Vec<Ipv4Addr> = (0..100u8).map(|i| Ipv4Addr::new(10, 0, 0, i)).collect();
        let mut options = Options::new();
        options.set_routers(&routers);
        assert_eq!(options.get(3).map(<[u8]>::len), Some(252));
    }

    #[test]
    fn test_retain_requested() {
        let mut options = Options::new();
        options.set_message_type(MessageType::Ack);
        options.set_server_identifier(Ipv4Addr::new(10, 0, 0, 1));
        options.set_lease_duration(Duration::from_secs(60));
        options.set_subnet_mask(Ipv4Addr::new(255, 255, 255, 0));
        options.set_routers(&[Ipv4Addr::new(10, 0, 0, 1)]);
        options.set_dns_servers(&[Ipv4Addr::new(8, 8, 8, 8)]);

        let mut subnet_only = options.clone();
        subnet_only.retain_requested(Some(&[1]));
        assert!(subnet_only.contains(1));
        assert!(subnet_only.contains(53));
        assert!(subnet_only.contains(54));
        assert!(subnet_only.contains(51));
        assert!(!subnet_only.contains(3));
        assert!(!subnet_only.contains(6));

        let mut unfiltered = options.clone();
        unfiltered.retain_requested(None);
        assert_eq!(unfiltered, options);
    }

    #[test]
    fn test_merge_missing_keeps_existing() {
        let mut main = Options::decode(&[12, 4, b'm', b'a', b'i', b'n']).unwrap();
        let overflow = Options::decode(&[12, 4, b'f', b'i', b'l', b'e', 15, 1, b'x']).unwrap();
        main.merge_missing(overflow);
        assert_eq!(main.hostname().as_deref(), Some("main"));
        assert_eq!(main.get(15), Some(&b"x"[..]));
    }

    #[test]
    fn test_overload_flag() {
        let options = Options::decode(&[52, 1, 3]).unwrap();
        let flag = options.overload().unwrap();
        assert!(flag.covers_file());
        assert!(flag.covers_sname());

        let options = Options::decode(&[52, 1, 7]).unwrap();
        assert_eq!(options.overload(), None);
    }
}
