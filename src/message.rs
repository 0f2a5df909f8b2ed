//! DHCP message decoding and encoding per RFC 2131.
//!
//! A DHCP message consists of a fixed 236-byte header followed by a 4-byte
//! magic cookie and variable-length options. [`Message::decode`] validates
//! the fixed part once and keeps the option area as raw bytes;
//! [`Message::options`] interprets it on demand.
//!
//! # Message Structure
//!
//! ```text
//! 0                   1                   2                   3
//! 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |     op (1)    |   htype (1)   |   hlen (1)    |   hops (1)    |
//! +---------------+---------------+---------------+---------------+
//! |                            xid (4)                            |
//! +-------------------------------+-------------------------------+
//! |           secs (2)            |           flags (2)           |
//! +-------------------------------+-------------------------------+
//! |                          ciaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          yiaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          siaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          giaddr (4)                           |
//! +---------------------------------------------------------------+
//! |                          chaddr (16)                          |
//! +---------------------------------------------------------------+
//! |                          sname (64)                           |
//! +---------------------------------------------------------------+
//! |                          file (128)                           |
//! +---------------------------------------------------------------+
//! |                    magic cookie (4) = 99.130.83.99            |
//! +---------------------------------------------------------------+
//! |                          options (variable)                   |
//! +---------------------------------------------------------------+
//! ```
//!
//! # References
//!
//! - RFC 2131: Dynamic Host Configuration Protocol

use std::net::Ipv4Addr;

use crate::error::{DecodeError, Result};
use crate::lease::{HardwareAddr, Lease};
use crate::options::{OptionCode, Options};

/// DHCP magic cookie that identifies DHCP messages (vs BOOTP).
pub const DHCP_MAGIC_COOKIE: [u8; 4] = [99, 130, 83, 99];

const DHCP_CIADDR_OFFSET: usize = 12;
const DHCP_YIADDR_OFFSET: usize = 16;
const DHCP_SIADDR_OFFSET: usize = 20;
const DHCP_GIADDR_OFFSET: usize = 24;
const DHCP_CHADDR_OFFSET: usize = 28;

const DHCP_CHADDR_SIZE: usize = 16;
const DHCP_SNAME_SIZE: usize = 64;
const DHCP_FILE_SIZE: usize = 128;

const DHCP_SNAME_OFFSET: usize = DHCP_CHADDR_OFFSET + DHCP_CHADDR_SIZE;
const DHCP_FILE_OFFSET: usize = DHCP_SNAME_OFFSET + DHCP_SNAME_SIZE;
const DHCP_MAGIC_COOKIE_OFFSET: usize = DHCP_FILE_OFFSET + DHCP_FILE_SIZE;

/// Size of the fixed header portion including magic cookie.
pub const DHCP_FIXED_HEADER_SIZE: usize = DHCP_MAGIC_COOKIE_OFFSET + DHCP_MAGIC_COOKIE.len();

/// Minimum encoded message size.
///
/// BOOTP relay agents expect at least 300 bytes, so replies are zero-padded
/// up to this length.
pub const DHCP_MIN_PACKET_SIZE: usize = 300;

/// Initial capacity for the encoding buffer.
///
/// 576 bytes is the minimum MTU that all hosts must accept per RFC 791.
const DHCP_ENCODE_CAPACITY: usize = 576;

/// Maximum hop count before dropping the message.
///
/// Per RFC 2131 §4.1, relay agents increment hops and discard messages
/// with excessive counts.
const MAX_HOPS: u8 = 16;

/// Bit 15 of `flags`.
const BROADCAST_FLAG: u16 = 0x8000;

/// BOOTP/DHCP operation code for client requests.
pub const BOOTREQUEST: u8 = 1;

/// BOOTP/DHCP operation code for server replies.
pub const BOOTREPLY: u8 = 2;

/// Hardware type for Ethernet (most common).
pub const HTYPE_ETHERNET: u8 = 1;

/// Hardware address length for Ethernet (6 bytes).
pub const HLEN_ETHERNET: u8 = 6;

/// A decoded DHCP message.
///
/// Represents both client requests and server replies. Requests come from
/// [`decode`](Self::decode); replies from [`build_reply`](Self::build_reply)
/// followed by the setters. Fields are read through accessors so a decoded
/// request cannot be altered on its way through the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    op: u8,
    htype: u8,
    hlen: u8,
    hops: u8,
    xid: u32,
    secs: u16,
    flags: u16,
    ciaddr: Ipv4Addr,
    yiaddr: Ipv4Addr,
    siaddr: Ipv4Addr,
    giaddr: Ipv4Addr,
    chaddr: [u8; DHCP_CHADDR_SIZE],
    sname: [u8; DHCP_SNAME_SIZE],
    file: [u8; DHCP_FILE_SIZE],
    cookie: [u8; 4],
    options: Vec<u8>,
}

impl Message {
    /// Decodes a message from raw bytes.
    ///
    /// The magic cookie is recorded but not checked here; use
    /// [`is_dhcp`](Self::is_dhcp) to tell DHCP from plain BOOTP.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::BufferTooSmall`] if `data` is shorter than 240 bytes
    /// - [`DecodeError::InvalidHardwareLength`] if `hlen` exceeds 16
    /// - [`DecodeError::TooManyHops`] if `hops` exceeds 16
    pub fn decode(data: &[u8]) -> std::result::Result<Self, DecodeError> {
        if data.len() < DHCP_FIXED_HEADER_SIZE {
            return Err(DecodeError::BufferTooSmall { len: data.len() });
        }

        let op = data[0];
        let htype = data[1];
        let hlen = data[2];
        let hops = data[3];

        if hlen as usize > DHCP_CHADDR_SIZE {
            return Err(DecodeError::InvalidHardwareLength(hlen));
        }

        if hops > MAX_HOPS {
            return Err(DecodeError::TooManyHops(hops));
        }

        let mut chaddr = [0u8; DHCP_CHADDR_SIZE];
        chaddr.copy_from_slice(&data[DHCP_CHADDR_OFFSET..DHCP_SNAME_OFFSET]);

        let mut sname = [0u8; DHCP_SNAME_SIZE];
        sname.copy_from_slice(&data[DHCP_SNAME_OFFSET..DHCP_FILE_OFFSET]);

        let mut file = [0u8; DHCP_FILE_SIZE];
        file.copy_from_slice(&data[DHCP_FILE_OFFSET..DHCP_MAGIC_COOKIE_OFFSET]);

        let mut cookie = [0u8; 4];
        cookie.copy_from_slice(&data[DHCP_MAGIC_COOKIE_OFFSET..DHCP_FIXED_HEADER_SIZE]);

        Ok(Self {
            op,
            htype,
            hlen,
            hops,
            xid: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            secs: u16::from_be_bytes([data[8], data[9]]),
            flags: u16::from_be_bytes([data[10], data[11]]),
            ciaddr: read_addr(data, DHCP_CIADDR_OFFSET),
            yiaddr: read_addr(data, DHCP_YIADDR_OFFSET),
            siaddr: read_addr(data, DHCP_SIADDR_OFFSET),
            giaddr: read_addr(data, DHCP_GIADDR_OFFSET),
            chaddr,
            sname,
            file,
            cookie,
            options: data[DHCP_FIXED_HEADER_SIZE..].to_vec(),
        })
    }

    /// Decodes the option area.
    ///
    /// When Option 52 (overload) is present, options stored in `file`
    /// and/or `sname` are merged in; entries from the main area take
    /// precedence over overflow entries with the same code.
    ///
    /// # Errors
    ///
    /// - [`DecodeError::NoOptions`] if nothing follows the magic cookie
    /// - [`DecodeError::TruncatedOptions`] if any option area is malformed
    pub fn options(&self) -> Result<Options> {
        if self.options.is_empty() {
            return Err(DecodeError::NoOptions.into());
        }

        let mut options = Options::decode(&self.options)?;

        if let Some(flag) = options.overload() {
            if flag.covers_file() {
                options.merge_missing(Options::decode(&self.file)?);
            }
            if flag.covers_sname() {
                options.merge_missing(Options::decode(&self.sname)?);
            }
        }

        Ok(options)
    }

    /// Builds a reply carrying `lease`'s address in `yiaddr`.
    ///
    /// See [`build_reply_with_address`](Self::build_reply_with_address)
    /// for which request fields are echoed.
    pub fn build_reply(request: &Message, lease: &Lease, options: &Options) -> Self {
        Self::build_reply_with_address(request, lease.ip, options)
    }

    /// Builds a reply with an explicit `yiaddr`, for replies that carry no
    /// lease (NAK, or the ACK to an INFORM).
    ///
    /// # Preserved Fields
    ///
    /// The following fields are copied from the request:
    /// - `htype`, `hlen` and `hops`
    /// - `xid` (transaction ID) and `secs`
    /// - `flags` (broadcast flag)
    /// - `ciaddr` and `giaddr` (relay agent address)
    /// - `chaddr` (client hardware address)
    ///
    /// `siaddr`, `sname` and `file` start zeroed.
    pub fn build_reply_with_address(request: &Message, yiaddr: Ipv4Addr, options: &Options) -> Self {
        Self {
            op: BOOTREPLY,
            htype: request.htype,
            hlen: request.hlen,
            hops: request.hops,
            xid: request.xid,
            secs: request.secs,
            flags: request.flags,
            ciaddr: request.ciaddr,
            yiaddr,
            siaddr: Ipv4Addr::UNSPECIFIED,
            giaddr: request.giaddr,
            chaddr: request.chaddr,
            sname: [0u8; DHCP_SNAME_SIZE],
            file: [0u8; DHCP_FILE_SIZE],
            cookie: DHCP_MAGIC_COOKIE,
            options: options.encode(),
        }
    }

    /// Sets `siaddr`, the next server in the boot process.
    pub fn set_server_address(&mut self, address: Ipv4Addr) {
        self.siaddr = address;
    }

    /// Sets `sname`, truncated to 63 bytes so the field stays NUL-terminated.
    pub fn set_server_name(&mut self, name: &str) {
        self.sname = [0u8; DHCP_SNAME_SIZE];
        copy_terminated(&mut self.sname, name.as_bytes());
    }

    /// Sets `file`, truncated to 127 bytes so the field stays NUL-terminated.
    pub fn set_boot_file(&mut self, path: &str) {
        self.file = [0u8; DHCP_FILE_SIZE];
        copy_terminated(&mut self.file, path.as_bytes());
    }

    /// Encodes the message to bytes for transmission.
    ///
    /// The option area always ends with `End`, and the result is zero-padded
    /// to at least 300 bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut packet = Vec::with_capacity(DHCP_ENCODE_CAPACITY.max(
            DHCP_FIXED_HEADER_SIZE + self.options.len() + 1,
        ));

        packet.push(self.op);
        packet.push(self.htype);
        packet.push(self.hlen);
        packet.push(self.hops);

        packet.extend_from_slice(&self.xid.to_be_bytes());
        packet.extend_from_slice(&self.secs.to_be_bytes());
        packet.extend_from_slice(&self.flags.to_be_bytes());

        packet.extend_from_slice(&self.ciaddr.octets());
        packet.extend_from_slice(&self.yiaddr.octets());
        packet.extend_from_slice(&self.siaddr.octets());
        packet.extend_from_slice(&self.giaddr.octets());

        packet.extend_from_slice(&self.chaddr);
        packet.extend_from_slice(&self.sname);
        packet.extend_from_slice(&self.file);

        packet.extend_from_slice(&self.cookie);
        packet.extend_from_slice(&self.options);

        if !is_terminated(&self.options) {
            packet.push(OptionCode::End as u8);
        }

        if packet.len() < DHCP_MIN_PACKET_SIZE {
            packet.resize(DHCP_MIN_PACKET_SIZE, 0);
        }

        packet
    }

    pub fn op(&self) -> u8 {
        self.op
    }

    pub fn htype(&self) -> u8 {
        self.htype
    }

    pub fn hlen(&self) -> u8 {
        self.hlen
    }

    pub fn hops(&self) -> u8 {
        self.hops
    }

    /// Transaction ID chosen by the client, echoed in replies.
    pub fn xid(&self) -> u32 {
        self.xid
    }

    pub fn secs(&self) -> u16 {
        self.secs
    }

    pub fn flags(&self) -> u16 {
        self.flags
    }

    /// Client IP address (set by client in BOUND/RENEWING/REBINDING states).
    pub fn ciaddr(&self) -> Ipv4Addr {
        self.ciaddr
    }

    /// "Your" IP address, the address being assigned to the client.
    pub fn yiaddr(&self) -> Ipv4Addr {
        self.yiaddr
    }

    pub fn siaddr(&self) -> Ipv4Addr {
        self.siaddr
    }

    /// Gateway IP address, set by relay agents.
    pub fn giaddr(&self) -> Ipv4Addr {
        self.giaddr
    }

    /// Returns the client hardware address bytes (respecting hlen).
    pub fn chaddr(&self) -> &[u8] {
        &self.chaddr[..self.hlen as usize]
    }

    /// Returns the client hardware address as a lease pool key.
    pub fn hardware_addr(&self) -> HardwareAddr {
        HardwareAddr::new(self.chaddr())
    }

    pub fn cookie(&self) -> [u8; 4] {
        self.cookie
    }

    /// Returns true if the broadcast flag (bit 15) is set.
    ///
    /// When set, servers must broadcast replies instead of unicasting.
    pub fn is_broadcast(&self) -> bool {
        (self.flags & BROADCAST_FLAG) != 0
    }

    /// Returns true if the magic cookie marks this as a DHCP message.
    pub fn is_dhcp(&self) -> bool {
        self.cookie == DHCP_MAGIC_COOKIE
    }

    /// Returns `sname` up to its first NUL byte.
    pub fn server_name(&self) -> String {
        terminated_string(&self.sname)
    }

    /// Returns `file` up to its first NUL byte.
    pub fn boot_file(&self) -> String {
        terminated_string(&self.file)
    }

    /// Returns the raw option bytes that follow the magic cookie.
    pub fn raw_options(&self) -> &[u8] {
        &self.options
    }
}

/// Walks the TLVs in `data` and reports whether an `End` marker is reached.
fn is_terminated(data: &[u8]) -> bool {
    let mut index = 0;
    while let Some(&code) = data.get(index) {
        if code == OptionCode::End as u8 {
            return true;
        }
        if code == OptionCode::Pad as u8 {
            index += 1;
            continue;
        }
        match data.get(index + 1) {
            Some(&length) => index += 2 + length as usize,
            None => return false,
        }
    }
    false
}

fn read_addr(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

fn copy_terminated(field: &mut [u8], value: &[u8]) {
    let len = value.len().min(field.len() - 1);
    field[..len].copy_from_slice(&value[..len]);
}

fn terminated_string(field: &[u8]) -> String {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    String::from_utf8_lossy(&field[..end]).into_owned()
}
