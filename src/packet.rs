//! Decoding of the Ethernet frames carried in packet-in payloads.
//!
//! Only the headers the controller matches on are decoded. Anything past the
//! Ethernet header that cannot be decoded is kept raw in an `Unparsable`
//! variant instead of failing the whole packet.

use std::fmt;
use std::io::{self, Read};
use std::net::Ipv4Addr;
use std::str::FromStr;

use byteorder::{BigEndian, ReadBytesExt};
use thiserror::Error;

use crate::bits::test_bit;

/// A 48-bit Ethernet hardware address.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    pub fn octets(&self) -> [u8; 6] {
        self.0
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid MAC address: {0}")]
pub struct ParseMacError(String);

impl FromStr for MacAddr {
    type Err = ParseMacError;

    /// Accepts six hex octets separated by `:` or `-`, in either case.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut octets = [0u8; 6];
        let mut parts = s.split([':', '-']);
        for octet in octets.iter_mut() {
            let part = parts.next().ok_or_else(|| ParseMacError(s.to_string()))?;
            if part.len() != 2 {
                return Err(ParseMacError(s.to_string()));
            }
            *octet = u8::from_str_radix(part, 16).map_err(|_| ParseMacError(s.to_string()))?;
        }
        if parts.next().is_some() {
            return Err(ParseMacError(s.to_string()));
        }
        Ok(MacAddr(octets))
    }
}

/// A packet whose Ethernet header could not be fully decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PacketError {
    #[error("incomplete packet: {what} needs {needed} bytes, got {got}")]
    Incomplete {
        what: &'static str,
        needed: usize,
        got: usize,
    },
}

/// TCP Header flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TcpFlags {
    /// ECN-nonce concealment protection.
    pub ns: bool,
    /// Congestion window reduced.
    pub cwr: bool,
    /// ECN-Echo.
    pub ece: bool,
    /// Indicates the Urgent pointer field is significant.
    pub urg: bool,
    /// Indicates that the Acknowledgment field is significant.
    pub ack: bool,
    /// Asks to push the buffered data to the receiving application.
    pub psh: bool,
    /// Reset the connection.
    pub rst: bool,
    /// Synchronize sequence numbers.
    pub syn: bool,
    /// No more data from sender.
    pub fin: bool,
}

impl TcpFlags {
    fn of_int(d: u16) -> TcpFlags {
        let d = d as u32;
        TcpFlags {
            fin: test_bit(d, 0),
            syn: test_bit(d, 1),
            rst: test_bit(d, 2),
            psh: test_bit(d, 3),
            ack: test_bit(d, 4),
            urg: test_bit(d, 5),
            ece: test_bit(d, 6),
            cwr: test_bit(d, 7),
            ns: test_bit(d, 8),
        }
    }
}

/// TCP frame of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tcp {
    pub src: u16,
    pub dst: u16,
    pub seq: u32,
    pub ack: u32,
    pub offset: u8,
    pub flags: TcpFlags,
    pub window: u16,
}

impl Tcp {
    fn parse(mut bytes: &[u8]) -> io::Result<Tcp> {
        let src = bytes.read_u16::<BigEndian>()?;
        let dst = bytes.read_u16::<BigEndian>()?;
        let seq = bytes.read_u32::<BigEndian>()?;
        let ack = bytes.read_u32::<BigEndian>()?;
        let offset_and_flags = bytes.read_u16::<BigEndian>()?;
        let window = bytes.read_u16::<BigEndian>()?;
        // checksum and urgent pointer close out the fixed header
        bytes.read_u32::<BigEndian>()?;
        Ok(Tcp {
            src,
            dst,
            seq,
            ack,
            offset: (offset_and_flags >> 12) as u8,
            flags: TcpFlags::of_int(offset_and_flags & 0x01ff),
            window,
        })
    }
}

/// UDP frame of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Udp {
    pub src: u16,
    pub dst: u16,
    pub length: u16,
}

impl Udp {
    fn parse(mut bytes: &[u8]) -> io::Result<Udp> {
        let src = bytes.read_u16::<BigEndian>()?;
        let dst = bytes.read_u16::<BigEndian>()?;
        let length = bytes.read_u16::<BigEndian>()?;
        bytes.read_u16::<BigEndian>()?;
        Ok(Udp { src, dst, length })
    }
}

/// ICMP frame of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Icmp {
    pub typ: u8,
    pub code: u8,
}

impl Icmp {
    fn parse(mut bytes: &[u8]) -> io::Result<Icmp> {
        let typ = bytes.read_u8()?;
        let code = bytes.read_u8()?;
        bytes.read_u16::<BigEndian>()?;
        Ok(Icmp { typ, code })
    }
}

/// Represents packets at the transport protocol level, which are encapsulated
/// within the IPv4 payload. At present, we only support TCP, UDP, and ICMP
/// explicitly; otherwise, the raw bytes and IPv4 protocol number are provided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tp {
    Tcp(Tcp),
    Udp(Udp),
    Icmp(Icmp),
    Unparsable(u8, Vec<u8>),
}

pub const IP_PROTO_ICMP: u8 = 0x01;
pub const IP_PROTO_TCP: u8 = 0x06;
pub const IP_PROTO_UDP: u8 = 0x11;

const IP_MIN_HEADER_LEN: usize = 20;

/// IPv4 frame of a packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Ip {
    pub tos: u8,
    pub ident: u16,
    pub dont_fragment: bool,
    pub more_fragments: bool,
    pub frag_offset: u16,
    pub ttl: u8,
    pub proto: u8,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub tp: Tp,
}

impl Ip {
    fn parse(buf: &[u8]) -> Option<Ip> {
        let mut bytes = buf;
        let vhl = bytes.read_u8().ok()?;
        if vhl >> 4 != 4 {
            return None;
        }
        let header_len = (vhl & 0x0f) as usize * 4;
        if header_len < IP_MIN_HEADER_LEN || buf.len() < header_len {
            return None;
        }
        let tos = bytes.read_u8().ok()?;
        let _total_len = bytes.read_u16::<BigEndian>().ok()?;
        let ident = bytes.read_u16::<BigEndian>().ok()?;
        let frag = bytes.read_u16::<BigEndian>().ok()?;
        let ttl = bytes.read_u8().ok()?;
        let proto = bytes.read_u8().ok()?;
        let _chksum = bytes.read_u16::<BigEndian>().ok()?;
        let src = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let frag_offset = frag & 0x1fff;
        let payload = &buf[header_len..];
        // Only the first fragment carries the transport header.
        let tp = if frag_offset != 0 {
            Tp::Unparsable(proto, payload.to_vec())
        } else {
            let parsed = match proto {
                IP_PROTO_ICMP => Icmp::parse(payload).map(Tp::Icmp),
                IP_PROTO_TCP => Tcp::parse(payload).map(Tp::Tcp),
                IP_PROTO_UDP => Udp::parse(payload).map(Tp::Udp),
                _ => Ok(Tp::Unparsable(proto, payload.to_vec())),
            };
            parsed.unwrap_or_else(|_| Tp::Unparsable(proto, payload.to_vec()))
        };
        Some(Ip {
            tos,
            ident,
            dont_fragment: test_bit(frag as u32, 14),
            more_fragments: test_bit(frag as u32, 13),
            frag_offset,
            ttl,
            proto,
            src,
            dst,
            tp,
        })
    }
}

/// Address resolution protocol (ARP) packet payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Arp {
    Query {
        sha: MacAddr,
        spa: Ipv4Addr,
        tpa: Ipv4Addr,
    },
    Reply {
        sha: MacAddr,
        spa: Ipv4Addr,
        tha: MacAddr,
        tpa: Ipv4Addr,
    },
}

impl Arp {
    /// The ARP opcode, which OpenFlow 1.0 matches in the `nw_proto` field.
    pub fn opcode(&self) -> u8 {
        match *self {
            Arp::Query { .. } => 1,
            Arp::Reply { .. } => 2,
        }
    }

    pub fn spa(&self) -> Ipv4Addr {
        match *self {
            Arp::Query { spa, .. } | Arp::Reply { spa, .. } => spa,
        }
    }

    pub fn tpa(&self) -> Ipv4Addr {
        match *self {
            Arp::Query { tpa, .. } | Arp::Reply { tpa, .. } => tpa,
        }
    }

    fn parse(mut bytes: &[u8]) -> Option<Arp> {
        // hardware type, protocol type, address lengths
        bytes.read_u48::<BigEndian>().ok()?;
        let oper = bytes.read_u16::<BigEndian>().ok()?;
        let sha = read_mac(&mut bytes).ok()?;
        let spa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        let tha = read_mac(&mut bytes).ok()?;
        let tpa = Ipv4Addr::from(bytes.read_u32::<BigEndian>().ok()?);
        match oper {
            0x0001 => Some(Arp::Query { sha, spa, tpa }),
            0x0002 => Some(Arp::Reply { sha, spa, tha, tpa }),
            _ => None,
        }
    }
}

/// Represents a packet at the network protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Nw {
    Ip(Ip),
    Arp(Arp),
    Unparsable(u16, Vec<u8>),
}

pub const ETH_TYP_IP: u16 = 0x0800;
pub const ETH_TYP_ARP: u16 = 0x0806;
pub const ETH_TYP_VLAN: u16 = 0x8100;

const ETH_HEADER_LEN: usize = 14;
const VLAN_TAG_LEN: usize = 4;

/// Represents a packet at the ethernet protocol level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub dl_src: MacAddr,
    pub dl_dst: MacAddr,
    pub dl_vlan: Option<u16>,
    pub dl_vlan_dei: bool,
    pub dl_vlan_pcp: u8,
    pub dl_typ: u16,
    pub nw: Nw,
}

fn read_mac(bytes: &mut &[u8]) -> io::Result<MacAddr> {
    let mut addr = [0u8; 6];
    bytes.read_exact(&mut addr)?;
    Ok(MacAddr(addr))
}

impl Packet {
    /// Decode an Ethernet frame.
    ///
    /// Fails only when the Ethernet header itself (including an 802.1Q tag, if
    /// announced) is cut short. Undecodable upper layers are kept as raw bytes.
    pub fn parse(buf: &[u8]) -> Result<Packet, PacketError> {
        let incomplete = |what, needed| PacketError::Incomplete {
            what,
            needed,
            got: buf.len(),
        };
        let mut bytes = buf;
        let eth = |_| incomplete("ethernet header", ETH_HEADER_LEN);
        let dl_dst = read_mac(&mut bytes).map_err(eth)?;
        let dl_src = read_mac(&mut bytes).map_err(eth)?;
        let typ = bytes.read_u16::<BigEndian>().map_err(eth)?;
        let (dl_vlan, dl_vlan_dei, dl_vlan_pcp, dl_typ) = if typ == ETH_TYP_VLAN {
            let vlan = |_| incomplete("802.1Q tag", ETH_HEADER_LEN + VLAN_TAG_LEN);
            let tci = bytes.read_u16::<BigEndian>().map_err(vlan)?;
            let inner = bytes.read_u16::<BigEndian>().map_err(vlan)?;
            (Some(tci & 0x0fff), tci & 0x1000 != 0, (tci >> 13) as u8, inner)
        } else {
            (None, false, 0, typ)
        };
        let nw = match dl_typ {
            ETH_TYP_IP => Ip::parse(bytes).map(Nw::Ip),
            ETH_TYP_ARP => Arp::parse(bytes).map(Nw::Arp),
            _ => None,
        }
        .unwrap_or_else(|| Nw::Unparsable(dl_typ, bytes.to_vec()));
        Ok(Packet {
            dl_src,
            dl_dst,
            dl_vlan,
            dl_vlan_dei,
            dl_vlan_pcp,
            dl_typ,
            nw,
        })
    }
}
