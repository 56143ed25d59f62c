use std::io::Read;
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{flags_of, test_bit};
use crate::error::OfpError;
use crate::packet::{MacAddr, Nw, Packet, Tp};

/// Protocol version byte carried in every OpenFlow 1.0 header.
pub const OFP_VERSION: u8 = 0x01;

/// Priority switches assign to a flow when the controller does not care.
pub const OFP_DEFAULT_PRIORITY: u16 = 0x8000;

/// Buffer id meaning "packet not buffered on the switch".
const OFP_NO_BUFFER: u32 = 0xffff_ffff;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgCode {
    Hello,
    Error,
    EchoReq,
    EchoResp,
    Vendor,
    FeaturesReq,
    FeaturesResp,
    GetConfigReq,
    GetConfigResp,
    SetConfig,
    PacketIn,
    FlowRemoved,
    PortStatus,
    PacketOut,
    FlowMod,
    PortMod,
    StatsReq,
    StatsResp,
    BarrierReq,
    BarrierResp,
    QueueGetConfigReq,
    QueueGetConfigResp,
}

impl TryFrom<u8> for MsgCode {
    type Error = OfpError;

    fn try_from(code: u8) -> Result<MsgCode, OfpError> {
        use MsgCode::*;
        const CODES: [MsgCode; 22] = [
            Hello,
            Error,
            EchoReq,
            EchoResp,
            Vendor,
            FeaturesReq,
            FeaturesResp,
            GetConfigReq,
            GetConfigResp,
            SetConfig,
            PacketIn,
            FlowRemoved,
            PortStatus,
            PacketOut,
            FlowMod,
            PortMod,
            StatsReq,
            StatsResp,
            BarrierReq,
            BarrierResp,
            QueueGetConfigReq,
            QueueGetConfigResp,
        ];
        CODES
            .get(code as usize)
            .copied()
            .ok_or(OfpError::UnknownMessageType(code))
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(msg: &Self) -> usize;
    /// Parse a buffer into a message.
    fn parse(buf: &[u8]) -> Result<Self, OfpError>;
    /// Marshal a message into a `u8` buffer.
    fn marshal(msg: &Self, bytes: &mut Vec<u8>) -> Result<(), OfpError>;
}

/// Bit positions of the `ofp_flow_wildcards` flags.
mod wildcard {
    pub const IN_PORT: u32 = 0;
    pub const DL_VLAN: u32 = 1;
    pub const DL_SRC: u32 = 2;
    pub const DL_DST: u32 = 3;
    pub const DL_TYPE: u32 = 4;
    pub const NW_PROTO: u32 = 5;
    pub const TP_SRC: u32 = 6;
    pub const TP_DST: u32 = 7;
    pub const NW_SRC_SHIFT: u32 = 8;
    pub const NW_DST_SHIFT: u32 = 14;
    pub const DL_VLAN_PCP: u32 = 20;
    pub const NW_TOS: u32 = 21;
    /// Prefix-length field value that ignores every address bit.
    pub const NW_ALL: u32 = 32;
}

/// VLAN id matching frames that carry no 802.1Q tag.
const OFP_VLAN_NONE: u16 = 0xffff;

/// Fields to match against flows.
///
/// `None` leaves a field wildcarded. `dl_vlan` is doubly optional: `Some(None)`
/// matches untagged frames only. Network addresses are matched exactly; prefix
/// masks are not modelled.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_vlan: Option<Option<u16>>,
    pub dl_vlan_pcp: Option<u8>,
    pub dl_typ: Option<u16>,
    pub nw_tos: Option<u8>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Ipv4Addr>,
    pub nw_dst: Option<Ipv4Addr>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl Pattern {
    /// Byte-size of an `ofp_match`.
    pub const SIZE: usize = 40;

    /// A pattern with every field wildcarded.
    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// Build the exact-match pattern for `pkt` as it arrived on `in_port`.
    ///
    /// Every header field the packet carries is pinned. For ARP the opcode and
    /// protocol addresses land in the network fields, and for ICMP the type and
    /// code land in the transport ports, following OpenFlow 1.0.
    pub fn from_packet(in_port: u16, pkt: &Packet) -> Pattern {
        let mut pat = Pattern {
            in_port: Some(in_port),
            dl_src: Some(pkt.dl_src),
            dl_dst: Some(pkt.dl_dst),
            dl_vlan: Some(pkt.dl_vlan),
            dl_vlan_pcp: Some(pkt.dl_vlan_pcp),
            dl_typ: Some(pkt.dl_typ),
            ..Pattern::default()
        };
        match pkt.nw {
            Nw::Ip(ref ip) => {
                pat.nw_tos = Some(ip.tos);
                pat.nw_proto = Some(ip.proto);
                pat.nw_src = Some(ip.src);
                pat.nw_dst = Some(ip.dst);
                let ports = match ip.tp {
                    Tp::Tcp(ref tcp) => Some((tcp.src, tcp.dst)),
                    Tp::Udp(ref udp) => Some((udp.src, udp.dst)),
                    Tp::Icmp(ref icmp) => Some((icmp.typ as u16, icmp.code as u16)),
                    Tp::Unparsable(..) => None,
                };
                if let Some((src, dst)) = ports {
                    pat.tp_src = Some(src);
                    pat.tp_dst = Some(dst);
                }
            }
            Nw::Arp(ref arp) => {
                pat.nw_proto = Some(arp.opcode());
                pat.nw_src = Some(arp.spa());
                pat.nw_dst = Some(arp.tpa());
            }
            Nw::Unparsable(..) => {}
        }
        pat
    }

    /// Encode the `ofp_flow_wildcards` word for this pattern.
    pub fn wildcards(&self) -> u32 {
        let nw_bits = |addr: Option<Ipv4Addr>| if addr.is_none() { wildcard::NW_ALL } else { 0 };
        flags_of(&[
            (wildcard::IN_PORT, self.in_port.is_none()),
            (wildcard::DL_VLAN, self.dl_vlan.is_none()),
            (wildcard::DL_SRC, self.dl_src.is_none()),
            (wildcard::DL_DST, self.dl_dst.is_none()),
            (wildcard::DL_TYPE, self.dl_typ.is_none()),
            (wildcard::NW_PROTO, self.nw_proto.is_none()),
            (wildcard::TP_SRC, self.tp_src.is_none()),
            (wildcard::TP_DST, self.tp_dst.is_none()),
            (wildcard::DL_VLAN_PCP, self.dl_vlan_pcp.is_none()),
            (wildcard::NW_TOS, self.nw_tos.is_none()),
        ]) | nw_bits(self.nw_src) << wildcard::NW_SRC_SHIFT
            | nw_bits(self.nw_dst) << wildcard::NW_DST_SHIFT
    }

    pub fn marshal(&self, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        bytes.write_u32::<BigEndian>(self.wildcards())?;
        bytes.write_u16::<BigEndian>(self.in_port.unwrap_or(0))?;
        bytes.extend_from_slice(&self.dl_src.unwrap_or_default().octets());
        bytes.extend_from_slice(&self.dl_dst.unwrap_or_default().octets());
        bytes.write_u16::<BigEndian>(match self.dl_vlan {
            Some(Some(vlan)) => vlan,
            Some(None) => OFP_VLAN_NONE,
            None => 0,
        })?;
        bytes.write_u8(self.dl_vlan_pcp.unwrap_or(0))?;
        bytes.write_u8(0)?;
        bytes.write_u16::<BigEndian>(self.dl_typ.unwrap_or(0))?;
        bytes.write_u8(self.nw_tos.unwrap_or(0))?;
        bytes.write_u8(self.nw_proto.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(0)?;
        bytes.write_u32::<BigEndian>(self.nw_src.map_or(0, u32::from))?;
        bytes.write_u32::<BigEndian>(self.nw_dst.map_or(0, u32::from))?;
        bytes.write_u16::<BigEndian>(self.tp_src.unwrap_or(0))?;
        bytes.write_u16::<BigEndian>(self.tp_dst.unwrap_or(0))?;
        Ok(())
    }

    pub fn parse(bytes: &mut &[u8]) -> Result<Pattern, OfpError> {
        OfpError::ensure_len("ofp_match", bytes, Pattern::SIZE)?;
        let w = bytes.read_u32::<BigEndian>()?;
        let field = |bit: u32| !test_bit(w, bit);
        let in_port = bytes.read_u16::<BigEndian>()?;
        let mut dl_src = [0u8; 6];
        bytes.read_exact(&mut dl_src)?;
        let mut dl_dst = [0u8; 6];
        bytes.read_exact(&mut dl_dst)?;
        let dl_vlan = bytes.read_u16::<BigEndian>()?;
        let dl_vlan_pcp = bytes.read_u8()?;
        bytes.read_u8()?;
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        let nw_tos = bytes.read_u8()?;
        let nw_proto = bytes.read_u8()?;
        bytes.read_u16::<BigEndian>()?;
        let nw_src = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let nw_dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        let nw_exact = |shift: u32| (w >> shift) & 0x3f < wildcard::NW_ALL;
        Ok(Pattern {
            in_port: field(wildcard::IN_PORT).then_some(in_port),
            dl_src: field(wildcard::DL_SRC).then_some(MacAddr(dl_src)),
            dl_dst: field(wildcard::DL_DST).then_some(MacAddr(dl_dst)),
            dl_vlan: field(wildcard::DL_VLAN)
                .then_some((dl_vlan != OFP_VLAN_NONE).then_some(dl_vlan)),
            dl_vlan_pcp: field(wildcard::DL_VLAN_PCP).then_some(dl_vlan_pcp),
            dl_typ: field(wildcard::DL_TYPE).then_some(dl_typ),
            nw_tos: field(wildcard::NW_TOS).then_some(nw_tos),
            nw_proto: field(wildcard::NW_PROTO).then_some(nw_proto),
            nw_src: nw_exact(wildcard::NW_SRC_SHIFT).then_some(nw_src),
            nw_dst: nw_exact(wildcard::NW_DST_SHIFT).then_some(nw_dst),
            tp_src: field(wildcard::TP_SRC).then_some(tp_src),
            tp_dst: field(wildcard::TP_DST).then_some(tp_dst),
        })
    }
}

/// Port behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    /// Send to the controller, carrying at most this many bytes of the packet.
    Controller(u16),
    Local,
}

mod ofp_port {
    pub const MAX: u16 = 0xff00;
    pub const IN_PORT: u16 = 0xfff8;
    pub const TABLE: u16 = 0xfff9;
    pub const NORMAL: u16 = 0xfffa;
    pub const FLOOD: u16 = 0xfffb;
    pub const ALL: u16 = 0xfffc;
    pub const CONTROLLER: u16 = 0xfffd;
    pub const LOCAL: u16 = 0xfffe;
    pub const NONE: u16 = 0xffff;
}

impl PseudoPort {
    /// Decode a port number, `None` standing for `OFPP_NONE`.
    fn of_int(p: u16) -> Result<Option<PseudoPort>, OfpError> {
        if p == ofp_port::NONE {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u16, max_len: u16) -> Result<PseudoPort, OfpError> {
        Ok(match p {
            ofp_port::IN_PORT => PseudoPort::InPort,
            ofp_port::TABLE => PseudoPort::Table,
            ofp_port::NORMAL => PseudoPort::Normal,
            ofp_port::FLOOD => PseudoPort::Flood,
            ofp_port::ALL => PseudoPort::AllPorts,
            ofp_port::CONTROLLER => PseudoPort::Controller(max_len),
            ofp_port::LOCAL => PseudoPort::Local,
            p if p <= ofp_port::MAX => PseudoPort::PhysicalPort(p),
            p => {
                return Err(OfpError::InvalidField {
                    field: "port",
                    value: p as u32,
                })
            }
        })
    }

    fn to_int(self) -> u16 {
        match self {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => ofp_port::IN_PORT,
            PseudoPort::Table => ofp_port::TABLE,
            PseudoPort::Normal => ofp_port::NORMAL,
            PseudoPort::Flood => ofp_port::FLOOD,
            PseudoPort::AllPorts => ofp_port::ALL,
            PseudoPort::Controller(_) => ofp_port::CONTROLLER,
            PseudoPort::Local => ofp_port::LOCAL,
        }
    }
}

/// Actions associated with flows and packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
}

const OFPAT_OUTPUT: u16 = 0;
const ACTION_OUTPUT_LEN: usize = 8;

impl Action {
    fn size_of(a: &Action) -> usize {
        match *a {
            Action::Output(_) => ACTION_OUTPUT_LEN,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    /// Parse every action in `bytes`, skipping action types the controller never emits.
    fn parse_sequence(mut bytes: &[u8]) -> Result<Vec<Action>, OfpError> {
        let mut actions = vec![];
        while !bytes.is_empty() {
            OfpError::ensure_len("action header", bytes, 4)?;
            let typ = bytes.read_u16::<BigEndian>()?;
            let len = bytes.read_u16::<BigEndian>()? as usize;
            if len < 4 {
                return Err(OfpError::InvalidField {
                    field: "action length",
                    value: len as u32,
                });
            }
            OfpError::ensure_len("action body", bytes, len - 4)?;
            let (mut body, rest) = bytes.split_at(len - 4);
            bytes = rest;
            if typ == OFPAT_OUTPUT {
                OfpError::ensure_len("output action", body, 4)?;
                let port = body.read_u16::<BigEndian>()?;
                let max_len = body.read_u16::<BigEndian>()?;
                actions.push(Action::Output(PseudoPort::make(port, max_len)?));
            }
        }
        Ok(actions)
    }

    /// Output to the controller has to come last so the other outputs are not delayed.
    fn move_controller_last(acts: &[Action]) -> Vec<Action> {
        let (mut to_ctrl, mut not_to_ctrl): (Vec<Action>, Vec<Action>) = acts
            .iter()
            .copied()
            .partition(|act| matches!(act, Action::Output(PseudoPort::Controller(_))));
        not_to_ctrl.append(&mut to_ctrl);
        not_to_ctrl
    }

    fn marshal(act: &Action, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        match *act {
            Action::Output(pp) => {
                bytes.write_u16::<BigEndian>(OFPAT_OUTPUT)?;
                bytes.write_u16::<BigEndian>(ACTION_OUTPUT_LEN as u16)?;
                bytes.write_u16::<BigEndian>(pp.to_int())?;
                bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(max_len) => max_len,
                    _ => 0,
                })?;
            }
        }
        Ok(())
    }
}

/// How long before a flow entry expires.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Timeout {
    Permanent,
    ExpiresAfter(u16),
}

impl Timeout {
    fn of_int(tm: u16) -> Timeout {
        match tm {
            0 => Timeout::Permanent,
            d => Timeout::ExpiresAfter(d),
        }
    }

    fn to_int(self) -> u16 {
        match self {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities {
    pub flow_stats: bool,
    pub table_stats: bool,
    pub port_stats: bool,
    pub stp: bool,
    pub ip_reasm: bool,
    pub queue_stats: bool,
    pub arp_match_ip: bool,
}

impl Capabilities {
    fn of_int(d: u32) -> Capabilities {
        Capabilities {
            flow_stats: test_bit(d, 0),
            table_stats: test_bit(d, 1),
            port_stats: test_bit(d, 2),
            stp: test_bit(d, 3),
            ip_reasm: test_bit(d, 5),
            queue_stats: test_bit(d, 6),
            arp_match_ip: test_bit(d, 7),
        }
    }

    fn to_int(self) -> u32 {
        flags_of(&[
            (0, self.flow_stats),
            (1, self.table_stats),
            (2, self.port_stats),
            (3, self.stp),
            (5, self.ip_reasm),
            (6, self.queue_stats),
            (7, self.arp_match_ip),
        ])
    }
}

/// Description of a physical port.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: u32,
    pub state: u32,
}

const PHY_PORT_LEN: usize = 48;
const PORT_NAME_LEN: usize = 16;

impl PortDesc {
    fn parse(bytes: &mut &[u8]) -> Result<PortDesc, OfpError> {
        OfpError::ensure_len("ofp_phy_port", bytes, PHY_PORT_LEN)?;
        let port_no = bytes.read_u16::<BigEndian>()?;
        let mut hw_addr = [0u8; 6];
        bytes.read_exact(&mut hw_addr)?;
        let mut name = [0u8; PORT_NAME_LEN];
        bytes.read_exact(&mut name)?;
        let name_len = name.iter().position(|&b| b == 0).unwrap_or(PORT_NAME_LEN);
        let config = bytes.read_u32::<BigEndian>()?;
        let state = bytes.read_u32::<BigEndian>()?;
        // curr, advertised, supported and peer feature words
        let mut features = [0u8; 16];
        bytes.read_exact(&mut features)?;
        Ok(PortDesc {
            port_no,
            hw_addr: MacAddr(hw_addr),
            name: String::from_utf8_lossy(&name[..name_len]).into_owned(),
            config,
            state,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        bytes.write_u16::<BigEndian>(self.port_no)?;
        bytes.extend_from_slice(&self.hw_addr.octets());
        let mut name = [0u8; PORT_NAME_LEN];
        let len = self.name.len().min(PORT_NAME_LEN - 1);
        name[..len].copy_from_slice(&self.name.as_bytes()[..len]);
        bytes.extend_from_slice(&name);
        bytes.write_u32::<BigEndian>(self.config)?;
        bytes.write_u32::<BigEndian>(self.state)?;
        bytes.extend_from_slice(&[0; 16]);
        Ok(())
    }
}

/// Switch features.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    /// Bitmap of supported `ofp_action_type`s.
    pub supported_actions: u32,
    pub ports: Vec<PortDesc>,
}

const SWITCH_FEATURES_LEN: usize = 24;

impl MessageType for SwitchFeatures {
    fn size_of(sf: &SwitchFeatures) -> usize {
        SWITCH_FEATURES_LEN + sf.ports.len() * PHY_PORT_LEN
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, OfpError> {
        OfpError::ensure_len("features reply", buf, SWITCH_FEATURES_LEN)?;
        let mut bytes = buf;
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        bytes.read_u24::<BigEndian>()?;
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        let supported_actions = bytes.read_u32::<BigEndian>()?;
        let mut ports = Vec::with_capacity(bytes.len() / PHY_PORT_LEN);
        while !bytes.is_empty() {
            ports.push(PortDesc::parse(&mut bytes)?);
        }
        Ok(SwitchFeatures {
            datapath_id,
            num_buffers,
            num_tables,
            supported_capabilities,
            supported_actions,
            ports,
        })
    }

    fn marshal(sf: &SwitchFeatures, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        bytes.write_u64::<BigEndian>(sf.datapath_id)?;
        bytes.write_u32::<BigEndian>(sf.num_buffers)?;
        bytes.write_u8(sf.num_tables)?;
        bytes.write_u24::<BigEndian>(0)?;
        bytes.write_u32::<BigEndian>(sf.supported_capabilities.to_int())?;
        bytes.write_u32::<BigEndian>(sf.supported_actions)?;
        for port in &sf.ports {
            port.marshal(bytes)?;
        }
        Ok(())
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl TryFrom<u16> for FlowModCmd {
    type Error = OfpError;

    fn try_from(cmd: u16) -> Result<FlowModCmd, OfpError> {
        match cmd {
            0 => Ok(FlowModCmd::AddFlow),
            1 => Ok(FlowModCmd::ModFlow),
            2 => Ok(FlowModCmd::ModStrictFlow),
            3 => Ok(FlowModCmd::DeleteFlow),
            4 => Ok(FlowModCmd::DeleteStrictFlow),
            c => Err(OfpError::InvalidField {
                field: "flow_mod command",
                value: c as u32,
            }),
        }
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    /// Buffer id of a packet held by the switch that the new flow should also be applied to.
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
}

const FLOW_MOD_LEN: usize = Pattern::SIZE + 24;

impl FlowMod {
    fn flags_to_int(check_overlap: bool, notify_when_removed: bool) -> u16 {
        flags_of(&[(0, notify_when_removed), (1, check_overlap)]) as u16
    }

    fn check_overlap_of_flags(flags: u16) -> bool {
        test_bit(flags as u32, 1)
    }

    fn notify_when_removed_of_flags(flags: u16) -> bool {
        test_bit(flags as u32, 0)
    }
}

impl MessageType for FlowMod {
    fn size_of(msg: &FlowMod) -> usize {
        FLOW_MOD_LEN + Action::size_of_sequence(&msg.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, OfpError> {
        OfpError::ensure_len("flow_mod", buf, FLOW_MOD_LEN)?;
        let mut bytes = buf;
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = FlowModCmd::try_from(bytes.read_u16::<BigEndian>()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let priority = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let actions = Action::parse_sequence(bytes)?;
        Ok(FlowMod {
            command,
            pattern,
            priority,
            actions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: FlowMod::notify_when_removed_of_flags(flags),
            apply_to_packet: (buffer_id != OFP_NO_BUFFER).then_some(buffer_id),
            out_port,
            check_overlap: FlowMod::check_overlap_of_flags(flags),
        })
    }

    fn marshal(fm: &FlowMod, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        fm.pattern.marshal(bytes)?;
        bytes.write_u64::<BigEndian>(fm.cookie)?;
        bytes.write_u16::<BigEndian>(fm.command as u16)?;
        bytes.write_u16::<BigEndian>(fm.idle_timeout.to_int())?;
        bytes.write_u16::<BigEndian>(fm.hard_timeout.to_int())?;
        bytes.write_u16::<BigEndian>(fm.priority)?;
        bytes.write_u32::<BigEndian>(fm.apply_to_packet.unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(fm.out_port.map_or(ofp_port::NONE, PseudoPort::to_int))?;
        bytes.write_u16::<BigEndian>(FlowMod::flags_to_int(
            fm.check_overlap,
            fm.notify_when_removed,
        ))?;
        for act in Action::move_controller_last(&fm.actions) {
            if act == Action::Output(PseudoPort::Table) {
                return Err(OfpError::InvalidAction("OFPP_TABLE not allowed in installed flow"));
            }
            Action::marshal(&act, bytes)?;
        }
        Ok(())
    }
}

/// The data associated with a packet received by the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        payload.data().len()
    }

    /// The packet bytes carried with the message.
    pub fn data(&self) -> &[u8] {
        match *self {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    /// The switch-side buffer holding the full packet, if any.
    pub fn buffer_id(&self) -> Option<u32> {
        match *self {
            Payload::Buffered(id, _) => Some(id),
            Payload::NotBuffered(_) => None,
        }
    }

    fn of_buffer_id(buffer_id: u32, data: Vec<u8>) -> Payload {
        if buffer_id == OFP_NO_BUFFER {
            Payload::NotBuffered(data)
        } else {
            Payload::Buffered(buffer_id, data)
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

const PACKET_IN_LEN: usize = 10;

impl MessageType for PacketIn {
    fn size_of(pi: &PacketIn) -> usize {
        PACKET_IN_LEN + Payload::size_of(&pi.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, OfpError> {
        OfpError::ensure_len("packet_in", buf, PACKET_IN_LEN)?;
        let mut bytes = buf;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason = match bytes.read_u8()? {
            0 => PacketInReason::NoMatch,
            1 => PacketInReason::ExplicitSend,
            r => {
                return Err(OfpError::InvalidField {
                    field: "packet_in reason",
                    value: r as u32,
                })
            }
        };
        bytes.read_u8()?;
        Ok(PacketIn {
            input_payload: Payload::of_buffer_id(buffer_id, bytes.to_vec()),
            total_len,
            port,
            reason,
        })
    }

    fn marshal(pi: &PacketIn, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        bytes.write_u32::<BigEndian>(pi.input_payload.buffer_id().unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(pi.total_len)?;
        bytes.write_u16::<BigEndian>(pi.port)?;
        bytes.write_u8(pi.reason as u8)?;
        bytes.write_u8(0)?;
        bytes.extend_from_slice(pi.input_payload.data());
        Ok(())
    }
}

/// Send a packet out of the datapath.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketOut {
    /// A buffered payload is released by id; only unbuffered data travels with the message.
    pub output_payload: Payload,
    /// Port the packet arrived on, so `InPort` and `AllPorts` resolve correctly.
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

const PACKET_OUT_LEN: usize = 8;

impl MessageType for PacketOut {
    fn size_of(po: &PacketOut) -> usize {
        let data = match po.output_payload {
            Payload::Buffered(..) => 0,
            Payload::NotBuffered(ref buf) => buf.len(),
        };
        PACKET_OUT_LEN + Action::size_of_sequence(&po.apply_actions) + data
    }

    fn parse(buf: &[u8]) -> Result<PacketOut, OfpError> {
        OfpError::ensure_len("packet_out", buf, PACKET_OUT_LEN)?;
        let mut bytes = buf;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        OfpError::ensure_len("packet_out actions", bytes, actions_len)?;
        let (actions, data) = bytes.split_at(actions_len);
        Ok(PacketOut {
            output_payload: Payload::of_buffer_id(buffer_id, data.to_vec()),
            port_id: (in_port != ofp_port::NONE).then_some(in_port),
            apply_actions: Action::parse_sequence(actions)?,
        })
    }

    fn marshal(po: &PacketOut, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        bytes.write_u32::<BigEndian>(po.output_payload.buffer_id().unwrap_or(OFP_NO_BUFFER))?;
        bytes.write_u16::<BigEndian>(po.port_id.unwrap_or(ofp_port::NONE))?;
        bytes.write_u16::<BigEndian>(Action::size_of_sequence(&po.apply_actions) as u16)?;
        for act in &po.apply_actions {
            Action::marshal(act, bytes)?;
        }
        if let Payload::NotBuffered(ref data) = po.output_payload {
            bytes.extend_from_slice(data);
        }
        Ok(())
    }
}

/// An error reported by the switch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    /// At least the first 64 bytes of the message that caused the error.
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(err: &ErrorMsg) -> usize {
        4 + err.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg, OfpError> {
        OfpError::ensure_len("error", buf, 4)?;
        let mut bytes = buf;
        let typ = bytes.read_u16::<BigEndian>()?;
        let code = bytes.read_u16::<BigEndian>()?;
        Ok(ErrorMsg {
            typ,
            code,
            data: bytes.to_vec(),
        })
    }

    fn marshal(err: &ErrorMsg, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
        bytes.write_u16::<BigEndian>(err.typ)?;
        bytes.write_u16::<BigEndian>(err.code)?;
        bytes.extend_from_slice(&err.data);
        Ok(())
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;
    use crate::packet::PacketError;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        FlowMod(FlowMod),
        PacketIn(PacketIn),
        PacketOut(PacketOut),
        BarrierRequest,
        BarrierReply,
        /// A well-formed message of a type this controller does not act on.
        Unsupported(MsgCode, Vec<u8>),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::Unsupported(code, _) => code,
            }
        }

        /// Marshal the body of the OpenFlow message `msg`.
        fn marshal_body(msg: &Message, bytes: &mut Vec<u8>) -> Result<(), OfpError> {
            match *msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::BarrierRequest
                | Message::BarrierReply => Ok(()),
                Message::EchoRequest(ref buf)
                | Message::EchoReply(ref buf)
                | Message::Unsupported(_, ref buf) => {
                    bytes.extend_from_slice(buf);
                    Ok(())
                }
                Message::Error(ref err) => ErrorMsg::marshal(err, bytes),
                Message::FeaturesReply(ref sf) => SwitchFeatures::marshal(sf, bytes),
                Message::FlowMod(ref flow_mod) => FlowMod::marshal(flow_mod, bytes),
                Message::PacketIn(ref packet_in) => PacketIn::marshal(packet_in, bytes),
                Message::PacketOut(ref po) => PacketOut::marshal(po, bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            OfpHeader::SIZE
                + match *msg {
                    Message::Hello
                    | Message::FeaturesReq
                    | Message::BarrierRequest
                    | Message::BarrierReply => 0,
                    Message::EchoRequest(ref buf)
                    | Message::EchoReply(ref buf)
                    | Message::Unsupported(_, ref buf) => buf.len(),
                    Message::Error(ref err) => ErrorMsg::size_of(err),
                    Message::FeaturesReply(ref sf) => SwitchFeatures::size_of(sf),
                    Message::FlowMod(ref flow_mod) => FlowMod::size_of(flow_mod),
                    Message::PacketIn(ref packet_in) => PacketIn::size_of(packet_in),
                    Message::PacketOut(ref po) => PacketOut::size_of(po),
                }
        }

        fn header_of(xid: u32, msg: &Message) -> Result<OfpHeader, OfpError> {
            let sizeof_buf = Self::size_of(msg);
            let length = u16::try_from(sizeof_buf).map_err(|_| OfpError::MessageTooLarge(sizeof_buf))?;
            Ok(OfpHeader::new(
                OFP_VERSION,
                Self::msg_code_of_message(msg),
                length,
                xid,
            ))
        }

        fn marshal(xid: u32, msg: &Message) -> Result<Vec<u8>, OfpError> {
            let hdr = Self::header_of(xid, msg)?;
            let mut bytes = Vec::with_capacity(hdr.length());
            hdr.marshal(&mut bytes)?;
            Message::marshal_body(msg, &mut bytes)?;
            Ok(bytes)
        }

        /// Hello is accepted at any version so that version negotiation can
        /// settle on 1.0; every other message must already be 1.0.
        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message), OfpError> {
            let typ = header.type_code();
            if typ != MsgCode::Hello && header.version() != OFP_VERSION {
                return Err(OfpError::UnsupportedVersion(header.version()));
            }
            let msg = match typ {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                code => Message::Unsupported(code, buf.to_vec()),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a permanent flow parameterized by the given `priority`,
    /// `pattern`, and `actions`.
    pub fn add_flow(prio: u16, pattern: Pattern, actions: Vec<Action>) -> FlowMod {
        FlowMod {
            command: FlowModCmd::AddFlow,
            pattern,
            priority: prio,
            actions,
            cookie: 0,
            idle_timeout: Timeout::Permanent,
            hard_timeout: Timeout::Permanent,
            notify_when_removed: false,
            out_port: None,
            apply_to_packet: None,
            check_overlap: false,
        }
    }

    /// Parse the Ethernet frame carried by a packet-in payload.
    pub fn parse_payload(payload: &Payload) -> Result<Packet, PacketError> {
        Packet::parse(payload.data())
    }
}

#[cfg(test)]
mod tests {
    use super::message::{add_flow, Message};
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    fn round_trip(msg: &Message) -> Message {
        let bytes = Message::marshal(9, msg).unwrap();
        let header = OfpHeader::parse(bytes[..8].try_into().unwrap()).unwrap();
        assert_eq!(header.length(), bytes.len());
        let (xid, parsed) = Message::parse(&header, &bytes[8..]).unwrap();
        assert_eq!(xid, 9);
        parsed
    }

    #[test]
    fn msg_code_rejects_out_of_range() {
        assert_eq!(MsgCode::try_from(14).unwrap(), MsgCode::FlowMod);
        assert!(matches!(
            MsgCode::try_from(22),
            Err(OfpError::UnknownMessageType(22))
        ));
    }

    #[test]
    fn match_all_wildcards_every_field() {
        assert_eq!(Pattern::match_all().wildcards(), 0x0038_20ff);
    }

    #[test]
    fn ipv4_tcp_port_pattern_wildcards() {
        let pat = Pattern {
            dl_typ: Some(0x0800),
            nw_src: Some(Ipv4Addr::new(10, 0, 0, 1)),
            nw_proto: Some(6),
            tp_dst: Some(80),
            ..Pattern::default()
        };
        // in_port, dl_vlan, dl_src, dl_dst, tp_src, nw_dst, pcp and tos stay wildcarded
        assert_eq!(pat.wildcards(), 0x0038_004f);
        let mut bytes = vec![];
        pat.marshal(&mut bytes).unwrap();
        assert_eq!(bytes.len(), Pattern::SIZE);
        assert_eq!(&bytes[22..24], &[0x08, 0x00]);
        assert_eq!(bytes[25], 6);
        assert_eq!(&bytes[28..32], &[10, 0, 0, 1]);
        assert_eq!(&bytes[38..40], &[0, 80]);
    }

    #[test]
    fn untagged_vlan_marshals_as_vlan_none() {
        let pat = Pattern {
            dl_vlan: Some(None),
            ..Pattern::default()
        };
        let mut bytes = vec![];
        pat.marshal(&mut bytes).unwrap();
        assert_eq!(&bytes[18..20], &[0xff, 0xff]);
        assert_eq!(Pattern::parse(&mut &bytes[..]).unwrap(), pat);
    }

    #[test]
    fn output_action_is_eight_bytes() {
        let mut bytes = vec![];
        Action::marshal(&Action::Output(PseudoPort::PhysicalPort(3)), &mut bytes).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 8, 0, 3, 0, 0]);
        let mut bytes = vec![];
        Action::marshal(&Action::Output(PseudoPort::Controller(128)), &mut bytes).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 8, 0xff, 0xfd, 0, 128]);
    }

    #[test]
    fn flow_mod_with_empty_actions_has_no_action_bytes() {
        let fm = add_flow(OFP_DEFAULT_PRIORITY, Pattern::match_all(), vec![]);
        let bytes = Message::marshal(0, &Message::FlowMod(fm.clone())).unwrap();
        assert_eq!(bytes.len(), OfpHeader::SIZE + FLOW_MOD_LEN);
        // buffer_id and out_port fall back to the "none" sentinels
        assert_eq!(&bytes[64..68], &[0xff; 4]);
        assert_eq!(&bytes[68..70], &[0xff, 0xff]);
        assert_eq!(round_trip(&Message::FlowMod(fm.clone())), Message::FlowMod(fm));
    }

    #[test]
    fn flow_mod_moves_controller_output_last() {
        let fm = add_flow(
            1,
            Pattern::match_all(),
            vec![
                Action::Output(PseudoPort::Controller(64)),
                Action::Output(PseudoPort::PhysicalPort(2)),
            ],
        );
        let Message::FlowMod(parsed) = round_trip(&Message::FlowMod(fm)) else {
            panic!("expected flow_mod");
        };
        assert_eq!(
            parsed.actions,
            vec![
                Action::Output(PseudoPort::PhysicalPort(2)),
                Action::Output(PseudoPort::Controller(64)),
            ]
        );
    }

    #[test]
    fn flow_mod_rejects_table_output() {
        let fm = add_flow(1, Pattern::match_all(), vec![Action::Output(PseudoPort::Table)]);
        assert!(matches!(
            Message::marshal(0, &Message::FlowMod(fm)),
            Err(OfpError::InvalidAction(_))
        ));
    }

    #[test]
    fn packet_in_body_skips_padding() {
        let mut body = vec![0, 0, 1, 0, 0, 60, 0, 3, 0, 0xee];
        body.extend_from_slice(&[1, 2, 3]);
        let pi = PacketIn::parse(&body).unwrap();
        assert_eq!(pi.input_payload, Payload::Buffered(256, vec![1, 2, 3]));
        assert_eq!(pi.total_len, 60);
        assert_eq!(pi.port, 3);
        assert_eq!(pi.reason, PacketInReason::NoMatch);
    }

    #[test]
    fn packet_in_rejects_short_body() {
        assert!(matches!(
            PacketIn::parse(&[0, 0, 0]),
            Err(OfpError::Truncated { what: "packet_in", .. })
        ));
    }

    #[test]
    fn buffered_packet_out_omits_data() {
        let po = PacketOut {
            output_payload: Payload::Buffered(7, vec![1, 2, 3, 4]),
            port_id: Some(3),
            apply_actions: vec![Action::Output(PseudoPort::AllPorts)],
        };
        let mut bytes = vec![];
        PacketOut::marshal(&po, &mut bytes).unwrap();
        assert_eq!(bytes.len(), PacketOut::size_of(&po));
        assert_eq!(&bytes[..8], &[0, 0, 0, 7, 0, 3, 0, 8]);
        assert_eq!(&bytes[12..14], &[0xff, 0xfc]);
    }

    #[test]
    fn unbuffered_packet_out_carries_data() {
        let po = PacketOut {
            output_payload: Payload::NotBuffered(vec![9, 9]),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(1))],
        };
        let msg = Message::PacketOut(po);
        assert_eq!(round_trip(&msg), msg);
    }

    #[test]
    fn features_reply_lists_ports() {
        let sf = SwitchFeatures {
            datapath_id: 0xabcd,
            num_buffers: 256,
            num_tables: 1,
            supported_capabilities: Capabilities {
                flow_stats: true,
                arp_match_ip: true,
                ..Capabilities::default()
            },
            supported_actions: 0x0fff,
            ports: vec![PortDesc {
                port_no: 1,
                hw_addr: MacAddr([0, 0, 0, 0, 0, 1]),
                name: "s1-eth1".to_string(),
                config: 0,
                state: 1,
            }],
        };
        let msg = Message::FeaturesReply(sf);
        let Message::FeaturesReply(parsed) = round_trip(&msg) else {
            panic!("expected features reply");
        };
        assert_eq!(parsed.datapath_id, 0xabcd);
        assert_eq!(parsed.ports.len(), 1);
        assert_eq!(parsed.ports[0].name, "s1-eth1");
        assert_eq!(parsed.ports[0].state, 1);
        assert!(parsed.supported_capabilities.arp_match_ip);
    }

    #[test]
    fn non_hello_messages_require_version_one() {
        let header = OfpHeader::new(0x04, MsgCode::EchoReq, 8, 1);
        assert!(matches!(
            Message::parse(&header, &[]),
            Err(OfpError::UnsupportedVersion(0x04))
        ));
        let hello = OfpHeader::new(0x04, MsgCode::Hello, 8, 1);
        assert_eq!(Message::parse(&hello, &[]).unwrap(), (1, Message::Hello));
    }

    #[test]
    fn unhandled_types_are_kept_raw() {
        let header = OfpHeader::new(OFP_VERSION, MsgCode::PortStatus, 12, 4);
        let (_, msg) = Message::parse(&header, &[1, 2, 3, 4]).unwrap();
        assert_eq!(msg, Message::Unsupported(MsgCode::PortStatus, vec![1, 2, 3, 4]));
    }
}
