use std::io::{BufRead, Cursor, Read};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::bits::{pack, unpack};
use crate::error::OfpError;
use crate::packet::MacAddr;

/// OpenFlow 1.0 message type codes, used by headers to identify meaning of the rest of a message.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
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

impl MsgCode {
    const ALL: [MsgCode; 22] = [
        MsgCode::Hello,
        MsgCode::Error,
        MsgCode::EchoReq,
        MsgCode::EchoResp,
        MsgCode::Vendor,
        MsgCode::FeaturesReq,
        MsgCode::FeaturesResp,
        MsgCode::GetConfigReq,
        MsgCode::GetConfigResp,
        MsgCode::SetConfig,
        MsgCode::PacketIn,
        MsgCode::FlowRemoved,
        MsgCode::PortStatus,
        MsgCode::PacketOut,
        MsgCode::FlowMod,
        MsgCode::PortMod,
        MsgCode::StatsReq,
        MsgCode::StatsResp,
        MsgCode::BarrierReq,
        MsgCode::BarrierResp,
        MsgCode::QueueGetConfigReq,
        MsgCode::QueueGetConfigResp,
    ];

    pub fn of_int(code: u8) -> Option<MsgCode> {
        MsgCode::ALL.get(code as usize).copied()
    }

    /// The `OFPT_*` name, for logs.
    pub fn name(self) -> &'static str {
        match self {
            MsgCode::Hello => "HELLO",
            MsgCode::Error => "ERROR",
            MsgCode::EchoReq => "ECHO_REQUEST",
            MsgCode::EchoResp => "ECHO_REPLY",
            MsgCode::Vendor => "VENDOR",
            MsgCode::FeaturesReq => "FEATURES_REQUEST",
            MsgCode::FeaturesResp => "FEATURES_REPLY",
            MsgCode::GetConfigReq => "GET_CONFIG_REQUEST",
            MsgCode::GetConfigResp => "GET_CONFIG_REPLY",
            MsgCode::SetConfig => "SET_CONFIG",
            MsgCode::PacketIn => "PACKET_IN",
            MsgCode::FlowRemoved => "FLOW_REMOVED",
            MsgCode::PortStatus => "PORT_STATUS",
            MsgCode::PacketOut => "PACKET_OUT",
            MsgCode::FlowMod => "FLOW_MOD",
            MsgCode::PortMod => "PORT_MOD",
            MsgCode::StatsReq => "STATS_REQUEST",
            MsgCode::StatsResp => "STATS_REPLY",
            MsgCode::BarrierReq => "BARRIER_REQUEST",
            MsgCode::BarrierResp => "BARRIER_REPLY",
            MsgCode::QueueGetConfigReq => "QUEUE_GET_CONFIG_REQUEST",
            MsgCode::QueueGetConfigResp => "QUEUE_GET_CONFIG_REPLY",
        }
    }
}

/// Common API for message types implementing OpenFlow Message Codes (see `MsgCode` enum).
pub trait MessageType: Sized {
    /// Return the byte-size of a message body.
    fn size_of(&self) -> usize;
    /// Parse a message body.
    fn parse(buf: &[u8]) -> Result<Self, OfpError>;
    /// Marshal a message body into a `u8` buffer.
    fn marshal(&self, bytes: &mut Vec<u8>);
}

fn need(buf: &[u8], len: usize, what: &'static str) -> Result<(), OfpError> {
    if buf.len() < len {
        Err(OfpError::Truncated {
            what,
            len: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn bad(field: &'static str, value: u32) -> OfpError {
    OfpError::BadValue { field, value }
}

// Writes into a Vec cannot fail, so the results of the `write_*` calls below are discarded.

const OFPFW_IN_PORT: u32 = 1 << 0;
const OFPFW_DL_VLAN: u32 = 1 << 1;
const OFPFW_DL_SRC: u32 = 1 << 2;
const OFPFW_DL_DST: u32 = 1 << 3;
const OFPFW_DL_TYPE: u32 = 1 << 4;
const OFPFW_NW_PROTO: u32 = 1 << 5;
const OFPFW_TP_SRC: u32 = 1 << 6;
const OFPFW_TP_DST: u32 = 1 << 7;
const OFPFW_NW_SRC_SHIFT: u32 = 8;
const OFPFW_NW_DST_SHIFT: u32 = 14;
const OFPFW_NW_MASK_BITS: u32 = 0x3f;
const OFPFW_DL_VLAN_PCP: u32 = 1 << 20;
const OFPFW_NW_TOS: u32 = 1 << 21;

/// `dl_vlan` value that matches only untagged frames.
pub const OFP_VLAN_NONE: u16 = 0xffff;

/// A value with an optional wildcard mask.  For IPv4 addresses, `mask` is the number of
/// low-order bits that are wildcarded (1 through 31); `None` means an exact match.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Mask<T> {
    pub value: T,
    pub mask: Option<T>,
}

/// Fields to match against flows.  `None` wildcards a field.
///
/// `dl_vlan` has three states: `None` (any frame), `Some(None)` (untagged frames only) and
/// `Some(Some(vid))`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Pattern {
    pub in_port: Option<u16>,
    pub dl_src: Option<MacAddr>,
    pub dl_dst: Option<MacAddr>,
    pub dl_vlan: Option<Option<u16>>,
    pub dl_vlan_pcp: Option<u8>,
    pub dl_typ: Option<u16>,
    pub nw_tos: Option<u8>,
    pub nw_proto: Option<u8>,
    pub nw_src: Option<Mask<u32>>,
    pub nw_dst: Option<Mask<u32>>,
    pub tp_src: Option<u16>,
    pub tp_dst: Option<u16>,
}

impl Pattern {
    pub const SIZE: usize = 40;

    pub fn match_all() -> Pattern {
        Pattern::default()
    }

    /// The VLAN id this pattern is restricted to, if any.
    pub fn vlan(&self) -> Option<u16> {
        match self.dl_vlan {
            Some(Some(vid)) => Some(vid),
            _ => None,
        }
    }

    fn nw_wildcard(addr: &Option<Mask<u32>>) -> u32 {
        match *addr {
            None => 32,
            Some(Mask { mask: None, .. }) => 0,
            Some(Mask { mask: Some(n), .. }) => n.min(32),
        }
    }

    fn nw_of_wildcard(value: u32, bits: u32) -> Option<Mask<u32>> {
        match bits {
            0 => Some(Mask { value, mask: None }),
            n if n >= 32 => None,
            n => Some(Mask {
                value,
                mask: Some(n),
            }),
        }
    }

    fn wildcards(&self) -> u32 {
        let flag = |wild: bool, bit: u32| if wild { bit } else { 0 };
        flag(self.in_port.is_none(), OFPFW_IN_PORT)
            | flag(self.dl_vlan.is_none(), OFPFW_DL_VLAN)
            | flag(self.dl_src.is_none(), OFPFW_DL_SRC)
            | flag(self.dl_dst.is_none(), OFPFW_DL_DST)
            | flag(self.dl_typ.is_none(), OFPFW_DL_TYPE)
            | flag(self.nw_proto.is_none(), OFPFW_NW_PROTO)
            | flag(self.tp_src.is_none(), OFPFW_TP_SRC)
            | flag(self.tp_dst.is_none(), OFPFW_TP_DST)
            | (Pattern::nw_wildcard(&self.nw_src) << OFPFW_NW_SRC_SHIFT)
            | (Pattern::nw_wildcard(&self.nw_dst) << OFPFW_NW_DST_SHIFT)
            | flag(self.dl_vlan_pcp.is_none(), OFPFW_DL_VLAN_PCP)
            | flag(self.nw_tos.is_none(), OFPFW_NW_TOS)
    }

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<Pattern, OfpError> {
        let w = bytes.read_u32::<BigEndian>()?;
        let set = |bit: u32| w & bit == 0;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let dl_src = MacAddr::read(bytes)?;
        let dl_dst = MacAddr::read(bytes)?;
        let dl_vlan = bytes.read_u16::<BigEndian>()?;
        let dl_vlan_pcp = bytes.read_u8()?;
        bytes.consume(1);
        let dl_typ = bytes.read_u16::<BigEndian>()?;
        let nw_tos = bytes.read_u8()?;
        let nw_proto = bytes.read_u8()?;
        bytes.consume(2);
        let nw_src = bytes.read_u32::<BigEndian>()?;
        let nw_dst = bytes.read_u32::<BigEndian>()?;
        let tp_src = bytes.read_u16::<BigEndian>()?;
        let tp_dst = bytes.read_u16::<BigEndian>()?;
        Ok(Pattern {
            in_port: Some(in_port).filter(|_| set(OFPFW_IN_PORT)),
            dl_src: Some(dl_src).filter(|_| set(OFPFW_DL_SRC)),
            dl_dst: Some(dl_dst).filter(|_| set(OFPFW_DL_DST)),
            dl_vlan: if set(OFPFW_DL_VLAN) {
                Some(Some(dl_vlan).filter(|&v| v != OFP_VLAN_NONE))
            } else {
                None
            },
            dl_vlan_pcp: Some(dl_vlan_pcp).filter(|_| set(OFPFW_DL_VLAN_PCP)),
            dl_typ: Some(dl_typ).filter(|_| set(OFPFW_DL_TYPE)),
            nw_tos: Some(nw_tos).filter(|_| set(OFPFW_NW_TOS)),
            nw_proto: Some(nw_proto).filter(|_| set(OFPFW_NW_PROTO)),
            nw_src: Pattern::nw_of_wildcard(
                nw_src,
                (w >> OFPFW_NW_SRC_SHIFT) & OFPFW_NW_MASK_BITS,
            ),
            nw_dst: Pattern::nw_of_wildcard(
                nw_dst,
                (w >> OFPFW_NW_DST_SHIFT) & OFPFW_NW_MASK_BITS,
            ),
            tp_src: Some(tp_src).filter(|_| set(OFPFW_TP_SRC)),
            tp_dst: Some(tp_dst).filter(|_| set(OFPFW_TP_DST)),
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u32::<BigEndian>(self.wildcards());
        let _ = bytes.write_u16::<BigEndian>(self.in_port.unwrap_or(0));
        bytes.extend_from_slice(&self.dl_src.unwrap_or_default().0);
        bytes.extend_from_slice(&self.dl_dst.unwrap_or_default().0);
        let _ = bytes.write_u16::<BigEndian>(match self.dl_vlan {
            None => 0,
            Some(None) => OFP_VLAN_NONE,
            Some(Some(vid)) => vid,
        });
        let _ = bytes.write_u8(self.dl_vlan_pcp.unwrap_or(0));
        let _ = bytes.write_u8(0);
        let _ = bytes.write_u16::<BigEndian>(self.dl_typ.unwrap_or(0));
        let _ = bytes.write_u8(self.nw_tos.unwrap_or(0));
        let _ = bytes.write_u8(self.nw_proto.unwrap_or(0));
        let _ = bytes.write_u16::<BigEndian>(0);
        let _ = bytes.write_u32::<BigEndian>(self.nw_src.map_or(0, |m| m.value));
        let _ = bytes.write_u32::<BigEndian>(self.nw_dst.map_or(0, |m| m.value));
        let _ = bytes.write_u16::<BigEndian>(self.tp_src.unwrap_or(0));
        let _ = bytes.write_u16::<BigEndian>(self.tp_dst.unwrap_or(0));
    }
}

/// Port behavior.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PseudoPort {
    PhysicalPort(u16),
    InPort,
    Table,
    Normal,
    Flood,
    AllPorts,
    Controller(u64),
    Local,
}

#[repr(u16)]
enum OfpPort {
    OFPPMax = 0xff00,
    OFPPInPort = 0xfff8,
    OFPPTable = 0xfff9,
    OFPPNormal = 0xfffa,
    OFPPFlood = 0xfffb,
    OFPPAll = 0xfffc,
    OFPPController = 0xfffd,
    OFPPLocal = 0xfffe,
    OFPPNone = 0xffff,
}

impl PseudoPort {
    fn of_int(p: u16) -> Result<Option<PseudoPort>, OfpError> {
        if (OfpPort::OFPPNone as u16) == p {
            Ok(None)
        } else {
            PseudoPort::make(p, 0).map(Some)
        }
    }

    fn make(p: u16, len: u64) -> Result<PseudoPort, OfpError> {
        Ok(match p {
            p if p == (OfpPort::OFPPInPort as u16) => PseudoPort::InPort,
            p if p == (OfpPort::OFPPTable as u16) => PseudoPort::Table,
            p if p == (OfpPort::OFPPNormal as u16) => PseudoPort::Normal,
            p if p == (OfpPort::OFPPFlood as u16) => PseudoPort::Flood,
            p if p == (OfpPort::OFPPAll as u16) => PseudoPort::AllPorts,
            p if p == (OfpPort::OFPPController as u16) => PseudoPort::Controller(len),
            p if p == (OfpPort::OFPPLocal as u16) => PseudoPort::Local,
            p if p <= (OfpPort::OFPPMax as u16) => PseudoPort::PhysicalPort(p),
            p => return Err(bad("port number", p as u32)),
        })
    }

    fn to_int(pp: PseudoPort) -> u16 {
        match pp {
            PseudoPort::PhysicalPort(p) => p,
            PseudoPort::InPort => OfpPort::OFPPInPort as u16,
            PseudoPort::Table => OfpPort::OFPPTable as u16,
            PseudoPort::Normal => OfpPort::OFPPNormal as u16,
            PseudoPort::Flood => OfpPort::OFPPFlood as u16,
            PseudoPort::AllPorts => OfpPort::OFPPAll as u16,
            PseudoPort::Controller(_) => OfpPort::OFPPController as u16,
            PseudoPort::Local => OfpPort::OFPPLocal as u16,
        }
    }

    fn marshal(pp: PseudoPort, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u16::<BigEndian>(PseudoPort::to_int(pp));
    }
}

/// Actions associated with flows and packets.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Output(PseudoPort),
    SetVlanVid(u16),
    SetVlanPcp(u8),
    StripVlan,
    SetDlSrc(MacAddr),
    SetDlDst(MacAddr),
    SetNwSrc(u32),
    SetNwDst(u32),
    SetNwTos(u8),
    SetTpSrc(u16),
    SetTpDst(u16),
    /// Output to a queue: port, queue id.
    Enqueue(u16, u32),
    /// Vendor extension: vendor id and the rest of the action, opaque.
    Vendor(u32, Vec<u8>),
}

#[repr(u16)]
enum OfpActionType {
    OFPATOutput,
    OFPATSetVlanVId,
    OFPATSetVlanPCP,
    OFPATStripVlan,
    OFPATSetDlSrc,
    OFPATSetDlDst,
    OFPATSetNwSrc,
    OFPATSetNwDst,
    OFPATSetNwTos,
    OFPATSetTpSrc,
    OFPATSetTpDst,
    OFPATEnqueue,
    OFPATVendor = 0xffff,
}

impl Action {
    fn type_code(a: &Action) -> OfpActionType {
        match *a {
            Action::Output(_) => OfpActionType::OFPATOutput,
            Action::SetVlanVid(_) => OfpActionType::OFPATSetVlanVId,
            Action::SetVlanPcp(_) => OfpActionType::OFPATSetVlanPCP,
            Action::StripVlan => OfpActionType::OFPATStripVlan,
            Action::SetDlSrc(_) => OfpActionType::OFPATSetDlSrc,
            Action::SetDlDst(_) => OfpActionType::OFPATSetDlDst,
            Action::SetNwSrc(_) => OfpActionType::OFPATSetNwSrc,
            Action::SetNwDst(_) => OfpActionType::OFPATSetNwDst,
            Action::SetNwTos(_) => OfpActionType::OFPATSetNwTos,
            Action::SetTpSrc(_) => OfpActionType::OFPATSetTpSrc,
            Action::SetTpDst(_) => OfpActionType::OFPATSetTpDst,
            Action::Enqueue(..) => OfpActionType::OFPATEnqueue,
            Action::Vendor(..) => OfpActionType::OFPATVendor,
        }
    }

    fn size_of(a: &Action) -> usize {
        match *a {
            Action::SetDlSrc(_) | Action::SetDlDst(_) | Action::Enqueue(..) => 16,
            Action::Vendor(_, ref body) => 8 + body.len(),
            _ => 8,
        }
    }

    fn size_of_sequence(actions: &[Action]) -> usize {
        actions.iter().map(Action::size_of).sum()
    }

    /// Parses one action whose type and length have already been read; `body` is the rest of
    /// the action.
    fn parse_one(typ: u16, body: &[u8]) -> Result<Action, OfpError> {
        let mut bytes = Cursor::new(body);
        let action = match typ {
            t if t == OfpActionType::OFPATOutput as u16 => {
                let port_code = bytes.read_u16::<BigEndian>()?;
                let len = bytes.read_u16::<BigEndian>()?;
                Action::Output(PseudoPort::make(port_code, len as u64)?)
            }
            t if t == OfpActionType::OFPATSetVlanVId as u16 => {
                Action::SetVlanVid(bytes.read_u16::<BigEndian>()?)
            }
            t if t == OfpActionType::OFPATSetVlanPCP as u16 => Action::SetVlanPcp(bytes.read_u8()?),
            t if t == OfpActionType::OFPATStripVlan as u16 => Action::StripVlan,
            t if t == OfpActionType::OFPATSetDlSrc as u16 => {
                Action::SetDlSrc(MacAddr::read(&mut bytes)?)
            }
            t if t == OfpActionType::OFPATSetDlDst as u16 => {
                Action::SetDlDst(MacAddr::read(&mut bytes)?)
            }
            t if t == OfpActionType::OFPATSetNwSrc as u16 => {
                Action::SetNwSrc(bytes.read_u32::<BigEndian>()?)
            }
            t if t == OfpActionType::OFPATSetNwDst as u16 => {
                Action::SetNwDst(bytes.read_u32::<BigEndian>()?)
            }
            t if t == OfpActionType::OFPATSetNwTos as u16 => Action::SetNwTos(bytes.read_u8()?),
            t if t == OfpActionType::OFPATSetTpSrc as u16 => {
                Action::SetTpSrc(bytes.read_u16::<BigEndian>()?)
            }
            t if t == OfpActionType::OFPATSetTpDst as u16 => {
                Action::SetTpDst(bytes.read_u16::<BigEndian>()?)
            }
            t if t == OfpActionType::OFPATEnqueue as u16 => {
                let port = bytes.read_u16::<BigEndian>()?;
                bytes.consume(6);
                Action::Enqueue(port, bytes.read_u32::<BigEndian>()?)
            }
            t if t == OfpActionType::OFPATVendor as u16 => {
                let vendor = bytes.read_u32::<BigEndian>()?;
                let mut rest = vec![];
                bytes.read_to_end(&mut rest)?;
                Action::Vendor(vendor, rest)
            }
            t => return Err(bad("action type", t as u32)),
        };
        Ok(action)
    }

    fn parse_sequence(buf: &[u8]) -> Result<Vec<Action>, OfpError> {
        let mut actions = vec![];
        let mut rest = buf;
        while !rest.is_empty() {
            need(rest, 4, "action header")?;
            let typ = u16::from_be_bytes([rest[0], rest[1]]);
            let len = u16::from_be_bytes([rest[2], rest[3]]) as usize;
            if len < 8 || len % 8 != 0 {
                return Err(bad("action length", len as u32));
            }
            need(rest, len, "action")?;
            actions.push(Action::parse_one(typ, &rest[4..len])?);
            rest = &rest[len..];
        }
        Ok(actions)
    }

    fn marshal(act: &Action, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u16::<BigEndian>(Action::type_code(act) as u16);
        let _ = bytes.write_u16::<BigEndian>(Action::size_of(act) as u16);
        match *act {
            Action::Output(pp) => {
                PseudoPort::marshal(pp, bytes);
                let _ = bytes.write_u16::<BigEndian>(match pp {
                    PseudoPort::Controller(w) => w as u16,
                    _ => 0,
                });
            }
            Action::SetVlanVid(vid) => {
                let _ = bytes.write_u16::<BigEndian>(vid);
                let _ = bytes.write_u16::<BigEndian>(0);
            }
            Action::SetVlanPcp(pcp) => {
                let _ = bytes.write_u8(pcp);
                bytes.extend_from_slice(&[0; 3]);
            }
            Action::StripVlan => bytes.extend_from_slice(&[0; 4]),
            Action::SetDlSrc(mac) | Action::SetDlDst(mac) => {
                bytes.extend_from_slice(&mac.0);
                bytes.extend_from_slice(&[0; 6]);
            }
            Action::SetNwSrc(addr) | Action::SetNwDst(addr) => {
                let _ = bytes.write_u32::<BigEndian>(addr);
            }
            Action::SetNwTos(tos) => {
                let _ = bytes.write_u8(tos);
                bytes.extend_from_slice(&[0; 3]);
            }
            Action::SetTpSrc(port) | Action::SetTpDst(port) => {
                let _ = bytes.write_u16::<BigEndian>(port);
                let _ = bytes.write_u16::<BigEndian>(0);
            }
            Action::Enqueue(port, queue_id) => {
                let _ = bytes.write_u16::<BigEndian>(port);
                bytes.extend_from_slice(&[0; 6]);
                let _ = bytes.write_u32::<BigEndian>(queue_id);
            }
            Action::Vendor(vendor, ref body) => {
                let _ = bytes.write_u32::<BigEndian>(vendor);
                bytes.extend_from_slice(body);
            }
        }
    }

    fn marshal_sequence(actions: &[Action], bytes: &mut Vec<u8>) {
        for act in actions {
            Action::marshal(act, bytes)
        }
    }
}

/// How long before a flow entry expires.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
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

    fn to_int(tm: Timeout) -> u16 {
        match tm {
            Timeout::Permanent => 0,
            Timeout::ExpiresAfter(d) => d,
        }
    }
}

/// Capabilities supported by the datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
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
        // Bit 4 is reserved.
        let [flow_stats, table_stats, port_stats, stp, _, ip_reasm, queue_stats, arp_match_ip] =
            unpack::<8>(d);
        Capabilities {
            flow_stats,
            table_stats,
            port_stats,
            stp,
            ip_reasm,
            queue_stats,
            arp_match_ip,
        }
    }

    fn to_int(c: &Capabilities) -> u32 {
        pack(&[
            c.flow_stats,
            c.table_stats,
            c.port_stats,
            c.stp,
            false,
            c.ip_reasm,
            c.queue_stats,
            c.arp_match_ip,
        ])
    }
}

/// Actions supported by the datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SupportedActions {
    pub output: bool,
    pub set_vlan_id: bool,
    pub set_vlan_pcp: bool,
    pub strip_vlan: bool,
    pub set_dl_src: bool,
    pub set_dl_dst: bool,
    pub set_nw_src: bool,
    pub set_nw_dst: bool,
    pub set_nw_tos: bool,
    pub set_tp_src: bool,
    pub set_tp_dst: bool,
    pub enqueue: bool,
    pub vendor: bool,
}

impl SupportedActions {
    fn of_int(d: u32) -> SupportedActions {
        let [output, set_vlan_id, set_vlan_pcp, strip_vlan, set_dl_src, set_dl_dst, set_nw_src, set_nw_dst, set_nw_tos, set_tp_src, set_tp_dst, enqueue, vendor] =
            unpack::<13>(d);
        SupportedActions {
            output,
            set_vlan_id,
            set_vlan_pcp,
            strip_vlan,
            set_dl_src,
            set_dl_dst,
            set_nw_src,
            set_nw_dst,
            set_nw_tos,
            set_tp_src,
            set_tp_dst,
            enqueue,
            vendor,
        }
    }

    fn to_int(a: &SupportedActions) -> u32 {
        pack(&[
            a.output,
            a.set_vlan_id,
            a.set_vlan_pcp,
            a.strip_vlan,
            a.set_dl_src,
            a.set_dl_dst,
            a.set_nw_src,
            a.set_nw_dst,
            a.set_nw_tos,
            a.set_tp_src,
            a.set_tp_dst,
            a.enqueue,
            a.vendor,
        ])
    }
}

/// Switch features.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SwitchFeatures {
    pub datapath_id: u64,
    pub num_buffers: u32,
    pub num_tables: u8,
    pub supported_capabilities: Capabilities,
    pub supported_actions: SupportedActions,
    pub ports: Vec<PortDesc>,
}

impl SwitchFeatures {
    const FIXED_SIZE: usize = 24;
}

impl MessageType for SwitchFeatures {
    fn size_of(&self) -> usize {
        SwitchFeatures::FIXED_SIZE + self.ports.len() * PortDesc::SIZE
    }

    fn parse(buf: &[u8]) -> Result<SwitchFeatures, OfpError> {
        need(buf, SwitchFeatures::FIXED_SIZE, "features reply")?;
        let mut bytes = Cursor::new(buf);
        let datapath_id = bytes.read_u64::<BigEndian>()?;
        let num_buffers = bytes.read_u32::<BigEndian>()?;
        let num_tables = bytes.read_u8()?;
        bytes.consume(3);
        let supported_capabilities = Capabilities::of_int(bytes.read_u32::<BigEndian>()?);
        let supported_actions = SupportedActions::of_int(bytes.read_u32::<BigEndian>()?);
        let num_ports = (buf.len() - SwitchFeatures::FIXED_SIZE) / PortDesc::SIZE;
        let mut ports = Vec::with_capacity(num_ports);
        for _ in 0..num_ports {
            ports.push(PortDesc::parse(&mut bytes)?)
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

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u64::<BigEndian>(self.datapath_id);
        let _ = bytes.write_u32::<BigEndian>(self.num_buffers);
        let _ = bytes.write_u8(self.num_tables);
        bytes.extend_from_slice(&[0; 3]);
        let _ = bytes.write_u32::<BigEndian>(Capabilities::to_int(&self.supported_capabilities));
        let _ = bytes.write_u32::<BigEndian>(SupportedActions::to_int(&self.supported_actions));
        for port in &self.ports {
            port.marshal(bytes)
        }
    }
}

/// Switch configuration carried by SET_CONFIG and GET_CONFIG_REPLY.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct SwitchConfig {
    pub flags: u16,
    pub miss_send_len: u16,
}

impl Default for SwitchConfig {
    fn default() -> SwitchConfig {
        SwitchConfig {
            flags: 0,
            miss_send_len: 128,
        }
    }
}

impl MessageType for SwitchConfig {
    fn size_of(&self) -> usize {
        4
    }

    fn parse(buf: &[u8]) -> Result<SwitchConfig, OfpError> {
        need(buf, 4, "switch config")?;
        let mut bytes = Cursor::new(buf);
        Ok(SwitchConfig {
            flags: bytes.read_u16::<BigEndian>()?,
            miss_send_len: bytes.read_u16::<BigEndian>()?,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u16::<BigEndian>(self.flags);
        let _ = bytes.write_u16::<BigEndian>(self.miss_send_len);
    }
}

/// Type of modification to perform on a flow table.
#[repr(u16)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FlowModCmd {
    AddFlow,
    ModFlow,
    ModStrictFlow,
    DeleteFlow,
    DeleteStrictFlow,
}

impl FlowModCmd {
    fn of_int(cmd: u16) -> Result<FlowModCmd, OfpError> {
        Ok(match cmd {
            0 => FlowModCmd::AddFlow,
            1 => FlowModCmd::ModFlow,
            2 => FlowModCmd::ModStrictFlow,
            3 => FlowModCmd::DeleteFlow,
            4 => FlowModCmd::DeleteStrictFlow,
            c => return Err(bad("flow mod command", c as u32)),
        })
    }

    pub fn is_delete(self) -> bool {
        matches!(self, FlowModCmd::DeleteFlow | FlowModCmd::DeleteStrictFlow)
    }
}

/// Represents modifications to a flow table from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FlowMod {
    pub command: FlowModCmd,
    pub pattern: Pattern,
    pub priority: u16,
    pub actions: Vec<Action>,
    pub cookie: u64,
    pub idle_timeout: Timeout,
    pub hard_timeout: Timeout,
    pub notify_when_removed: bool,
    pub apply_to_packet: Option<u32>,
    pub out_port: Option<PseudoPort>,
    pub check_overlap: bool,
    pub emergency: bool,
}

impl FlowMod {
    const FIXED_SIZE: usize = Pattern::SIZE + 24;

    fn flags_to_int(&self) -> u16 {
        (if self.emergency { 1 << 2 } else { 0 })
            | (if self.check_overlap { 1 << 1 } else { 0 })
            | (if self.notify_when_removed { 1 << 0 } else { 0 })
    }
}

/// Buffer id meaning "no buffer".
const NO_BUFFER: u32 = 0xffff_ffff;

fn buffer_of_int(id: u32) -> Option<u32> {
    Some(id).filter(|&id| id != NO_BUFFER)
}

impl MessageType for FlowMod {
    fn size_of(&self) -> usize {
        FlowMod::FIXED_SIZE + Action::size_of_sequence(&self.actions)
    }

    fn parse(buf: &[u8]) -> Result<FlowMod, OfpError> {
        need(buf, FlowMod::FIXED_SIZE, "flow mod")?;
        let mut bytes = Cursor::new(buf);
        let pattern = Pattern::parse(&mut bytes)?;
        let cookie = bytes.read_u64::<BigEndian>()?;
        let command = FlowModCmd::of_int(bytes.read_u16::<BigEndian>()?)?;
        let idle = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let hard = Timeout::of_int(bytes.read_u16::<BigEndian>()?);
        let prio = bytes.read_u16::<BigEndian>()?;
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let out_port = PseudoPort::of_int(bytes.read_u16::<BigEndian>()?)?;
        let flags = bytes.read_u16::<BigEndian>()?;
        let actions = Action::parse_sequence(&buf[FlowMod::FIXED_SIZE..])?;
        Ok(FlowMod {
            command,
            pattern,
            priority: prio,
            actions,
            cookie,
            idle_timeout: idle,
            hard_timeout: hard,
            notify_when_removed: flags & 1 != 0,
            apply_to_packet: buffer_of_int(buffer_id),
            out_port,
            check_overlap: flags & 2 != 0,
            emergency: flags & 4 != 0,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        self.pattern.marshal(bytes);
        let _ = bytes.write_u64::<BigEndian>(self.cookie);
        let _ = bytes.write_u16::<BigEndian>(self.command as u16);
        let _ = bytes.write_u16::<BigEndian>(Timeout::to_int(self.idle_timeout));
        let _ = bytes.write_u16::<BigEndian>(Timeout::to_int(self.hard_timeout));
        let _ = bytes.write_u16::<BigEndian>(self.priority);
        let _ = bytes.write_u32::<BigEndian>(self.apply_to_packet.unwrap_or(NO_BUFFER));
        match self.out_port {
            None => {
                let _ = bytes.write_u16::<BigEndian>(OfpPort::OFPPNone as u16);
            }
            Some(x) => PseudoPort::marshal(x, bytes),
        }
        let _ = bytes.write_u16::<BigEndian>(self.flags_to_int());
        Action::marshal_sequence(&self.actions, bytes);
    }
}

/// The data associated with a packet received by the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Payload {
    Buffered(u32, Vec<u8>),
    NotBuffered(Vec<u8>),
}

impl Payload {
    pub fn size_of(payload: &Payload) -> usize {
        Payload::data(payload).len()
    }

    /// The frame bytes carried inline, possibly empty for a buffered payload.
    pub fn data(payload: &Payload) -> &[u8] {
        match *payload {
            Payload::Buffered(_, ref buf) | Payload::NotBuffered(ref buf) => buf,
        }
    }

    pub fn buffer_id(payload: &Payload) -> Option<u32> {
        match *payload {
            Payload::Buffered(id, _) => Some(id),
            Payload::NotBuffered(_) => None,
        }
    }

    fn of_parts(buffer_id: u32, data: Vec<u8>) -> Payload {
        match buffer_of_int(buffer_id) {
            None => Payload::NotBuffered(data),
            Some(n) => Payload::Buffered(n, data),
        }
    }
}

/// The reason a packet arrives at the controller.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PacketInReason {
    NoMatch,
    ExplicitSend,
}

/// Represents packets received by the datapath and sent to the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketIn {
    pub input_payload: Payload,
    pub total_len: u16,
    pub port: u16,
    pub reason: PacketInReason,
}

impl PacketIn {
    const FIXED_SIZE: usize = 10;
}

impl MessageType for PacketIn {
    fn size_of(&self) -> usize {
        PacketIn::FIXED_SIZE + Payload::size_of(&self.input_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketIn, OfpError> {
        need(buf, PacketIn::FIXED_SIZE, "packet in")?;
        let mut bytes = Cursor::new(buf);
        let buf_id = bytes.read_u32::<BigEndian>()?;
        let total_len = bytes.read_u16::<BigEndian>()?;
        let port = bytes.read_u16::<BigEndian>()?;
        let reason = match bytes.read_u8()? {
            0 => PacketInReason::NoMatch,
            1 => PacketInReason::ExplicitSend,
            r => return Err(bad("packet in reason", r as u32)),
        };
        Ok(PacketIn {
            input_payload: Payload::of_parts(buf_id, buf[PacketIn::FIXED_SIZE..].to_vec()),
            total_len,
            port,
            reason,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u32::<BigEndian>(
            Payload::buffer_id(&self.input_payload).unwrap_or(NO_BUFFER),
        );
        let _ = bytes.write_u16::<BigEndian>(self.total_len);
        let _ = bytes.write_u16::<BigEndian>(self.port);
        let _ = bytes.write_u8(self.reason as u8);
        let _ = bytes.write_u8(0);
        bytes.extend_from_slice(Payload::data(&self.input_payload));
    }
}

/// Represents packets sent from the controller.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PacketOut {
    pub output_payload: Payload,
    /// Ingress port the packet is treated as arriving on, `None` for `OFPP_NONE`.
    pub port_id: Option<u16>,
    pub apply_actions: Vec<Action>,
}

impl PacketOut {
    const FIXED_SIZE: usize = 8;
}

impl MessageType for PacketOut {
    fn size_of(&self) -> usize {
        PacketOut::FIXED_SIZE
            + Action::size_of_sequence(&self.apply_actions)
            + Payload::size_of(&self.output_payload)
    }

    fn parse(buf: &[u8]) -> Result<PacketOut, OfpError> {
        need(buf, PacketOut::FIXED_SIZE, "packet out")?;
        let mut bytes = Cursor::new(buf);
        let buffer_id = bytes.read_u32::<BigEndian>()?;
        let in_port = bytes.read_u16::<BigEndian>()?;
        let actions_len = bytes.read_u16::<BigEndian>()? as usize;
        let actions_end = PacketOut::FIXED_SIZE + actions_len;
        need(buf, actions_end, "packet out actions")?;
        let apply_actions = Action::parse_sequence(&buf[PacketOut::FIXED_SIZE..actions_end])?;
        Ok(PacketOut {
            output_payload: Payload::of_parts(buffer_id, buf[actions_end..].to_vec()),
            port_id: Some(in_port).filter(|&p| p != OfpPort::OFPPNone as u16),
            apply_actions,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u32::<BigEndian>(
            Payload::buffer_id(&self.output_payload).unwrap_or(NO_BUFFER),
        );
        let _ = bytes.write_u16::<BigEndian>(self.port_id.unwrap_or(OfpPort::OFPPNone as u16));
        let _ = bytes.write_u16::<BigEndian>(Action::size_of_sequence(&self.apply_actions) as u16);
        Action::marshal_sequence(&self.apply_actions, bytes);
        bytes.extend_from_slice(Payload::data(&self.output_payload));
    }
}

/// STP state of a port.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum StpState {
    Listen,
    Learn,
    Forward,
    Block,
}

/// Current state of a physical port. Not configurable by the controller.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PortState {
    pub down: bool,
    pub stp_state: StpState,
}

impl PortState {
    fn of_int(d: u32) -> PortState {
        PortState {
            down: d & 1 != 0,
            stp_state: match (d >> 8) & 3 {
                0 => StpState::Listen,
                1 => StpState::Learn,
                2 => StpState::Forward,
                _ => StpState::Block,
            },
        }
    }

    fn to_int(s: &PortState) -> u32 {
        (if s.down { 1 } else { 0 }) | ((s.stp_state as u32) << 8)
    }
}

/// Features of physical ports available in a datapath.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PortFeatures {
    pub f_10mbhd: bool,
    pub f_10mbfd: bool,
    pub f_100mbhd: bool,
    pub f_100mbfd: bool,
    pub f_1gbhd: bool,
    pub f_1gbfd: bool,
    pub f_10gbfd: bool,
    pub copper: bool,
    pub fiber: bool,
    pub autoneg: bool,
    pub pause: bool,
    pub pause_asym: bool,
}

impl PortFeatures {
    fn of_int(d: u32) -> PortFeatures {
        let [f_10mbhd, f_10mbfd, f_100mbhd, f_100mbfd, f_1gbhd, f_1gbfd, f_10gbfd, copper, fiber, autoneg, pause, pause_asym] =
            unpack::<12>(d);
        PortFeatures {
            f_10mbhd,
            f_10mbfd,
            f_100mbhd,
            f_100mbfd,
            f_1gbhd,
            f_1gbfd,
            f_10gbfd,
            copper,
            fiber,
            autoneg,
            pause,
            pause_asym,
        }
    }

    fn to_int(f: &PortFeatures) -> u32 {
        pack(&[
            f.f_10mbhd,
            f.f_10mbfd,
            f.f_100mbhd,
            f.f_100mbfd,
            f.f_1gbhd,
            f.f_1gbfd,
            f.f_10gbfd,
            f.copper,
            f.fiber,
            f.autoneg,
            f.pause,
            f.pause_asym,
        ])
    }
}

/// Flags to indicate behavior of the physical port.
///
/// These flags are used both to describe the current configuration of a physical port,
/// and to configure a port's behavior.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PortConfig {
    pub down: bool,
    pub no_stp: bool,
    pub no_recv: bool,
    pub no_recv_stp: bool,
    pub no_flood: bool,
    pub no_fwd: bool,
    pub no_packet_in: bool,
}

impl PortConfig {
    fn of_int(d: u32) -> PortConfig {
        let [down, no_stp, no_recv, no_recv_stp, no_flood, no_fwd, no_packet_in] = unpack::<7>(d);
        PortConfig {
            down,
            no_stp,
            no_recv,
            no_recv_stp,
            no_flood,
            no_fwd,
            no_packet_in,
        }
    }

    fn to_int(c: &PortConfig) -> u32 {
        pack(&[
            c.down,
            c.no_stp,
            c.no_recv,
            c.no_recv_stp,
            c.no_flood,
            c.no_fwd,
            c.no_packet_in,
        ])
    }
}

/// Description of a physical port.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortDesc {
    pub port_no: u16,
    pub hw_addr: MacAddr,
    pub name: String,
    pub config: PortConfig,
    pub state: PortState,
    pub curr: PortFeatures,
    pub advertised: PortFeatures,
    pub supported: PortFeatures,
    pub peer: PortFeatures,
}

impl PortDesc {
    pub const SIZE: usize = 48;
    const NAME_LEN: usize = 16;

    fn parse(bytes: &mut Cursor<&[u8]>) -> Result<PortDesc, OfpError> {
        let port_no = bytes.read_u16::<BigEndian>()?;
        let hw_addr = MacAddr::read(bytes)?;
        let name = {
            let mut arr = [0; PortDesc::NAME_LEN];
            bytes.read_exact(&mut arr)?;
            let end = arr.iter().position(|&b| b == 0).unwrap_or(arr.len());
            String::from_utf8_lossy(&arr[..end]).into_owned()
        };
        let config = PortConfig::of_int(bytes.read_u32::<BigEndian>()?);
        let state = PortState::of_int(bytes.read_u32::<BigEndian>()?);
        let curr = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let advertised = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let supported = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        let peer = PortFeatures::of_int(bytes.read_u32::<BigEndian>()?);
        Ok(PortDesc {
            port_no,
            hw_addr,
            name,
            config,
            state,
            curr,
            advertised,
            supported,
            peer,
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u16::<BigEndian>(self.port_no);
        bytes.extend_from_slice(&self.hw_addr.0);
        let mut name = [0; PortDesc::NAME_LEN];
        let len = self.name.len().min(PortDesc::NAME_LEN - 1);
        name[..len].copy_from_slice(&self.name.as_bytes()[..len]);
        bytes.extend_from_slice(&name);
        let _ = bytes.write_u32::<BigEndian>(PortConfig::to_int(&self.config));
        let _ = bytes.write_u32::<BigEndian>(PortState::to_int(&self.state));
        for f in &[self.curr, self.advertised, self.supported, self.peer] {
            let _ = bytes.write_u32::<BigEndian>(PortFeatures::to_int(f));
        }
    }
}

/// What changed about a physical port.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PortReason {
    PortAdd,
    PortDelete,
    PortModify,
}

/// A physical port has changed in the datapath.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PortStatus {
    pub reason: PortReason,
    pub desc: PortDesc,
}

impl MessageType for PortStatus {
    fn size_of(&self) -> usize {
        8 + PortDesc::SIZE
    }

    fn parse(buf: &[u8]) -> Result<PortStatus, OfpError> {
        need(buf, 8 + PortDesc::SIZE, "port status")?;
        let mut bytes = Cursor::new(buf);
        let reason = match bytes.read_u8()? {
            0 => PortReason::PortAdd,
            1 => PortReason::PortDelete,
            2 => PortReason::PortModify,
            r => return Err(bad("port status reason", r as u32)),
        };
        bytes.consume(7);
        let desc = PortDesc::parse(&mut bytes)?;
        Ok(PortStatus { reason, desc })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u8(self.reason as u8);
        bytes.extend_from_slice(&[0; 7]);
        self.desc.marshal(bytes);
    }
}

/// Error message (datapath -> controller).  Type and code are kept numeric; the payload is
/// usually the head of the offending request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ErrorMsg {
    pub typ: u16,
    pub code: u16,
    pub data: Vec<u8>,
}

impl MessageType for ErrorMsg {
    fn size_of(&self) -> usize {
        4 + self.data.len()
    }

    fn parse(buf: &[u8]) -> Result<ErrorMsg, OfpError> {
        need(buf, 4, "error")?;
        Ok(ErrorMsg {
            typ: u16::from_be_bytes([buf[0], buf[1]]),
            code: u16::from_be_bytes([buf[2], buf[3]]),
            data: buf[4..].to_vec(),
        })
    }

    fn marshal(&self, bytes: &mut Vec<u8>) {
        let _ = bytes.write_u16::<BigEndian>(self.typ);
        let _ = bytes.write_u16::<BigEndian>(self.code);
        bytes.extend_from_slice(&self.data);
    }
}

/// Encapsulates handling of messages implementing `MessageType` trait.
pub mod message {
    use super::*;
    use crate::ofp_header::{OfpHeader, OFP_VERSION};
    use crate::ofp_message::OfpMessage;

    /// Abstractions of OpenFlow messages mapping to message codes.
    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Message {
        Hello,
        Error(ErrorMsg),
        EchoRequest(Vec<u8>),
        EchoReply(Vec<u8>),
        Vendor(Vec<u8>),
        FeaturesReq,
        FeaturesReply(SwitchFeatures),
        GetConfigRequest,
        GetConfigReply(SwitchConfig),
        SetConfig(SwitchConfig),
        PacketIn(PacketIn),
        PortStatus(PortStatus),
        PacketOut(PacketOut),
        FlowMod(FlowMod),
        BarrierRequest,
        BarrierReply,
        /// Carried through without interpretation: FLOW_REMOVED, PORT_MOD, statistics and
        /// queue configuration messages.
        Opaque(MsgCode, Vec<u8>),
    }

    impl Message {
        /// Map `Message` to associated OpenFlow message type code `MsgCode`.
        pub fn msg_code_of_message(msg: &Message) -> MsgCode {
            match *msg {
                Message::Hello => MsgCode::Hello,
                Message::Error(_) => MsgCode::Error,
                Message::EchoRequest(_) => MsgCode::EchoReq,
                Message::EchoReply(_) => MsgCode::EchoResp,
                Message::Vendor(_) => MsgCode::Vendor,
                Message::FeaturesReq => MsgCode::FeaturesReq,
                Message::FeaturesReply(_) => MsgCode::FeaturesResp,
                Message::GetConfigRequest => MsgCode::GetConfigReq,
                Message::GetConfigReply(_) => MsgCode::GetConfigResp,
                Message::SetConfig(_) => MsgCode::SetConfig,
                Message::PacketIn(_) => MsgCode::PacketIn,
                Message::PortStatus(_) => MsgCode::PortStatus,
                Message::PacketOut(_) => MsgCode::PacketOut,
                Message::FlowMod(_) => MsgCode::FlowMod,
                Message::BarrierRequest => MsgCode::BarrierReq,
                Message::BarrierReply => MsgCode::BarrierResp,
                Message::Opaque(code, _) => code,
            }
        }

        pub fn name(&self) -> &'static str {
            Message::msg_code_of_message(self).name()
        }

        fn body_size(msg: &Message) -> usize {
            match *msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::GetConfigRequest
                | Message::BarrierRequest
                | Message::BarrierReply => 0,
                Message::EchoRequest(ref buf)
                | Message::EchoReply(ref buf)
                | Message::Vendor(ref buf)
                | Message::Opaque(_, ref buf) => buf.len(),
                Message::Error(ref err) => err.size_of(),
                Message::FeaturesReply(ref features) => features.size_of(),
                Message::GetConfigReply(ref config) | Message::SetConfig(ref config) => {
                    config.size_of()
                }
                Message::PacketIn(ref packet_in) => packet_in.size_of(),
                Message::PortStatus(ref ps) => ps.size_of(),
                Message::PacketOut(ref packet_out) => packet_out.size_of(),
                Message::FlowMod(ref flow_mod) => flow_mod.size_of(),
            }
        }

        /// Marshal the body of the OpenFlow message `msg`.
        fn marshal_body(msg: &Message, bytes: &mut Vec<u8>) {
            match *msg {
                Message::Hello
                | Message::FeaturesReq
                | Message::GetConfigRequest
                | Message::BarrierRequest
                | Message::BarrierReply => (),
                Message::EchoRequest(ref buf)
                | Message::EchoReply(ref buf)
                | Message::Vendor(ref buf)
                | Message::Opaque(_, ref buf) => bytes.extend_from_slice(buf),
                Message::Error(ref err) => err.marshal(bytes),
                Message::FeaturesReply(ref features) => features.marshal(bytes),
                Message::GetConfigReply(ref config) | Message::SetConfig(ref config) => {
                    config.marshal(bytes)
                }
                Message::PacketIn(ref packet_in) => packet_in.marshal(bytes),
                Message::PortStatus(ref sts) => sts.marshal(bytes),
                Message::PacketOut(ref packet_out) => packet_out.marshal(bytes),
                Message::FlowMod(ref flow_mod) => flow_mod.marshal(bytes),
            }
        }
    }

    impl OfpMessage for Message {
        fn size_of(msg: &Message) -> usize {
            OfpHeader::size() + Message::body_size(msg)
        }

        fn header_of(xid: u32, msg: &Message) -> Result<OfpHeader, OfpError> {
            let sizeof_buf = <Message as OfpMessage>::size_of(msg);
            if sizeof_buf > u16::MAX as usize {
                return Err(OfpError::TooLarge(sizeof_buf));
            }
            Ok(OfpHeader::new(
                OFP_VERSION,
                Message::msg_code_of_message(msg) as u8,
                sizeof_buf as u16,
                xid,
            ))
        }

        fn marshal(xid: u32, msg: Message) -> Result<Vec<u8>, OfpError> {
            let hdr = Message::header_of(xid, &msg)?;
            let mut bytes = Vec::with_capacity(hdr.length());
            OfpHeader::marshal(&mut bytes, hdr);
            Message::marshal_body(&msg, &mut bytes);
            Ok(bytes)
        }

        fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Message), OfpError> {
            let msg = match header.type_code()? {
                MsgCode::Hello => Message::Hello,
                MsgCode::Error => Message::Error(ErrorMsg::parse(buf)?),
                MsgCode::EchoReq => Message::EchoRequest(buf.to_vec()),
                MsgCode::EchoResp => Message::EchoReply(buf.to_vec()),
                MsgCode::Vendor => Message::Vendor(buf.to_vec()),
                MsgCode::FeaturesReq => Message::FeaturesReq,
                MsgCode::FeaturesResp => Message::FeaturesReply(SwitchFeatures::parse(buf)?),
                MsgCode::GetConfigReq => Message::GetConfigRequest,
                MsgCode::GetConfigResp => Message::GetConfigReply(SwitchConfig::parse(buf)?),
                MsgCode::SetConfig => Message::SetConfig(SwitchConfig::parse(buf)?),
                MsgCode::PacketIn => Message::PacketIn(PacketIn::parse(buf)?),
                MsgCode::PortStatus => Message::PortStatus(PortStatus::parse(buf)?),
                MsgCode::PacketOut => Message::PacketOut(PacketOut::parse(buf)?),
                MsgCode::FlowMod => Message::FlowMod(FlowMod::parse(buf)?),
                MsgCode::BarrierReq => Message::BarrierRequest,
                MsgCode::BarrierResp => Message::BarrierReply,
                code @ MsgCode::FlowRemoved
                | code @ MsgCode::PortMod
                | code @ MsgCode::StatsReq
                | code @ MsgCode::StatsResp
                | code @ MsgCode::QueueGetConfigReq
                | code @ MsgCode::QueueGetConfigResp => Message::Opaque(code, buf.to_vec()),
            };
            Ok((header.xid(), msg))
        }
    }

    /// Return a `FlowMod` adding a flow parameterized by the given `priority`, `pattern`,
    /// and `actions`.
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
            emergency: false,
        }
    }

    /// Return a `FlowMod` deleting every flow matching `pattern`.
    pub fn delete_flows(pattern: Pattern) -> FlowMod {
        FlowMod {
            command: FlowModCmd::DeleteFlow,
            ..add_flow(0, pattern, vec![])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::message::*;
    use super::*;
    use crate::ofp_header::OfpHeader;
    use crate::ofp_message::OfpMessage;

    fn round_trip(msg: Message) -> Message {
        let bytes = Message::marshal(9, msg).unwrap();
        let header = OfpHeader::parse(&bytes).unwrap();
        assert_eq!(header.length(), bytes.len());
        let (xid, parsed) = Message::parse(&header, &bytes[OfpHeader::size()..]).unwrap();
        assert_eq!(xid, 9);
        parsed
    }

    #[test]
    fn flow_mod_with_vlan_match_and_actions() {
        let mut pattern = Pattern::match_all();
        pattern.dl_vlan = Some(Some(100));
        pattern.dl_src = Some(MacAddr([0, 0, 0, 0, 0, 1]));
        pattern.nw_dst = Some(Mask {
            value: 0x0a00_0000,
            mask: Some(8),
        });
        let fm = add_flow(
            10,
            pattern,
            vec![
                Action::SetVlanVid(100),
                Action::SetDlDst(MacAddr([1, 2, 3, 4, 5, 6])),
                Action::Output(PseudoPort::PhysicalPort(3)),
                Action::Output(PseudoPort::Controller(128)),
            ],
        );
        let bytes = Message::marshal(1, Message::FlowMod(fm.clone())).unwrap();
        assert_eq!(bytes.len(), 72 + 8 + 16 + 8 + 8);
        // wildcards: everything but dl_src, dl_vlan and 24 bits of nw_dst
        let w = u32::from_be_bytes([bytes[8], bytes[9], bytes[10], bytes[11]]);
        assert_eq!(w & OFPFW_DL_VLAN, 0);
        assert_eq!(w & OFPFW_DL_SRC, 0);
        assert_eq!((w >> OFPFW_NW_DST_SHIFT) & OFPFW_NW_MASK_BITS, 8);
        assert_eq!((w >> OFPFW_NW_SRC_SHIFT) & OFPFW_NW_MASK_BITS, 32);
        assert_eq!(round_trip(Message::FlowMod(fm.clone())), Message::FlowMod(fm));
    }

    #[test]
    fn untagged_vlan_match_is_distinct_from_wildcard() {
        let mut pattern = Pattern::match_all();
        pattern.dl_vlan = Some(None);
        let fm = delete_flows(pattern);
        match round_trip(Message::FlowMod(fm)) {
            Message::FlowMod(parsed) => {
                assert_eq!(parsed.pattern.dl_vlan, Some(None));
                assert_eq!(parsed.pattern.vlan(), None);
                assert!(parsed.command.is_delete());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn packet_out_with_inline_frame() {
        let po = PacketOut {
            output_payload: Payload::NotBuffered(vec![0xaa; 60]),
            port_id: Some(2),
            apply_actions: vec![Action::Output(PseudoPort::Flood)],
        };
        assert_eq!(round_trip(Message::PacketOut(po.clone())), Message::PacketOut(po));
    }

    #[test]
    fn buffered_packet_out_without_data() {
        let po = PacketOut {
            output_payload: Payload::Buffered(77, vec![]),
            port_id: None,
            apply_actions: vec![Action::Output(PseudoPort::PhysicalPort(1))],
        };
        let bytes = Message::marshal(3, Message::PacketOut(po)).unwrap();
        assert_eq!(&bytes[8..12], &[0, 0, 0, 77]);
        assert_eq!(&bytes[12..14], &[0xff, 0xff]);
        assert_eq!(&bytes[14..16], &[0, 8]);
    }

    #[test]
    fn features_reply_with_ports() {
        let port = PortDesc {
            port_no: 1,
            hw_addr: MacAddr([0, 1, 2, 3, 4, 5]),
            name: "eth1".to_string(),
            config: PortConfig::default(),
            state: PortState {
                down: false,
                stp_state: StpState::Forward,
            },
            curr: PortFeatures {
                f_1gbfd: true,
                copper: true,
                ..PortFeatures::default()
            },
            advertised: PortFeatures::default(),
            supported: PortFeatures::default(),
            peer: PortFeatures::default(),
        };
        let features = SwitchFeatures {
            datapath_id: 0x1,
            num_buffers: 256,
            num_tables: 1,
            supported_capabilities: Capabilities {
                flow_stats: true,
                arp_match_ip: true,
                ..Capabilities::default()
            },
            supported_actions: SupportedActions {
                output: true,
                set_vlan_id: true,
                strip_vlan: true,
                ..SupportedActions::default()
            },
            ports: vec![port],
        };
        let bytes = Message::marshal(5, Message::FeaturesReply(features.clone())).unwrap();
        assert_eq!(bytes.len(), 8 + 24 + 48);
        assert_eq!(round_trip(Message::FeaturesReply(features.clone())), Message::FeaturesReply(features));
    }

    #[test]
    fn unknown_action_type_is_an_error() {
        let mut body = vec![0; FlowMod::FIXED_SIZE];
        body.extend_from_slice(&[0, 42, 0, 8, 0, 0, 0, 0]);
        assert!(matches!(
            FlowMod::parse(&body),
            Err(OfpError::BadValue {
                field: "action type",
                ..
            })
        ));
    }

    #[test]
    fn truncated_flow_mod_is_an_error() {
        assert!(matches!(
            FlowMod::parse(&[0; 20]),
            Err(OfpError::Truncated { .. })
        ));
    }

    #[test]
    fn opaque_messages_pass_through() {
        let stats = Message::Opaque(MsgCode::StatsResp, vec![0, 1, 0, 0, 9, 9, 9]);
        assert_eq!(round_trip(stats.clone()), stats);
    }
}
