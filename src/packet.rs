//! Layered codec for the frames carried in PACKET_IN and PACKET_OUT: Ethernet II, an optional
//! 802.1Q tag, and the IPv4 header when present.  Everything past the decoded headers is kept
//! as opaque bytes so a frame can be re-encoded byte for byte.

use std::fmt;
use std::io::{Cursor, Read};
use std::net::Ipv4Addr;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::PacketError;

/// Ethertype values this codec distinguishes.
#[repr(u16)]
enum EthTyp {
    EthTypIP = 0x0800,
    EthTypVLAN = 0x8100,
}

/// Highest 802.1Q VLAN id.
pub const VLAN_MAX: u16 = 0x0fff;

/// A 48-bit hardware address.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MacAddr(pub [u8; 6]);

impl MacAddr {
    /// Reads a MAC in wire order from `bytes`.
    pub fn read(bytes: &mut Cursor<&[u8]>) -> std::io::Result<MacAddr> {
        let mut addr = [0; 6];
        bytes.read_exact(&mut addr)?;
        Ok(MacAddr(addr))
    }
}

impl fmt::Display for MacAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let a = self.0;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            a[0], a[1], a[2], a[3], a[4], a[5]
        )
    }
}

/// Ethernet II header without any tag.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dl_dst: MacAddr,
    pub dl_src: MacAddr,
    pub ethertype: u16,
}

impl EthernetHeader {
    pub const SIZE: usize = 14;

    pub fn parse(buf: &[u8]) -> Result<EthernetHeader, PacketError> {
        if buf.len() < Self::SIZE {
            return Err(PacketError::TooShort {
                what: "Ethernet header",
                len: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let too_short = |_| PacketError::TooShort {
            what: "Ethernet header",
            len: buf.len(),
        };
        let dl_dst = MacAddr::read(&mut bytes).map_err(too_short)?;
        let dl_src = MacAddr::read(&mut bytes).map_err(too_short)?;
        let ethertype = bytes.read_u16::<BigEndian>().map_err(too_short)?;
        Ok(EthernetHeader {
            dl_dst,
            dl_src,
            ethertype,
        })
    }

    pub fn marshal(&self, bytes: &mut Vec<u8>) {
        bytes.extend_from_slice(&self.dl_dst.0);
        bytes.extend_from_slice(&self.dl_src.0);
        let _ = bytes.write_u16::<BigEndian>(self.ethertype);
    }
}

/// 802.1Q tag: the tag control information plus the encapsulated ethertype.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct VlanTag {
    pub pcp: u8,
    pub dei: bool,
    pub vid: u16,
    pub ethertype: u16,
}

impl VlanTag {
    pub const SIZE: usize = 4;

    /// A tag for `vid` with priority 0, wrapping a payload of type `ethertype`.
    pub fn new(vid: u16, ethertype: u16) -> Result<VlanTag, PacketError> {
        if vid > VLAN_MAX {
            return Err(PacketError::VlanOutOfRange(vid));
        }
        Ok(VlanTag {
            pcp: 0,
            dei: false,
            vid,
            ethertype,
        })
    }

    pub fn parse(buf: &[u8]) -> Result<VlanTag, PacketError> {
        if buf.len() < Self::SIZE {
            return Err(PacketError::TooShort {
                what: "802.1Q tag",
                len: buf.len(),
            });
        }
        let tci = u16::from_be_bytes([buf[0], buf[1]]);
        let ethertype = u16::from_be_bytes([buf[2], buf[3]]);
        Ok(VlanTag {
            pcp: (tci >> 13) as u8,
            dei: (tci & 0x1000) != 0,
            vid: tci & VLAN_MAX,
            ethertype,
        })
    }

    pub fn marshal(&self, bytes: &mut Vec<u8>) {
        let tci = ((self.pcp as u16 & 0x7) << 13)
            | if self.dei { 0x1000 } else { 0 }
            | (self.vid & VLAN_MAX);
        let _ = bytes.write_u16::<BigEndian>(tci);
        let _ = bytes.write_u16::<BigEndian>(self.ethertype);
    }
}

/// IPv4 header, options kept opaque.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Ipv4Header {
    pub tos: u8,
    pub total_len: u16,
    pub ident: u16,
    /// Flags and fragment offset as on the wire.
    pub frag: u16,
    pub ttl: u8,
    pub proto: u8,
    pub chksum: u16,
    pub src: Ipv4Addr,
    pub dst: Ipv4Addr,
    pub options: Vec<u8>,
}

impl Ipv4Header {
    pub const MIN_SIZE: usize = 20;

    pub fn parse(buf: &[u8]) -> Result<Ipv4Header, PacketError> {
        let too_short = || PacketError::TooShort {
            what: "IPv4 header",
            len: buf.len(),
        };
        if buf.len() < Self::MIN_SIZE {
            return Err(too_short());
        }
        let vhl = buf[0];
        let ihl = (vhl & 0x0f) as usize * 4;
        if (vhl >> 4) != 4 || ihl < Self::MIN_SIZE {
            return Err(PacketError::BadIpv4Header(vhl));
        }
        if buf.len() < ihl {
            return Err(too_short());
        }
        let mut bytes = Cursor::new(&buf[1..ihl]);
        let mut read = || -> std::io::Result<Ipv4Header> {
            let tos = bytes.read_u8()?;
            let total_len = bytes.read_u16::<BigEndian>()?;
            let ident = bytes.read_u16::<BigEndian>()?;
            let frag = bytes.read_u16::<BigEndian>()?;
            let ttl = bytes.read_u8()?;
            let proto = bytes.read_u8()?;
            let chksum = bytes.read_u16::<BigEndian>()?;
            let src = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
            let dst = Ipv4Addr::from(bytes.read_u32::<BigEndian>()?);
            let mut options = vec![];
            bytes.read_to_end(&mut options)?;
            Ok(Ipv4Header {
                tos,
                total_len,
                ident,
                frag,
                ttl,
                proto,
                chksum,
                src,
                dst,
                options,
            })
        };
        read().map_err(|_| too_short())
    }

    /// Header length in bytes, options included.
    pub fn size(&self) -> usize {
        Self::MIN_SIZE + self.options.len()
    }

    pub fn marshal(&self, bytes: &mut Vec<u8>) {
        let ihl = (self.size() / 4) as u8;
        let _ = bytes.write_u8(0x40 | (ihl & 0x0f));
        let _ = bytes.write_u8(self.tos);
        let _ = bytes.write_u16::<BigEndian>(self.total_len);
        let _ = bytes.write_u16::<BigEndian>(self.ident);
        let _ = bytes.write_u16::<BigEndian>(self.frag);
        let _ = bytes.write_u8(self.ttl);
        let _ = bytes.write_u8(self.proto);
        let _ = bytes.write_u16::<BigEndian>(self.chksum);
        bytes.extend_from_slice(&self.src.octets());
        bytes.extend_from_slice(&self.dst.octets());
        bytes.extend_from_slice(&self.options);
    }
}

/// An Ethernet frame split into its link-layer headers and the remaining payload.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EthernetFrame {
    pub eth: EthernetHeader,
    pub vlan: Option<VlanTag>,
    /// Everything after the Ethernet (and 802.1Q) headers.
    pub payload: Vec<u8>,
}

impl EthernetFrame {
    pub fn parse(buf: &[u8]) -> Result<EthernetFrame, PacketError> {
        let eth = EthernetHeader::parse(buf)?;
        let rest = &buf[EthernetHeader::SIZE..];
        let (vlan, payload) = if eth.ethertype == EthTyp::EthTypVLAN as u16 {
            let tag = VlanTag::parse(rest)?;
            (Some(tag), &rest[VlanTag::SIZE..])
        } else {
            (None, rest)
        };
        Ok(EthernetFrame {
            eth,
            vlan,
            payload: payload.to_vec(),
        })
    }

    pub fn marshal(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.size());
        self.eth.marshal(&mut bytes);
        if let Some(tag) = &self.vlan {
            tag.marshal(&mut bytes);
        }
        bytes.extend_from_slice(&self.payload);
        bytes
    }

    pub fn size(&self) -> usize {
        EthernetHeader::SIZE + self.vlan.map_or(0, |_| VlanTag::SIZE) + self.payload.len()
    }

    /// The 802.1Q VLAN id, if the frame is tagged.
    pub fn vlan_id(&self) -> Option<u16> {
        self.vlan.map(|tag| tag.vid)
    }

    /// Ethertype of the payload, looking through the 802.1Q tag if present.
    pub fn inner_ethertype(&self) -> u16 {
        match self.vlan {
            Some(tag) => tag.ethertype,
            None => self.eth.ethertype,
        }
    }

    /// Inserts an 802.1Q tag for `vid` between the Ethernet header and the payload.  The payload
    /// itself is untouched.  A frame that is already tagged is returned unchanged.
    pub fn push_vlan(mut self, vid: u16) -> Result<EthernetFrame, PacketError> {
        if self.vlan.is_some() {
            return Ok(self);
        }
        self.vlan = Some(VlanTag::new(vid, self.eth.ethertype)?);
        self.eth.ethertype = EthTyp::EthTypVLAN as u16;
        Ok(self)
    }

    /// The IPv4 header, for frames whose payload is IPv4.
    pub fn ipv4(&self) -> Option<Ipv4Header> {
        if self.inner_ethertype() == EthTyp::EthTypIP as u16 {
            Ipv4Header::parse(&self.payload).ok()
        } else {
            None
        }
    }
}

impl fmt::Display for EthernetFrame {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} > {}", self.eth.dl_src, self.eth.dl_dst)?;
        if let Some(tag) = &self.vlan {
            write!(f, " vlan {}", tag.vid)?;
        }
        write!(f, " type {:#06x}", self.inner_ethertype())?;
        if let Some(ip) = self.ipv4() {
            write!(f, " {} > {} proto {}", ip.src, ip.dst, ip.proto)?;
        }
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// An untagged IPv4/UDP frame between two fixed hosts.
    pub fn ipv4_frame() -> Vec<u8> {
        let ip = Ipv4Header {
            tos: 0,
            total_len: 28,
            ident: 0x1234,
            frag: 0x4000,
            ttl: 64,
            proto: 17,
            chksum: 0,
            src: Ipv4Addr::new(10, 0, 0, 1),
            dst: Ipv4Addr::new(10, 0, 0, 2),
            options: vec![],
        };
        let mut bytes = vec![];
        EthernetHeader {
            dl_dst: MacAddr([0, 0, 0, 0, 0, 2]),
            dl_src: MacAddr([0, 0, 0, 0, 0, 1]),
            ethertype: 0x0800,
        }
        .marshal(&mut bytes);
        ip.marshal(&mut bytes);
        bytes.extend_from_slice(&[0x13, 0x88, 0x13, 0x89, 0, 8, 0, 0]);
        bytes
    }

    #[test]
    fn parses_untagged_ipv4() {
        let frame = EthernetFrame::parse(&ipv4_frame()).unwrap();
        assert_eq!(frame.vlan_id(), None);
        assert_eq!(frame.eth.dl_src.to_string(), "00:00:00:00:00:01");
        let ip = frame.ipv4().unwrap();
        assert_eq!(ip.src, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(ip.proto, 17);
        assert_eq!(frame.marshal(), ipv4_frame());
    }

    #[test]
    fn push_vlan_keeps_payload() {
        let raw = ipv4_frame();
        let tagged = EthernetFrame::parse(&raw).unwrap().push_vlan(100).unwrap();
        let wire = tagged.marshal();
        assert_eq!(wire.len(), raw.len() + 4);
        assert_eq!(&wire[12..14], &[0x81, 0x00]);
        assert_eq!(&wire[14..16], &[0x00, 100]);
        assert_eq!(&wire[16..18], &[0x08, 0x00]);
        assert_eq!(&wire[18..], &raw[14..]);

        let reparsed = EthernetFrame::parse(&wire).unwrap();
        assert_eq!(reparsed.vlan_id(), Some(100));
        assert_eq!(reparsed.inner_ethertype(), 0x0800);
        assert!(reparsed.ipv4().is_some());
    }

    #[test]
    fn tci_fields() {
        let tag = VlanTag::parse(&[0xb0, 0x64, 0x08, 0x06]).unwrap();
        assert_eq!(tag.pcp, 5);
        assert!(tag.dei);
        assert_eq!(tag.vid, 100);
        let mut bytes = vec![];
        tag.marshal(&mut bytes);
        assert_eq!(bytes, [0xb0, 0x64, 0x08, 0x06]);
    }

    #[test]
    fn short_frames_are_errors() {
        assert!(EthernetFrame::parse(&[0; 10]).is_err());
        let mut truncated_tag = ipv4_frame()[..14].to_vec();
        truncated_tag[12] = 0x81;
        truncated_tag[13] = 0x00;
        assert!(matches!(
            EthernetFrame::parse(&truncated_tag),
            Err(PacketError::TooShort { .. })
        ));
    }

    #[test]
    fn vlan_range_is_checked() {
        let frame = EthernetFrame::parse(&ipv4_frame()).unwrap();
        assert_eq!(
            frame.push_vlan(4096).unwrap_err(),
            PacketError::VlanOutOfRange(4096)
        );
    }
}
