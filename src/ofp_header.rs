use std::io::Cursor;
use std::mem::size_of;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::error::OfpError;
use crate::openflow0x01::MsgCode;

/// Wire version byte of OpenFlow 1.0.
pub const OFP_VERSION: u8 = 0x01;

/// OpenFlow Header
///
/// The first fields of every OpenFlow message, no matter the protocol version.
/// This is parsed to determine version and length of the remaining message, so that
/// it can be properly handled.
#[repr(packed)]
#[derive(Copy, Clone, Debug)]
pub struct OfpHeader {
    version: u8,
    typ: u8,
    length: u16,
    xid: u32,
}

impl OfpHeader {
    /// Create an `OfpHeader` out of the arguments.
    pub fn new(version: u8, typ: u8, length: u16, xid: u32) -> OfpHeader {
        OfpHeader {
            version,
            typ,
            length,
            xid,
        }
    }

    /// Return the byte-size of an `OfpHeader`.
    pub fn size() -> usize {
        size_of::<OfpHeader>()
    }

    /// Fills a message buffer with the header fields of an `OfpHeader`.
    pub fn marshal(bytes: &mut Vec<u8>, header: OfpHeader) {
        // Writes into a Vec cannot fail.
        let _ = bytes.write_u8(header.version());
        let _ = bytes.write_u8(header.typ);
        let _ = bytes.write_u16::<BigEndian>(header.length() as u16);
        let _ = bytes.write_u32::<BigEndian>(header.xid());
    }

    /// Takes the first `OfpHeader::size()` bytes of `buf` and returns an `OfpHeader`.
    ///
    /// Only the framing is checked here: a version other than 0x01 or a length shorter than the
    /// header itself is an error, since the stream cannot be resynchronized after either.
    pub fn parse(buf: &[u8]) -> Result<Self, OfpError> {
        if buf.len() < Self::size() {
            return Err(OfpError::Truncated {
                what: "header",
                len: buf.len(),
            });
        }
        let mut bytes = Cursor::new(buf);
        let header = OfpHeader {
            version: bytes.read_u8()?,
            typ: bytes.read_u8()?,
            length: bytes.read_u16::<BigEndian>()?,
            xid: bytes.read_u32::<BigEndian>()?,
        };
        if header.version != OFP_VERSION {
            return Err(OfpError::BadVersion(header.version));
        }
        if header.length() < Self::size() {
            return Err(OfpError::BadLength(header.length()));
        }
        Ok(header)
    }

    /// Return the `version` field of a header.
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Return the OpenFlow message type code of a header.
    pub fn type_code(&self) -> Result<MsgCode, OfpError> {
        MsgCode::of_int(self.typ).ok_or(OfpError::UnknownType(self.typ))
    }

    /// Return the `length` field of a header. Includes the length of the header itself.
    pub fn length(&self) -> usize {
        self.length as usize
    }

    /// Return the `xid` field of a header, the transaction id associated with this packet.
    ///  Replies use the same id to facilitate pairing.
    pub fn xid(&self) -> u32 {
        self.xid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_barrier_request() {
        let hdr = OfpHeader::parse(&[0x01, 18, 0x00, 0x08, 0, 0, 0, 42]).unwrap();
        assert_eq!(hdr.length(), 8);
        assert_eq!(hdr.xid(), 42);
        assert!(matches!(hdr.type_code(), Ok(MsgCode::BarrierReq)));
    }

    #[test]
    fn rejects_other_versions() {
        let err = OfpHeader::parse(&[0x04, 0, 0x00, 0x08, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, OfpError::BadVersion(4)));
    }

    #[test]
    fn rejects_short_length() {
        let err = OfpHeader::parse(&[0x01, 0, 0x00, 0x04, 0, 0, 0, 1]).unwrap_err();
        assert!(matches!(err, OfpError::BadLength(4)));
    }

    #[test]
    fn unknown_type_is_reported_lazily() {
        let hdr = OfpHeader::parse(&[0x01, 99, 0x00, 0x08, 0, 0, 0, 1]).unwrap();
        assert!(matches!(hdr.type_code(), Err(OfpError::UnknownType(99))));
    }
}
