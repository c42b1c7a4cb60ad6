use crate::error::OfpError;
use crate::ofp_header::OfpHeader;

/// OpenFlow Message
///
/// Version-agnostic API for handling OpenFlow messages at the byte-buffer level.
pub trait OfpMessage: Sized {
    /// Return the byte-size of an `OfpMessage`, header included.
    fn size_of(msg: &Self) -> usize;
    /// Create an `OfpHeader` for the given transaction id and OpenFlow message.
    fn header_of(xid: u32, msg: &Self) -> Result<OfpHeader, OfpError>;
    /// Return a marshaled buffer containing an OpenFlow header and the message `msg`.
    fn marshal(xid: u32, msg: Self) -> Result<Vec<u8>, OfpError>;
    /// Returns a pair `(u32, OfpMessage)` of the transaction id and OpenFlow message parsed from
    /// the given OpenFlow header `header`, and body `buf` (the bytes following the header).
    fn parse(header: &OfpHeader, buf: &[u8]) -> Result<(u32, Self), OfpError>;
}

/// One complete message cut out of a byte stream.
pub struct Frame {
    pub header: OfpHeader,
    /// The full message, header included, exactly as received.
    pub raw: Vec<u8>,
}

impl Frame {
    /// The bytes following the header.
    pub fn body(&self) -> &[u8] {
        &self.raw[OfpHeader::size()..]
    }
}

/// Reassembles OpenFlow messages from a TCP byte stream.
///
/// Reads from a socket arrive in arbitrary chunks; `feed` appends them and `next_frame` hands
/// back whole messages in arrival order.
#[derive(Default)]
pub struct MessageFramer {
    buf: Vec<u8>,
}

impl MessageFramer {
    pub fn new() -> MessageFramer {
        MessageFramer { buf: Vec::new() }
    }

    pub fn feed(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Number of buffered bytes not yet returned as a frame.
    pub fn pending(&self) -> usize {
        self.buf.len()
    }

    /// Returns the next complete message, `Ok(None)` if more bytes are needed, or an error if
    /// the stream cannot be framed (bad version or length).
    pub fn next_frame(&mut self) -> Result<Option<Frame>, OfpError> {
        if self.buf.len() < OfpHeader::size() {
            return Ok(None);
        }
        let header = OfpHeader::parse(&self.buf)?;
        let len = header.length();
        if self.buf.len() < len {
            return Ok(None);
        }
        let rest = self.buf.split_off(len);
        let raw = std::mem::replace(&mut self.buf, rest);
        Ok(Some(Frame { header, raw }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: [u8; 8] = [0x01, 0, 0, 8, 0, 0, 0, 1];
    const ECHO: [u8; 12] = [0x01, 2, 0, 12, 0, 0, 0, 2, 0xde, 0xad, 0xbe, 0xef];

    #[test]
    fn reassembles_split_messages() {
        let mut framer = MessageFramer::new();
        let stream: Vec<u8> = HELLO.iter().chain(ECHO.iter()).cloned().collect();

        framer.feed(&stream[..5]);
        assert!(framer.next_frame().unwrap().is_none());
        framer.feed(&stream[5..14]);
        let hello = framer.next_frame().unwrap().unwrap();
        assert_eq!(hello.raw, HELLO);
        assert!(framer.next_frame().unwrap().is_none());
        framer.feed(&stream[14..]);
        let echo = framer.next_frame().unwrap().unwrap();
        assert_eq!(echo.header.xid(), 2);
        assert_eq!(echo.body(), &[0xde, 0xad, 0xbe, 0xef]);
        assert_eq!(framer.pending(), 0);
    }

    #[test]
    fn bad_version_poisons_stream() {
        let mut framer = MessageFramer::new();
        framer.feed(&[0x02, 0, 0, 8, 0, 0, 0, 1]);
        assert!(framer.next_frame().is_err());
    }
}
