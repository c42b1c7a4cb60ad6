//! Error types for every layer of the proxy.

use thiserror::Error;

/// Failure to decode or encode an OpenFlow message.
#[derive(Error, Debug)]
pub enum OfpError {
    /// Peer speaks a protocol version other than 0x01.
    #[error("unsupported OpenFlow version {0:#04x}")]
    BadVersion(u8),

    /// Header type code outside the OpenFlow 1.0 range.
    #[error("unknown OpenFlow message type {0}")]
    UnknownType(u8),

    /// Header length smaller than the header itself.
    #[error("bad OpenFlow message length {0}")]
    BadLength(usize),

    /// Body ended before a fixed-size structure was complete.
    #[error("truncated {what} ({len} bytes)")]
    Truncated { what: &'static str, len: usize },

    /// A field carries a value OpenFlow 1.0 does not define.
    #[error("bad {field} value {value:#x}")]
    BadValue { field: &'static str, value: u32 },

    /// Encoded message would not fit the 16-bit length field.
    #[error("message too large ({0} bytes)")]
    TooLarge(usize),

    /// A read past the end of the body.
    #[error("unexpected end of message body")]
    ShortRead,
}

impl From<std::io::Error> for OfpError {
    // Cursor reads only fail on short input.
    fn from(_: std::io::Error) -> Self {
        OfpError::ShortRead
    }
}

/// Failure to decode a frame carried inside PACKET_IN/PACKET_OUT.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum PacketError {
    /// Frame shorter than the header being decoded.
    #[error("{what} too short ({len} bytes)")]
    TooShort { what: &'static str, len: usize },

    /// IPv4 header with a version other than 4 or an impossible IHL.
    #[error("malformed IPv4 header (version/ihl {0:#04x})")]
    BadIpv4Header(u8),

    /// 802.1Q VLAN id outside 0..=4095.
    #[error("VLAN id {0} out of range")]
    VlanOutOfRange(u16),
}

/// Violation of a slice registry invariant.  These indicate an upstream orchestration bug and
/// abort only the operation that hit them.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("VLAN {vlan} already owned by slice {owner}, cannot assign to {slice_id}")]
    VlanInUse {
        vlan: u16,
        owner: String,
        slice_id: String,
    },

    #[error("slice {slice_id} lists VLAN {vlan} more than once")]
    DuplicateVlan { slice_id: String, vlan: u16 },

    #[error("slice {0} is not registered")]
    UnknownSlice(String),

    #[error("slice {slice_id} asks for VLAN {vlan}, outside 0..=4095")]
    VlanOutOfRange { slice_id: String, vlan: u16 },
}

/// Controller URL that cannot be turned into a TCP endpoint.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum UrlError {
    #[error("controller URL {0:?} has no port")]
    MissingPort(String),

    #[error("controller URL {0:?} has a bad port")]
    BadPort(String),

    #[error("controller URL {0:?} has no host")]
    MissingHost(String),
}

/// Failure to load the configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("cannot parse {path}: {source}")]
    Parse {
        path: String,
        source: serde_json::Error,
    },

    #[error("hybrid port {port} maps to out-of-range VLAN {vlan}")]
    BadHybridVlan { port: u16, vlan: u16 },
}

/// Connection-level failure.  Any of these ends the receive loop that hit it.
#[derive(Error, Debug)]
pub enum VmocError {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Ofp(#[from] OfpError),

    #[error(transparent)]
    Url(#[from] UrlError),

    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// A message only a switch may send arrived from a controller (or vice versa).
    #[error("unexpected {0} message from peer")]
    UnexpectedMessage(&'static str),

    /// Switch hung up before completing the features handshake.
    #[error("switch closed the connection during handshake")]
    HandshakeIncomplete,
}

pub type Result<T, E = VmocError> = std::result::Result<T, E>;
