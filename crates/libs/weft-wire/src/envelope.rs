//! The routing envelope prefixed to every transmitted message.
//!
//! Fixed little-endian layout:
//!
//! ```text
//! i32 kind                            Unknown | Message | Misrouted |
//!                                     EndPointNotPresent | ProtocolNotSupported
//! i32 len | bytes local end-point     sender logical name, may be empty
//! i32 len | bytes local address       sender transport address, may be empty
//! i32 len | bytes remote end-point    intended recipient logical name
//! i32 len | bytes remote address     intended transport address, may be empty
//! ```

use crate::message::Message;
use crate::types::EndPointAddress;
use crate::WireError;

/// Wire kind of a routed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum EnvelopeKind {
    Unknown = 0,
    Message = 1,
    Misrouted = 2,
    EndPointNotPresent = 3,
    ProtocolNotSupported = 4,
}

impl EnvelopeKind {
    pub fn from_i32(value: i32) -> Result<Self, WireError> {
        match value {
            0 => Ok(Self::Unknown),
            1 => Ok(Self::Message),
            2 => Ok(Self::Misrouted),
            3 => Ok(Self::EndPointNotPresent),
            4 => Ok(Self::ProtocolNotSupported),
            other => Err(WireError::UnknownEnvelopeKind(other)),
        }
    }
}

/// Decoded routing envelope.
///
/// Transport addresses stay in their serialised byte form here; the fabric
/// converts through [`crate::TransportAddress`] where it needs identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutingEnvelope {
    pub kind: EnvelopeKind,
    pub local_end_point: Option<EndPointAddress>,
    pub local_address: Vec<u8>,
    pub remote_end_point: Option<EndPointAddress>,
    pub remote_address: Vec<u8>,
}

impl RoutingEnvelope {
    /// Pushes the envelope as a new outermost frame.
    pub fn encode(&self, message: &mut Message) {
        let mut writer = message.push_frame().writer(true);
        writer.put_i32(self.kind as i32);
        writer.put_prefixed(
            self.local_end_point.as_ref().map(EndPointAddress::as_bytes).unwrap_or_default(),
        );
        writer.put_prefixed(&self.local_address);
        writer.put_prefixed(
            self.remote_end_point.as_ref().map(EndPointAddress::as_bytes).unwrap_or_default(),
        );
        writer.put_prefixed(&self.remote_address);
    }

    /// Reads the envelope from the current frame and pops it.
    ///
    /// On any error the frame index is left unchanged.
    pub fn decode(message: &mut Message) -> Result<Self, WireError> {
        let frame = message.current_frame().ok_or(WireError::NoFrame)?;
        let mut reader = frame.reader();

        let kind = EnvelopeKind::from_i32(reader.read_i32()?)?;
        let local_end_point = read_end_point(&mut reader)?;
        let local_address = reader.read_prefixed()?.to_vec();
        let remote_end_point = read_end_point(&mut reader)?;
        let remote_address = reader.read_prefixed()?.to_vec();

        let _ = message.pop_frame();
        Ok(Self { kind, local_end_point, local_address, remote_end_point, remote_address })
    }
}

fn read_end_point(
    reader: &mut crate::message::FrameReader<'_>,
) -> Result<Option<EndPointAddress>, WireError> {
    let bytes = reader.read_prefixed()?;
    if bytes.is_empty() {
        return Ok(None);
    }
    EndPointAddress::from_utf8(bytes).map(Some)
}
