//! Router and request/reply framings.
//!
//! Router framing, pushed by the message router below the request/reply
//! frame:
//!
//! ```text
//! u8  publish
//! u8  local dispatch
//! i16 padding (0)
//! i32 len | bytes route (UTF-8)
//! ```
//!
//! Request/reply framing, pushed by the request/reply endpoint directly under
//! the routing envelope:
//!
//! ```text
//! i32 seq num
//! i32 kind        Request | Response | CancellationRequest | CancellationResponse
//! i32 corr id
//! ```

use crate::message::Message;
use crate::types::Route;
use crate::WireError;

/// Dispatch metadata the router sends along with a routed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouterFraming {
    pub publish: bool,
    pub local_dispatch: bool,
    pub route: Route,
}

impl RouterFraming {
    /// Pushes the framing as a new frame.
    pub fn encode(&self, message: &mut Message) {
        let mut writer = message.push_frame().writer(true);
        writer.put_bool(self.publish);
        writer.put_bool(self.local_dispatch);
        writer.put_i16(0);
        writer.put_prefixed(self.route.as_bytes());
    }

    /// Reads the framing from the current frame and pops it.
    ///
    /// On any error the frame index is left unchanged.
    pub fn decode(message: &mut Message) -> Result<Self, WireError> {
        let frame = message.current_frame().ok_or(WireError::NoFrame)?;
        let mut reader = frame.reader();

        let publish = reader.read_bool()?;
        let local_dispatch = reader.read_bool()?;
        reader.read_i16()?;
        let route = Route::from_utf8(reader.read_prefixed()?)?;

        let _ = message.pop_frame();
        Ok(Self { publish, local_dispatch, route })
    }
}

/// Wire kind of a request/reply frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum RequestKind {
    Request = 1,
    Response = 2,
    CancellationRequest = 3,
    CancellationResponse = 4,
}

impl RequestKind {
    pub fn from_i32(value: i32) -> Result<Self, WireError> {
        match value {
            1 => Ok(Self::Request),
            2 => Ok(Self::Response),
            3 => Ok(Self::CancellationRequest),
            4 => Ok(Self::CancellationResponse),
            other => Err(WireError::UnknownRequestKind(other)),
        }
    }
}

/// Correlation header for request/reply traffic.
///
/// `seq_num` identifies this transmission; `corr_id` names the request a
/// response or cancellation refers to, and is zero on initial requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestFraming {
    pub seq_num: i32,
    pub kind: RequestKind,
    pub corr_id: i32,
}

impl RequestFraming {
    /// Pushes the framing as a new frame.
    pub fn encode(&self, message: &mut Message) {
        let mut writer = message.push_frame().writer(true);
        writer.put_i32(self.seq_num);
        writer.put_i32(self.kind as i32);
        writer.put_i32(self.corr_id);
    }

    /// Reads the framing from the current frame and pops it.
    ///
    /// On any error the frame index is left unchanged.
    pub fn decode(message: &mut Message) -> Result<Self, WireError> {
        let frame = message.current_frame().ok_or(WireError::NoFrame)?;
        let mut reader = frame.reader();

        let seq_num = reader.read_i32()?;
        let kind = RequestKind::from_i32(reader.read_i32()?)?;
        let corr_id = reader.read_i32()?;

        let _ = message.pop_frame();
        Ok(Self { seq_num, kind, corr_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn router_framing_roundtrip() {
        let mut msg = Message::with_payload(b"payload".to_vec());
        let framing = RouterFraming {
            publish: true,
            local_dispatch: false,
            route: Route::new("orders.OrderPlaced"),
        };
        framing.encode(&mut msg);

        let decoded = RouterFraming::decode(&mut msg).expect("decode");
        assert_eq!(decoded, framing);
        assert_eq!(msg.frame_index(), 1);
    }

    #[test]
    fn router_framing_layout_is_fixed() {
        let mut msg = Message::new();
        let framing = RouterFraming {
            publish: false,
            local_dispatch: true,
            route: Route::new("ab"),
        };
        framing.encode(&mut msg);
        let frame = msg.current_frame().expect("framing frame");
        assert_eq!(frame.bytes(), [0, 1, 0, 0, 2, 0, 0, 0, b'a', b'b']);
    }

    #[test]
    fn router_framing_decode_failure_leaves_index_unchanged() {
        let mut msg = Message::new();
        msg.push_frame().writer(true).put_bool(true);
        assert!(matches!(
            RouterFraming::decode(&mut msg),
            Err(WireError::Truncated { .. })
        ));
        assert_eq!(msg.frame_index(), 1);
    }

    #[test]
    fn request_framing_roundtrip() {
        let mut msg = Message::with_payload(b"payload".to_vec());
        for kind in [
            RequestKind::Request,
            RequestKind::Response,
            RequestKind::CancellationRequest,
            RequestKind::CancellationResponse,
        ] {
            let framing = RequestFraming { seq_num: 7, kind, corr_id: 3 };
            framing.encode(&mut msg);
            assert_eq!(RequestFraming::decode(&mut msg).expect("decode"), framing);
        }
        assert_eq!(msg.frame_index(), 1);
    }

    #[test]
    fn request_framing_rejects_unknown_kind() {
        let mut msg = Message::new();
        let mut writer = msg.push_frame().writer(true);
        writer.put_i32(1);
        writer.put_i32(0);
        writer.put_i32(0);
        assert!(matches!(
            RequestFraming::decode(&mut msg),
            Err(WireError::UnknownRequestKind(0))
        ));
        assert_eq!(msg.frame_index(), 1);
    }

    #[test]
    fn layers_nest_and_unwind_in_order() {
        let mut msg = Message::with_payload(b"user payload".to_vec());
        RouterFraming {
            publish: false,
            local_dispatch: false,
            route: Route::new("orders.PlaceOrder"),
        }
        .encode(&mut msg);
        RequestFraming { seq_num: 1, kind: RequestKind::Request, corr_id: 0 }.encode(&mut msg);

        assert_eq!(msg.frame_index(), 3);
        let framing = RequestFraming::decode(&mut msg).expect("request framing");
        assert_eq!(framing.seq_num, 1);
        let router = RouterFraming::decode(&mut msg).expect("router framing");
        assert_eq!(router.route.as_str(), "orders.PlaceOrder");
        assert_eq!(msg.current_frame().expect("payload").bytes(), b"user payload");
    }
}
