use serde::{Deserialize, Serialize};
use weft_wire::EndPointAddress;

use crate::DirectoryError;

bitflags::bitflags! {
    /// Flags attached to a route registration.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct RouteRegistrationOptions: u32 {
        /// The registration is bound to the registering session rather than
        /// durable.
        const TRANSIENT = 1;
        /// The end point is considered for publish dispatch only, never for
        /// point-to-point.
        const PUBLISH_ONLY = 1 << 1;
        /// The route is visible only to the process that registered it.
        const LOCAL_DISPATCH_ONLY = 1 << 2;
    }
}

/// One resolved registration of a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteTarget {
    pub end_point: EndPointAddress,
    pub options: RouteRegistrationOptions,
}

/// Msgpack record form of a [`RouteTarget`] directory entry.
#[derive(Serialize, Deserialize)]
struct TargetRecord {
    options: u32,
    end_point: String,
}

pub(crate) fn encode_target(target: &RouteTarget) -> Result<Vec<u8>, DirectoryError> {
    let record = TargetRecord {
        options: target.options.bits(),
        end_point: target.end_point.as_str().to_owned(),
    };
    rmp_serde::to_vec(&record).map_err(|err| DirectoryError::invalid_entry(err.to_string()))
}

pub(crate) fn decode_target(payload: &[u8]) -> Result<RouteTarget, DirectoryError> {
    let record: TargetRecord = rmp_serde::from_slice(payload)
        .map_err(|err| DirectoryError::invalid_entry(err.to_string()))?;
    Ok(RouteTarget {
        end_point: EndPointAddress::new(&record.end_point)?,
        options: RouteRegistrationOptions::from_bits_truncate(record.options),
    })
}
