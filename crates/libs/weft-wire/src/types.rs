//! Addressing vocabulary shared by every layer of the fabric.

use std::fmt;
use std::sync::Arc;

use crate::WireError;

/// Stable logical name of a messaging endpoint, e.g. `"inventory-service"`.
///
/// Non-empty UTF-8; equality is value-based. Cloning is cheap, the name is
/// reference-counted. Serialised on the wire as its raw UTF-8 bytes.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndPointAddress(Arc<str>);

impl EndPointAddress {
    /// Creates an address from a non-empty name.
    pub fn new(name: impl AsRef<str>) -> Result<Self, WireError> {
        let name = name.as_ref();
        if name.is_empty() {
            return Err(WireError::EmptyEndPointAddress);
        }
        Ok(Self(Arc::from(name)))
    }

    /// Parses an address from its UTF-8 wire bytes.
    pub fn from_utf8(bytes: &[u8]) -> Result<Self, WireError> {
        let name = std::str::from_utf8(bytes)
            .map_err(|_| WireError::InvalidUtf8 { field: "end-point address" })?;
        Self::new(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for EndPointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for EndPointAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EndPointAddress({})", self.0)
    }
}

/// String key locating message handlers, typically derived from a serialised
/// message-type name.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Route(Arc<str>);

impl Route {
    pub fn new(key: impl AsRef<str>) -> Self {
        Self(Arc::from(key.as_ref()))
    }

    /// Parses a route from its UTF-8 wire bytes.
    pub fn from_utf8(bytes: &[u8]) -> Result<Self, WireError> {
        let key = std::str::from_utf8(bytes)
            .map_err(|_| WireError::InvalidUtf8 { field: "route" })?;
        Ok(Self::new(key))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.0.as_bytes()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Route({})", self.0)
    }
}

impl From<&str> for Route {
    fn from(key: &str) -> Self {
        Self::new(key)
    }
}

/// Ordered sequence of routes from most-specific to least, e.g. a concrete
/// message type followed by each of its base types.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteHierarchy(Vec<Route>);

impl RouteHierarchy {
    /// Creates a hierarchy from a non-empty route list, most-specific first.
    pub fn new(routes: Vec<Route>) -> Result<Self, WireError> {
        if routes.is_empty() {
            return Err(WireError::EmptyRouteHierarchy);
        }
        Ok(Self(routes))
    }

    pub fn routes(&self) -> &[Route] {
        &self.0
    }

    pub fn most_specific(&self) -> &Route {
        &self.0[0]
    }
}

impl From<Route> for RouteHierarchy {
    fn from(route: Route) -> Self {
        Self(vec![route])
    }
}

impl<'a> IntoIterator for &'a RouteHierarchy {
    type Item = &'a Route;
    type IntoIter = std::slice::Iter<'a, Route>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Opaque identity of a physical transport endpoint.
///
/// The address converter is folded into the trait: implementations define
/// their own byte form. `Default` is the distinguished unset value; it is
/// never valid as a destination and round-trips through an empty byte string.
pub trait TransportAddress:
    Clone + Eq + std::hash::Hash + Default + fmt::Debug + Send + Sync + 'static
{
    /// Serialises the address. The unset address serialises to empty bytes.
    fn to_bytes(&self) -> Vec<u8>;

    /// Parses an address from bytes. Empty bytes yield the unset address.
    fn from_bytes(bytes: &[u8]) -> Result<Self, WireError>;

    fn is_unset(&self) -> bool {
        *self == Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn end_point_address_rejects_empty() {
        assert!(matches!(
            EndPointAddress::new(""),
            Err(WireError::EmptyEndPointAddress)
        ));
        assert!(matches!(
            EndPointAddress::from_utf8(b""),
            Err(WireError::EmptyEndPointAddress)
        ));
    }

    #[test]
    fn end_point_address_roundtrips_utf8() {
        let ep = EndPointAddress::new("service-a").expect("valid name");
        let back = EndPointAddress::from_utf8(ep.as_bytes()).expect("roundtrip");
        assert_eq!(ep, back);
    }

    #[test]
    fn end_point_address_rejects_invalid_utf8() {
        assert!(matches!(
            EndPointAddress::from_utf8(&[0xFF, 0xFE]),
            Err(WireError::InvalidUtf8 { .. })
        ));
    }

    #[test]
    fn hierarchy_rejects_empty() {
        assert!(matches!(
            RouteHierarchy::new(Vec::new()),
            Err(WireError::EmptyRouteHierarchy)
        ));
    }

    #[test]
    fn hierarchy_preserves_order() {
        let hierarchy =
            RouteHierarchy::new(vec![Route::new("Concrete"), Route::new("Base")])
                .expect("non-empty");
        assert_eq!(hierarchy.most_specific().as_str(), "Concrete");
        let keys: Vec<&str> = hierarchy.into_iter().map(Route::as_str).collect();
        assert_eq!(keys, ["Concrete", "Base"]);
    }
}
