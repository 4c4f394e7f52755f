//! Logical-name directory: which transport addresses currently serve an
//! end point.

use std::marker::PhantomData;
use std::sync::Arc;

use weft_coord::{CoordPath, CoordinationService, CreateMode};
use weft_wire::{EndPointAddress, TransportAddress};

use crate::{encode_segment, DirectoryError};

/// Directory of live replicas per logical end point.
///
/// Every registered replica owns one ephemeral entry
/// `/maps/<end-point>/<session>` valued with its serialised transport
/// address. Session loss deletes the entry; deleting it unregisters the
/// replica.
pub struct RouteMap<A> {
    coord: Arc<dyn CoordinationService>,
    _address: PhantomData<fn() -> A>,
}

impl<A: TransportAddress> RouteMap<A> {
    pub fn new(coord: Arc<dyn CoordinationService>) -> Self {
        Self { coord, _address: PhantomData }
    }

    fn end_point_path(end_point: &EndPointAddress) -> Result<CoordPath, DirectoryError> {
        Ok(CoordPath::root()
            .child("maps")?
            .child(encode_segment(end_point.as_bytes()))?)
    }

    /// Publishes `address` as a live replica of `end_point` under the current
    /// session. Idempotent for the same session.
    pub async fn map(
        &self,
        end_point: &EndPointAddress,
        address: &A,
    ) -> Result<(), DirectoryError> {
        let session = self.coord.session().await?;
        let entry = Self::end_point_path(end_point)?.child(session.as_str())?;
        self.coord
            .get_or_create(&entry, &address.to_bytes(), CreateMode::Ephemeral)
            .await?;
        Ok(())
    }

    /// Withdraws this session's entry for `end_point`. A mismatched address
    /// leaves the entry in place without error.
    pub async fn unmap(
        &self,
        end_point: &EndPointAddress,
        address: &A,
    ) -> Result<(), DirectoryError> {
        let session = self.coord.session().await?;
        let entry = Self::end_point_path(end_point)?.child(session.as_str())?;
        if let Some(stored) = self.coord.get(&entry).await? {
            if stored != address.to_bytes() {
                return Ok(());
            }
        }
        self.coord.delete(&entry, false).await?;
        Ok(())
    }

    /// Deletes every entry of `end_point`, all sessions included.
    pub async fn unmap_all(&self, end_point: &EndPointAddress) -> Result<(), DirectoryError> {
        let path = Self::end_point_path(end_point)?;
        self.coord.delete(&path, true).await?;
        Ok(())
    }

    /// The transport addresses currently serving `end_point`.
    ///
    /// Entries that vanish mid-read or fail to decode are skipped.
    pub async fn get_maps(&self, end_point: &EndPointAddress) -> Result<Vec<A>, DirectoryError> {
        let path = Self::end_point_path(end_point)?;
        let mut addresses = Vec::new();
        for child in self.coord.children(&path).await? {
            let Some(value) = self.coord.get(&path.child(&child)?).await? else {
                continue;
            };
            match A::from_bytes(&value) {
                Ok(address) => addresses.push(address),
                Err(err) => {
                    log::warn!("route-map: undecodable address for {end_point}: {err}");
                }
            }
        }
        Ok(addresses)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_coord::MemoryCoordinationService;
    use weft_wire::WireError;

    #[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
    struct TestAddr(String);

    impl TransportAddress for TestAddr {
        fn to_bytes(&self) -> Vec<u8> {
            self.0.clone().into_bytes()
        }

        fn from_bytes(bytes: &[u8]) -> Result<Self, WireError> {
            std::str::from_utf8(bytes)
                .map(|raw| Self(raw.to_owned()))
                .map_err(|_| WireError::InvalidTransportAddress)
        }
    }

    fn end_point(name: &str) -> EndPointAddress {
        EndPointAddress::new(name).expect("valid name")
    }

    #[tokio::test]
    async fn map_publishes_one_ephemeral_entry_per_session() {
        let coord = Arc::new(MemoryCoordinationService::new());
        let maps = RouteMap::<TestAddr>::new(coord.clone());
        let ep = end_point("orders");
        let addr = TestAddr("host-1".into());

        maps.map(&ep, &addr).await.expect("map");
        maps.map(&ep, &addr).await.expect("idempotent re-map");

        assert_eq!(maps.get_maps(&ep).await.expect("get"), [addr.clone()]);

        coord.expire_session();
        assert!(maps.get_maps(&ep).await.expect("get").is_empty());
    }

    #[tokio::test]
    async fn unmap_removes_only_matching_address() {
        let coord = Arc::new(MemoryCoordinationService::new());
        let maps = RouteMap::<TestAddr>::new(coord);
        let ep = end_point("orders");
        let addr = TestAddr("host-1".into());
        maps.map(&ep, &addr).await.expect("map");

        maps.unmap(&ep, &TestAddr("other-host".into())).await.expect("mismatch is no error");
        assert_eq!(maps.get_maps(&ep).await.expect("get").len(), 1);

        maps.unmap(&ep, &addr).await.expect("unmap");
        assert!(maps.get_maps(&ep).await.expect("get").is_empty());
    }

    #[tokio::test]
    async fn unmap_all_clears_every_session() {
        let coord = Arc::new(MemoryCoordinationService::new());
        let maps = RouteMap::<TestAddr>::new(coord.clone());
        let ep = end_point("orders");

        maps.map(&ep, &TestAddr("host-1".into())).await.expect("map");
        coord.expire_session();
        maps.map(&ep, &TestAddr("host-2".into())).await.expect("map under new session");

        maps.unmap_all(&ep).await.expect("unmap all");
        assert!(maps.get_maps(&ep).await.expect("get").is_empty());
    }

    #[tokio::test]
    async fn get_maps_skips_undecodable_entries() {
        let coord = Arc::new(MemoryCoordinationService::new());
        let maps = RouteMap::<TestAddr>::new(coord.clone());
        let ep = end_point("orders");
        maps.map(&ep, &TestAddr("host-1".into())).await.expect("map");

        let rogue = CoordPath::root()
            .child("maps")
            .and_then(|p| p.child(encode_segment(ep.as_bytes())))
            .and_then(|p| p.child("rogue-session"))
            .expect("path");
        coord
            .create(&rogue, &[0xFF, 0xFE], weft_coord::CreateMode::Ephemeral)
            .await
            .expect("create");

        assert_eq!(maps.get_maps(&ep).await.expect("get"), [TestAddr("host-1".into())]);
    }
}
