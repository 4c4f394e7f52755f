//! Route directory: which end points have registered a handler route, and
//! with which options.

use std::collections::HashSet;
use std::sync::Arc;

use weft_coord::{CoordPath, CoordinationService, CreateMode, SessionId};
use weft_wire::{EndPointAddress, Route};

use crate::options::{decode_target, encode_target};
use crate::{encode_segment, DirectoryError, RouteRegistrationOptions, RouteTarget};

/// Directory of route registrations.
///
/// Forward entries live under `/routes/<route>/<end-point>-<session>`; the
/// reverse index under `/reverse-routes/<session>/<end-point>/<route>` lets
/// [`RouteManager::remove_routes`] take down exactly the current session's
/// registrations. Transient registrations are ephemeral.
///
/// The manager offers per-session consistency only: concurrent sessions
/// registering the same `(end point, route)` leave whichever options the
/// dedup in [`RouteManager::get_routes`] happens to surface.
pub struct RouteManager {
    coord: Arc<dyn CoordinationService>,
}

impl RouteManager {
    pub fn new(coord: Arc<dyn CoordinationService>) -> Self {
        Self { coord }
    }

    fn route_dir(route_segment: &str) -> Result<CoordPath, DirectoryError> {
        Ok(CoordPath::root().child("routes")?.child(route_segment)?)
    }

    fn reverse_dir(
        session: &SessionId,
        end_point: &EndPointAddress,
    ) -> Result<CoordPath, DirectoryError> {
        Ok(CoordPath::root()
            .child("reverse-routes")?
            .child(session.as_str())?
            .child(encode_segment(end_point.as_bytes()))?)
    }

    fn entry_id(end_point: &EndPointAddress, session: &SessionId) -> String {
        format!("{}-{}", encode_segment(end_point.as_bytes()), session)
    }

    fn mode(options: RouteRegistrationOptions) -> CreateMode {
        if options.contains(RouteRegistrationOptions::TRANSIENT) {
            CreateMode::Ephemeral
        } else {
            CreateMode::Persistent
        }
    }

    /// Registers `route` for `end_point`, writing the forward entry and the
    /// session's reverse entry. Idempotent per session.
    pub async fn add_route(
        &self,
        end_point: &EndPointAddress,
        route: &Route,
        options: RouteRegistrationOptions,
    ) -> Result<(), DirectoryError> {
        let session = self.coord.session().await?;
        let payload = encode_target(&RouteTarget { end_point: end_point.clone(), options })?;
        let mode = Self::mode(options);

        let route_segment = encode_segment(route.as_bytes());
        let forward = Self::route_dir(&route_segment)?
            .child(Self::entry_id(end_point, &session))?;
        self.coord.get_or_create(&forward, &payload, mode).await?;

        let reverse = Self::reverse_dir(&session, end_point)?.child(route_segment)?;
        self.coord.get_or_create(&reverse, &payload, mode).await?;
        Ok(())
    }

    /// Withdraws this session's registration of `route` for `end_point`.
    pub async fn remove_route(
        &self,
        end_point: &EndPointAddress,
        route: &Route,
    ) -> Result<(), DirectoryError> {
        let session = self.coord.session().await?;
        let route_segment = encode_segment(route.as_bytes());

        let forward = Self::route_dir(&route_segment)?
            .child(Self::entry_id(end_point, &session))?;
        self.coord.delete(&forward, false).await?;

        let reverse = Self::reverse_dir(&session, end_point)?.child(route_segment)?;
        self.coord.delete(&reverse, false).await?;
        Ok(())
    }

    /// Withdraws every registration this session made for `end_point`.
    ///
    /// Forward entries are always deleted. Reverse entries of persistent
    /// routes are kept unless `remove_persistent`, so a later session can
    /// still see which durable routes this end point owns.
    pub async fn remove_routes(
        &self,
        end_point: &EndPointAddress,
        remove_persistent: bool,
    ) -> Result<(), DirectoryError> {
        let session = self.coord.session().await?;
        let reverse_dir = Self::reverse_dir(&session, end_point)?;

        for route_segment in self.coord.children(&reverse_dir).await? {
            let reverse = reverse_dir.child(&route_segment)?;
            let transient = match self.coord.get(&reverse).await? {
                Some(payload) => decode_target(&payload)
                    .map(|t| t.options.contains(RouteRegistrationOptions::TRANSIENT))
                    .unwrap_or(true),
                None => true,
            };

            let forward = Self::route_dir(&route_segment)?
                .child(Self::entry_id(end_point, &session))?;
            self.coord.delete(&forward, false).await?;

            if transient || remove_persistent {
                self.coord.delete(&reverse, false).await?;
            }
        }
        Ok(())
    }

    /// Every current registration of `route`, deduplicated by end point.
    pub async fn get_routes(&self, route: &Route) -> Result<Vec<RouteTarget>, DirectoryError> {
        let dir = Self::route_dir(&encode_segment(route.as_bytes()))?;
        let mut seen = HashSet::new();
        let mut targets = Vec::new();
        for entry in self.coord.children(&dir).await? {
            let Some(payload) = self.coord.get(&dir.child(&entry)?).await? else {
                continue;
            };
            match decode_target(&payload) {
                Ok(target) => {
                    if seen.insert(target.end_point.clone()) {
                        targets.push(target);
                    }
                }
                Err(err) => {
                    log::warn!("route-manager: undecodable entry for {route}: {err}");
                }
            }
        }
        Ok(targets)
    }
}
