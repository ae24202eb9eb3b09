//! Collaborators provided by the host game server.
//!
//! The core never mutates the world itself; it asks these traits to do so,
//! and only from inside the world-execution context.

use crate::entities::player::{PlayerId, PlayerRef};
use crate::error::{HostError, TeleportError};
use crate::teleport::tpa::RequestKind;
use crate::teleport::warmup::CancelReason;
use crate::world::position::{Coordinate, Facing, Location};
use std::sync::Arc;
use std::time::Duration;

pub type WorldTask = Box<dyn FnOnce() + Send + 'static>;

pub trait WorldExecutor: Send + Sync {
    /// Queue `task` to run inside the authoritative simulation tick.
    fn run_on_world_thread(&self, task: WorldTask);

    fn current_position(&self, player: PlayerId) -> Option<Location>;

    fn teleport(
        &self,
        player: PlayerId,
        world: &str,
        coordinate: Coordinate,
        facing: Facing,
    ) -> Result<(), HostError>;
}

/// Terrain lookups used by the random-location search. Block coordinates.
pub trait WorldQuery: Send + Sync {
    fn is_chunk_loaded(&self, world: &str, x: i32, z: i32) -> bool;

    /// Try to bring the column into memory; false if it did not arrive in time.
    fn load_chunk(&self, world: &str, x: i32, z: i32, timeout: Duration) -> bool;

    /// Highest solid block in the column, if any.
    fn ground_height_at(&self, world: &str, x: i32, z: i32) -> Option<i32>;

    fn is_hazard_at(&self, world: &str, x: i32, y: i32, z: i32) -> bool;
}

pub trait Capabilities: Send + Sync {
    fn can_bypass_cooldown(&self, player: PlayerId, command: &str) -> bool;

    fn can_bypass_warmup(&self, player: PlayerId, command: &str) -> bool;

    fn can_record_death_location(&self, _player: PlayerId) -> bool {
        true
    }
}

/// Read side of the home/warp/spawn records.
pub trait NamedLocations: Send + Sync {
    fn home(&self, player: PlayerId, name: Option<&str>) -> Option<Location>;

    fn warp(&self, name: &str) -> Option<Location>;

    fn spawn(&self, world: &str) -> Option<Location>;
}

pub trait PlayerDirectory: Send + Sync {
    fn find_online(&self, name: &str) -> Option<PlayerRef>;

    fn is_online(&self, player: PlayerId) -> bool;
}

/// Something a player should be told about. Formatting is up to the host.
#[derive(Debug, Clone, PartialEq)]
pub enum TeleportEvent {
    WarmupStarted { command: &'static str, seconds: u64 },
    WarmupCountdown { seconds: u64 },
    WarmupCancelled { reason: CancelReason },
    Teleported { command: &'static str, destination: Location },
    TeleportFailed { command: &'static str, error: TeleportError },
    RequestReceived { from: String, kind: RequestKind },
    RequestAccepted { by: String },
    RequestDenied { by: String },
}

pub trait PlayerNotifier: Send + Sync {
    fn notify(&self, player: PlayerId, event: TeleportEvent);
}

/// Bundle of every collaborator the orchestrator talks to.
#[derive(Clone)]
pub struct Host {
    pub executor: Arc<dyn WorldExecutor>,
    pub query: Arc<dyn WorldQuery>,
    pub capabilities: Arc<dyn Capabilities>,
    pub locations: Arc<dyn NamedLocations>,
    pub directory: Arc<dyn PlayerDirectory>,
    pub notifier: Arc<dyn PlayerNotifier>,
}

impl Host {
    /// Use one object for every collaborator.
    pub fn from_world<W>(world: Arc<W>) -> Self
    where
        W: WorldExecutor
            + WorldQuery
            + Capabilities
            + NamedLocations
            + PlayerDirectory
            + PlayerNotifier
            + 'static,
    {
        Self {
            executor: world.clone(),
            query: world.clone(),
            capabilities: world.clone(),
            locations: world.clone(),
            directory: world.clone(),
            notifier: world,
        }
    }
}
