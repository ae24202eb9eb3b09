//! In-process stand-in for a host game server.
//!
//! Drives the console and the tests: world tasks are queued and only run when
//! [`SimWorld::run_world_tasks`] is called, which plays the part of one
//! simulation tick.

use crate::entities::player::{PlayerId, PlayerRef};
use crate::error::HostError;
use crate::sync::lock;
use crate::world::host::{
    Capabilities, NamedLocations, PlayerDirectory, PlayerNotifier, TeleportEvent, WorldExecutor,
    WorldQuery, WorldTask,
};
use crate::world::position::{Coordinate, Facing, Location};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;
use std::time::Duration;

pub const DEFAULT_HOME: &str = "home";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ground {
    Flat(i32),
    /// Bumpy terrain derived from the column coordinates.
    Rolling { base: i32, amplitude: i32 },
    Void,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TeleportRecord {
    pub player: PlayerId,
    pub destination: Location,
}

#[derive(Debug, Clone)]
struct SimPlayer {
    name: String,
    location: Location,
    online: bool,
}

#[derive(Debug)]
struct Terrain {
    ground: Ground,
    hazards: HashSet<(String, i32, i32)>,
    preloaded: bool,
    loadable: bool,
}

#[derive(Debug, Default)]
struct Grants {
    cooldown_bypass: HashSet<(PlayerId, String)>,
    warmup_bypass: HashSet<(PlayerId, String)>,
    no_death_tracking: HashSet<PlayerId>,
}

#[derive(Debug, Default)]
struct Places {
    homes: HashMap<(PlayerId, String), Location>,
    warps: HashMap<String, Location>,
    spawns: HashMap<String, Location>,
}

pub struct SimWorld {
    tasks: Mutex<VecDeque<WorldTask>>,
    players: Mutex<HashMap<PlayerId, SimPlayer>>,
    teleports: Mutex<Vec<TeleportRecord>>,
    events: Mutex<Vec<(PlayerId, TeleportEvent)>>,
    terrain: Mutex<Terrain>,
    grants: Mutex<Grants>,
    places: Mutex<Places>,
}

impl Default for SimWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimWorld {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            players: Mutex::new(HashMap::new()),
            teleports: Mutex::new(Vec::new()),
            events: Mutex::new(Vec::new()),
            terrain: Mutex::new(Terrain {
                ground: Ground::Flat(64),
                hazards: HashSet::new(),
                preloaded: true,
                loadable: true,
            }),
            grants: Mutex::new(Grants::default()),
            places: Mutex::new(Places::default()),
        }
    }

    pub fn add_player(&self, name: &str, location: Location) -> PlayerRef {
        let player = PlayerRef::new(PlayerId::random(), name);
        lock(&self.players).insert(
            player.id,
            SimPlayer {
                name: name.to_string(),
                location,
                online: true,
            },
        );
        player
    }

    pub fn move_player(&self, player: PlayerId, location: Location) {
        if let Some(entry) = lock(&self.players).get_mut(&player) {
            entry.location = location;
        }
    }

    pub fn disconnect(&self, player: PlayerId) {
        if let Some(entry) = lock(&self.players).get_mut(&player) {
            entry.online = false;
        }
    }

    pub fn set_home(&self, player: PlayerId, name: &str, location: Location) {
        lock(&self.places)
            .homes
            .insert((player, name.to_ascii_lowercase()), location);
    }

    pub fn set_warp(&self, name: &str, location: Location) {
        lock(&self.places)
            .warps
            .insert(name.to_ascii_lowercase(), location);
    }

    pub fn set_spawn(&self, location: Location) {
        lock(&self.places)
            .spawns
            .insert(location.world.clone(), location);
    }

    pub fn set_ground(&self, ground: Ground) {
        lock(&self.terrain).ground = ground;
    }

    pub fn add_hazard(&self, world: &str, x: i32, z: i32) {
        lock(&self.terrain)
            .hazards
            .insert((world.to_string(), x, z));
    }

    pub fn set_chunks(&self, preloaded: bool, loadable: bool) {
        let mut terrain = lock(&self.terrain);
        terrain.preloaded = preloaded;
        terrain.loadable = loadable;
    }

    pub fn grant_cooldown_bypass(&self, player: PlayerId, command: &str) {
        lock(&self.grants)
            .cooldown_bypass
            .insert((player, command.to_string()));
    }

    pub fn grant_warmup_bypass(&self, player: PlayerId, command: &str) {
        lock(&self.grants)
            .warmup_bypass
            .insert((player, command.to_string()));
    }

    pub fn deny_death_tracking(&self, player: PlayerId) {
        lock(&self.grants).no_death_tracking.insert(player);
    }

    /// Run every queued world task, including ones queued while running.
    pub fn run_world_tasks(&self) -> usize {
        let mut ran = 0;
        loop {
            let task = lock(&self.tasks).pop_front();
            let Some(task) = task else {
                return ran;
            };
            task();
            ran += 1;
        }
    }

    pub fn queued_tasks(&self) -> usize {
        lock(&self.tasks).len()
    }

    pub fn teleports(&self) -> Vec<TeleportRecord> {
        lock(&self.teleports).clone()
    }

    pub fn events_for(&self, player: PlayerId) -> Vec<TeleportEvent> {
        lock(&self.events)
            .iter()
            .filter(|(target, _)| *target == player)
            .map(|(_, event)| event.clone())
            .collect()
    }

    pub fn take_events(&self) -> Vec<(PlayerId, TeleportEvent)> {
        std::mem::take(&mut *lock(&self.events))
    }

    pub fn player_name(&self, player: PlayerId) -> Option<String> {
        lock(&self.players).get(&player).map(|entry| entry.name.clone())
    }

    fn column_height(ground: Ground, x: i32, z: i32) -> Option<i32> {
        match ground {
            Ground::Flat(height) => Some(height),
            Ground::Void => None,
            Ground::Rolling { base, amplitude } => {
                let mut state = (x as i64 as u64)
                    .wrapping_mul(0x9e37_79b9_7f4a_7c15)
                    ^ (z as i64 as u64).wrapping_mul(0xc2b2_ae3d_27d4_eb4f);
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
                let span = (amplitude.max(0) as u64) * 2 + 1;
                let offset = ((state >> 33) % span) as i32 - amplitude.max(0);
                Some(base + offset)
            }
        }
    }
}

impl WorldExecutor for SimWorld {
    fn run_on_world_thread(&self, task: WorldTask) {
        lock(&self.tasks).push_back(task);
    }

    fn current_position(&self, player: PlayerId) -> Option<Location> {
        lock(&self.players)
            .get(&player)
            .filter(|entry| entry.online)
            .map(|entry| entry.location.clone())
    }

    fn teleport(
        &self,
        player: PlayerId,
        world: &str,
        coordinate: Coordinate,
        facing: Facing,
    ) -> Result<(), HostError> {
        if world.is_empty() {
            return Err(HostError::UnknownWorld(world.to_string()));
        }
        let destination = Location {
            world: world.to_string(),
            coordinate,
            facing,
        };
        {
            let mut players = lock(&self.players);
            let entry = players
                .get_mut(&player)
                .filter(|entry| entry.online)
                .ok_or(HostError::PlayerOffline)?;
            entry.location = destination.clone();
        }
        lock(&self.teleports).push(TeleportRecord {
            player,
            destination,
        });
        Ok(())
    }
}

impl WorldQuery for SimWorld {
    fn is_chunk_loaded(&self, _world: &str, _x: i32, _z: i32) -> bool {
        lock(&self.terrain).preloaded
    }

    fn load_chunk(&self, _world: &str, _x: i32, _z: i32, _timeout: Duration) -> bool {
        lock(&self.terrain).loadable
    }

    fn ground_height_at(&self, _world: &str, x: i32, z: i32) -> Option<i32> {
        Self::column_height(lock(&self.terrain).ground, x, z)
    }

    fn is_hazard_at(&self, world: &str, x: i32, _y: i32, z: i32) -> bool {
        lock(&self.terrain)
            .hazards
            .contains(&(world.to_string(), x, z))
    }
}

impl Capabilities for SimWorld {
    fn can_bypass_cooldown(&self, player: PlayerId, command: &str) -> bool {
        lock(&self.grants)
            .cooldown_bypass
            .contains(&(player, command.to_string()))
    }

    fn can_bypass_warmup(&self, player: PlayerId, command: &str) -> bool {
        lock(&self.grants)
            .warmup_bypass
            .contains(&(player, command.to_string()))
    }

    fn can_record_death_location(&self, player: PlayerId) -> bool {
        !lock(&self.grants).no_death_tracking.contains(&player)
    }
}

impl NamedLocations for SimWorld {
    fn home(&self, player: PlayerId, name: Option<&str>) -> Option<Location> {
        let name = name.unwrap_or(DEFAULT_HOME).to_ascii_lowercase();
        lock(&self.places).homes.get(&(player, name)).cloned()
    }

    fn warp(&self, name: &str) -> Option<Location> {
        lock(&self.places)
            .warps
            .get(&name.to_ascii_lowercase())
            .cloned()
    }

    fn spawn(&self, world: &str) -> Option<Location> {
        lock(&self.places).spawns.get(world).cloned()
    }
}

impl PlayerDirectory for SimWorld {
    fn find_online(&self, name: &str) -> Option<PlayerRef> {
        lock(&self.players)
            .iter()
            .find(|(_, entry)| entry.online && entry.name.eq_ignore_ascii_case(name))
            .map(|(id, entry)| PlayerRef::new(*id, entry.name.clone()))
    }

    fn is_online(&self, player: PlayerId) -> bool {
        lock(&self.players)
            .get(&player)
            .map_or(false, |entry| entry.online)
    }
}

impl PlayerNotifier for SimWorld {
    fn notify(&self, player: PlayerId, event: TeleportEvent) {
        tracing::debug!(player = %player, event = ?event, "notify");
        lock(&self.events).push((player, event));
    }
}
