//! Line-driven console that runs the orchestrator against a simulated world.
//!
//! ```text
//! <player> /<command> [args]   issue a chat command
//! join <player>                add a player at spawn
//! move <player> <x> <y> <z> [world]
//! die <player>                 record a death at the current position
//! leave <player>
//! where <player>
//! wait <seconds>               advance simulated time one second at a time
//! quit
//! ```

use crate::commands::orchestrator::{Backends, CommandOutcome, TeleportOrchestrator};
use crate::commands::parse::parse_teleport_command;
use crate::config::TeleportConfig;
use crate::entities::player::{PlayerId, PlayerRef};
use crate::persistence::store::PlayerDocumentStore;
use crate::world::host::{Host, TeleportEvent, WorldExecutor};
use crate::world::position::Location;
use crate::world::sim::{Ground, SimWorld, DEFAULT_HOME};
use crate::world::time::{Clock, ManualClock, SystemClock};
use std::collections::HashMap;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

pub const SPAWN_WORLD: &str = "overworld";

pub struct Console {
    clock: Arc<ManualClock>,
    world: Arc<SimWorld>,
    teleports: Arc<TeleportOrchestrator>,
    players: HashMap<String, PlayerRef>,
}

impl Console {
    pub fn new(config: TeleportConfig, store: Arc<dyn PlayerDocumentStore>) -> Self {
        let clock = ManualClock::new(SystemClock.now());
        let world = Arc::new(SimWorld::new());
        world.set_ground(Ground::Rolling {
            base: 64,
            amplitude: 6,
        });
        world.set_spawn(spawn_point());
        world.set_warp("market", Location::new(SPAWN_WORLD, 120.0, 66.0, -40.0));
        world.set_spawn(Location::new("nether", 0.0, 40.0, 0.0));
        let teleports = TeleportOrchestrator::new(
            config,
            Host::from_world(world.clone()),
            Backends {
                clock: clock.clone(),
                scheduler: clock.clone(),
                store,
                rng_seed: None,
            },
        );
        let mut console = Self {
            clock,
            world,
            teleports,
            players: HashMap::new(),
        };
        console.join("Alice");
        console.join("Bob");
        console
    }

    pub fn run<R: BufRead, W: Write>(&mut self, input: R, mut output: W) -> io::Result<()> {
        writeln!(output, "waygate: console ready, players: Alice, Bob")?;
        for line in input.lines() {
            let line = line?;
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if line.eq_ignore_ascii_case("quit") {
                break;
            }
            let reply = self.execute(line);
            for message in reply {
                writeln!(output, "{message}")?;
            }
            for message in self.drain_events() {
                writeln!(output, "{message}")?;
            }
        }
        let report = self.teleports.shutdown();
        for message in self.drain_events() {
            writeln!(output, "{message}")?;
        }
        writeln!(
            output,
            "waygate: shutdown, history saved={} failed={}",
            report.saved, report.failed
        )?;
        Ok(())
    }

    fn execute(&mut self, line: &str) -> Vec<String> {
        let mut parts = line.split_whitespace();
        let Some(head) = parts.next() else {
            return Vec::new();
        };
        let args: Vec<&str> = parts.collect();
        match head.to_ascii_lowercase().as_str() {
            "join" => match args.first() {
                Some(name) => {
                    let player = self.join(name);
                    vec![format!("{} joined at {}", player.name, spawn_point())]
                }
                None => vec!["usage: join <player>".to_string()],
            },
            "wait" => {
                let seconds = args.first().and_then(|s| s.parse::<u64>().ok()).unwrap_or(1);
                for _ in 0..seconds {
                    self.clock.advance_secs(1);
                    self.world.run_world_tasks();
                    self.teleports.tick();
                }
                vec![format!("{seconds}s passed")]
            }
            "move" => self.move_player(&args),
            "where" => match self.lookup(args.first()) {
                Ok(player) => match self.world.current_position(player.id) {
                    Some(location) => vec![format!("{} is at {}", player.name, location)],
                    None => vec![format!("{} is offline", player.name)],
                },
                Err(message) => vec![message],
            },
            "die" => match self.lookup(args.first()) {
                Ok(player) => match self.world.current_position(player.id) {
                    Some(location) => {
                        self.teleports.on_death(player.id, &location);
                        vec![format!("{} died at {}", player.name, location)]
                    }
                    None => vec![format!("{} is offline", player.name)],
                },
                Err(message) => vec![message],
            },
            "leave" => match self.lookup(args.first()) {
                Ok(player) => {
                    self.world.disconnect(player.id);
                    self.teleports.on_disconnect(player.id);
                    self.players.remove(&player.name.to_ascii_lowercase());
                    vec![format!("{} left", player.name)]
                }
                Err(message) => vec![message],
            },
            _ => self.chat(head, line),
        }
    }

    fn chat(&self, name: &str, line: &str) -> Vec<String> {
        let player = match self.lookup(Some(&name)) {
            Ok(player) => player,
            Err(message) => return vec![message],
        };
        let message = line[name.len()..].trim_start();
        let command = match parse_teleport_command(message) {
            Ok(Some(command)) => command,
            Ok(None) => return vec![format!("<{}> {}", player.name, message)],
            Err(err) => return vec![format!("{}: {}", player.name, err)],
        };
        let reply = match self.teleports.handle(&player, command) {
            Ok(outcome) => self.describe(&outcome),
            Err(err) => format!("{}: {}", player.name, err),
        };
        self.world.run_world_tasks();
        vec![reply]
    }

    fn describe(&self, outcome: &CommandOutcome) -> String {
        match outcome {
            CommandOutcome::WarmupStarted {
                traveller,
                command,
                seconds,
            } => format!("{}: /{command} in {seconds}s", self.name_of(*traveller)),
            CommandOutcome::Executed { traveller, command } => {
                format!("{}: /{command} done", self.name_of(*traveller))
            }
            CommandOutcome::RequestSent {
                target, expires_in, ..
            } => format!("request sent to {} ({expires_in}s)", target.name),
            CommandOutcome::RequestDenied { requester } => {
                format!("request from {} denied", requester.name)
            }
            CommandOutcome::Unknown(name) => format!("unknown command /{name}"),
        }
    }

    fn move_player(&self, args: &[&str]) -> Vec<String> {
        let player = match self.lookup(args.first()) {
            Ok(player) => player,
            Err(message) => return vec![message],
        };
        let coords: Option<Vec<f64>> = args
            .iter()
            .skip(1)
            .take(3)
            .map(|value| value.parse::<f64>().ok())
            .collect();
        let Some([x, y, z]) = coords.and_then(|c| <[f64; 3]>::try_from(c).ok()) else {
            return vec!["usage: move <player> <x> <y> <z> [world]".to_string()];
        };
        let world = match args.get(4) {
            Some(world) => world.to_string(),
            None => self
                .world
                .current_position(player.id)
                .map(|location| location.world)
                .unwrap_or_else(|| SPAWN_WORLD.to_string()),
        };
        let location = Location::new(world, x, y, z);
        self.world.move_player(player.id, location.clone());
        vec![format!("{} moved to {}", player.name, location)]
    }

    fn join(&mut self, name: &str) -> PlayerRef {
        let player = self.world.add_player(name, spawn_point());
        self.world.set_home(
            player.id,
            DEFAULT_HOME,
            Location::new(SPAWN_WORLD, 250.0, 70.0, 250.0),
        );
        self.players
            .insert(name.to_ascii_lowercase(), player.clone());
        tracing::info!(player = %player.id, name, "player joined");
        player
    }

    fn lookup(&self, name: Option<&&str>) -> Result<PlayerRef, String> {
        let name = name.ok_or_else(|| "missing player name".to_string())?;
        self.players
            .get(&name.to_ascii_lowercase())
            .cloned()
            .ok_or_else(|| format!("no player named {name}"))
    }

    fn name_of(&self, player: PlayerId) -> String {
        self.world
            .player_name(player)
            .unwrap_or_else(|| player.to_string())
    }

    fn drain_events(&self) -> Vec<String> {
        self.world
            .take_events()
            .into_iter()
            .map(|(player, event)| format!("  [{}] {}", self.name_of(player), describe_event(&event)))
            .collect()
    }
}

fn spawn_point() -> Location {
    Location::new(SPAWN_WORLD, 0.5, 65.0, 0.5)
}

fn describe_event(event: &TeleportEvent) -> String {
    match event {
        TeleportEvent::WarmupStarted { command, seconds } => {
            format!("/{command} starting in {seconds}s, don't move")
        }
        TeleportEvent::WarmupCountdown { seconds } => format!("{seconds}..."),
        TeleportEvent::WarmupCancelled { reason } => format!("teleport cancelled ({reason})"),
        TeleportEvent::Teleported {
            command,
            destination,
        } => format!("/{command} took you to {destination}"),
        TeleportEvent::TeleportFailed { command, error } => format!("/{command} failed: {error}"),
        TeleportEvent::RequestReceived { from, kind } => format!("{from} sent a request ({kind:?})"),
        TeleportEvent::RequestAccepted { by } => format!("{by} accepted your request"),
        TeleportEvent::RequestDenied { by } => format!("{by} denied your request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::store::MemoryDocumentStore;

    fn run_script(script: &str) -> String {
        let mut console = Console::new(
            TeleportConfig::default(),
            Arc::new(MemoryDocumentStore::new()),
        );
        let mut output = Vec::new();
        console
            .run(script.as_bytes(), &mut output)
            .expect("console run");
        String::from_utf8(output).expect("utf8")
    }

    #[test]
    fn home_after_warmup() {
        let output = run_script("alice /home\nwait 3\nwhere alice\nquit\n");
        assert!(output.contains("Alice: /home in 3s"));
        assert!(output.contains("/home took you to overworld (250.0, 70.0, 250.0)"));
        assert!(output.contains("Alice is at overworld (250.0, 70.0, 250.0)"));
    }

    #[test]
    fn moving_cancels_the_countdown() {
        let output = run_script("bob /spawn\nmove bob 10 65 10\nwait 1\nquit\n");
        assert!(output.contains("teleport cancelled (moved)"));
    }

    #[test]
    fn request_flow_and_errors() {
        let output = run_script("alice /tpa bob\nbob /tpdeny\nbob /tpaccept\ncarol /home\n");
        assert!(output.contains("request sent to Bob (30s)"));
        assert!(output.contains("[Alice] Bob denied your request"));
        assert!(output.contains("Bob: nothing to teleport to"));
        assert!(output.contains("no player named carol"));
        assert!(output.contains("waygate: shutdown"));
    }
}
