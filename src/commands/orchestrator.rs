//! Command pipeline: cooldown gate, warmup, then the world-thread completion
//! that teleports, records back history and charges the cooldown.

use crate::commands::parse::TeleportCommand;
use crate::config::TeleportConfig;
use crate::entities::player::{PlayerId, PlayerRef};
use crate::error::TeleportError;
use crate::persistence::store::PlayerDocumentStore;
use crate::persistence::sweep::{SweepConfig, SweepState};
use crate::sync::lock;
use crate::teleport::action::{CommandKey, TeleportAction};
use crate::teleport::back::{BackHistoryStore, FlushReport};
use crate::teleport::cooldown::CooldownRegistry;
use crate::teleport::rtp::{RandomLocationLocator, SafeLocationFinder};
use crate::teleport::tpa::{RequestKind, TeleportRequestBroker, TpaRequest};
use crate::teleport::warmup::{CancelReason, WarmupCompletion, WarmupCoordinator, WarmupHandler};
use crate::world::host::{Host, TeleportEvent};
use crate::world::position::{Coordinate, Location};
use crate::world::time::{ceil_secs, Clock};
use crate::world::timers::Scheduler;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

/// Process-wide services the orchestrator is built on.
pub struct Backends {
    pub clock: Arc<dyn Clock>,
    pub scheduler: Arc<dyn Scheduler>,
    pub store: Arc<dyn PlayerDocumentStore>,
    /// Fixed seed for the random-location search; entropy when `None`.
    pub rng_seed: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommandOutcome {
    WarmupStarted {
        traveller: PlayerId,
        command: CommandKey,
        seconds: u64,
    },
    /// Ran without a countdown; the result went to the traveller's notifier.
    Executed {
        traveller: PlayerId,
        command: CommandKey,
    },
    RequestSent {
        target: PlayerRef,
        kind: RequestKind,
        expires_in: u64,
    },
    RequestDenied {
        requester: PlayerRef,
    },
    Unknown(String),
}

struct CompletionRelay(Weak<TeleportOrchestrator>);

impl WarmupHandler<TeleportAction> for CompletionRelay {
    fn on_complete(&self, completion: WarmupCompletion<TeleportAction>) {
        if let Some(orchestrator) = self.0.upgrade() {
            orchestrator.finish(completion);
        }
    }

    fn on_cancel(&self, player: PlayerId, _action: TeleportAction, reason: CancelReason) {
        if let Some(orchestrator) = self.0.upgrade() {
            orchestrator.notify(player, TeleportEvent::WarmupCancelled { reason });
        }
    }
}

pub struct TeleportOrchestrator {
    config: TeleportConfig,
    host: Host,
    clock: Arc<dyn Clock>,
    cooldowns: CooldownRegistry,
    warmups: Arc<WarmupCoordinator<TeleportAction>>,
    back: BackHistoryStore,
    requests: TeleportRequestBroker,
    locator: RandomLocationLocator,
    finder: SafeLocationFinder,
    sweep: Mutex<SweepState>,
    relay: Arc<CompletionRelay>,
}

impl TeleportOrchestrator {
    pub fn new(config: TeleportConfig, host: Host, backends: Backends) -> Arc<Self> {
        let config = config.normalized();
        let Backends {
            clock,
            scheduler,
            store,
            rng_seed,
        } = backends;
        Arc::new_cyclic(|weak| {
            let locator = match rng_seed {
                Some(seed) => RandomLocationLocator::with_seed(&config.rtp, seed),
                None => RandomLocationLocator::new(&config.rtp),
            };
            let sweep = SweepState::new(
                SweepConfig {
                    interval_seconds: config.tpa.sweep_interval_seconds,
                },
                clock.now(),
            );
            Self {
                cooldowns: CooldownRegistry::new(Arc::clone(&clock), config.cooldowns()),
                warmups: Arc::new(WarmupCoordinator::new(
                    Arc::clone(&clock),
                    scheduler,
                    Arc::clone(&host.executor),
                    config.movement_tolerance,
                )),
                back: BackHistoryStore::new(
                    store,
                    config.back.max_history,
                    config.back.cache_capacity,
                ),
                requests: TeleportRequestBroker::new(Arc::clone(&clock), config.tpa.timeout()),
                finder: SafeLocationFinder::new(Arc::clone(&host.query), &config.rtp),
                locator,
                sweep: Mutex::new(sweep),
                relay: Arc::new(CompletionRelay(weak.clone())),
                clock,
                host,
                config,
            }
        })
    }

    pub fn config(&self) -> &TeleportConfig {
        &self.config
    }

    pub fn cooldowns(&self) -> &CooldownRegistry {
        &self.cooldowns
    }

    pub fn warmups(&self) -> &WarmupCoordinator<TeleportAction> {
        &self.warmups
    }

    pub fn back_history(&self) -> &BackHistoryStore {
        &self.back
    }

    pub fn requests(&self) -> &TeleportRequestBroker {
        &self.requests
    }

    /// Dispatch one command issued by `player`. Call from the world thread.
    pub fn handle(
        &self,
        player: &PlayerRef,
        command: TeleportCommand,
    ) -> Result<CommandOutcome, TeleportError> {
        tracing::debug!(player = %player.id, command = ?command, "teleport command");
        match command {
            TeleportCommand::Home { name } => {
                let destination = self
                    .host
                    .locations
                    .home(player.id, name.as_deref())
                    .ok_or(TeleportError::UnknownDestination)?;
                self.travel(player.id, CommandKey::Home, destination, false)
            }
            TeleportCommand::Warp { name } => {
                let destination = self
                    .host
                    .locations
                    .warp(&name)
                    .ok_or(TeleportError::UnknownDestination)?;
                self.travel(player.id, CommandKey::Warp, destination, false)
            }
            TeleportCommand::Spawn => {
                let current = self.position(player.id)?;
                let destination = self
                    .host
                    .locations
                    .spawn(&current.world)
                    .ok_or(TeleportError::UnknownDestination)?;
                self.travel(player.id, CommandKey::Spawn, destination, false)
            }
            TeleportCommand::Back => {
                let destination = self.back.peek(player.id).ok_or(TeleportError::NotFound)?;
                self.travel(player.id, CommandKey::Back, destination, true)
            }
            TeleportCommand::Tpa { target } => {
                self.send_request(player, &target, RequestKind::ToTarget)
            }
            TeleportCommand::TpaHere { target } => {
                self.send_request(player, &target, RequestKind::ToRequester)
            }
            TeleportCommand::TpAccept { requester } => {
                self.accept_request(player, requester.as_deref())
            }
            TeleportCommand::TpDeny { requester } => self.deny_request(player, requester.as_deref()),
            TeleportCommand::Rtp { world } => {
                self.check_cooldown(player.id, CommandKey::Rtp)?;
                let current = self.position(player.id)?;
                let world = world.unwrap_or_else(|| current.world.clone());
                let center = if self.config.rtp.center_on_player {
                    current.coordinate
                } else {
                    Coordinate::new(self.config.rtp.center_x, 0.0, self.config.rtp.center_z)
                };
                self.begin(
                    player.id,
                    CommandKey::Rtp,
                    TeleportAction::Random { world, center },
                )
            }
            TeleportCommand::Unknown(name) => Ok(CommandOutcome::Unknown(name)),
        }
    }

    /// Per-tick housekeeping from the world thread.
    pub fn tick(&self) {
        for (player, reason) in self.warmups.poll_movement() {
            tracing::debug!(player = %player, %reason, "warmup interrupted");
        }
        for (player, seconds) in self.warmups.countdown_updates() {
            self.notify(player, TeleportEvent::WarmupCountdown { seconds });
        }
        let now = self.clock.now();
        let mut sweep = lock(&self.sweep);
        if sweep.due(now) {
            self.requests.sweep_expired();
            sweep.mark_done(now);
        }
    }

    pub fn on_death(&self, player: PlayerId, location: &Location) {
        if !self.config.back.on_death
            || !self.host.capabilities.can_record_death_location(player)
        {
            return;
        }
        self.back.push(player, location);
        tracing::debug!(player = %player, %location, "death location recorded");
    }

    pub fn on_disconnect(&self, player: PlayerId) {
        self.warmups.cancel(player, CancelReason::Disconnected);
        let outgoing = self.requests.cancel_outgoing(player);
        let incoming = self.requests.cancel_incoming(player);
        tracing::debug!(player = %player, outgoing, incoming, "player state released");
    }

    pub fn shutdown(&self) -> FlushReport {
        let cancelled = self.warmups.cancel_all(CancelReason::Shutdown);
        let report = self.back.flush();
        tracing::info!(
            cancelled,
            saved = report.saved,
            failed = report.failed,
            write_failures = self.back.write_failures(),
            "teleport services stopped"
        );
        report
    }

    fn travel(
        &self,
        player: PlayerId,
        command: CommandKey,
        destination: Location,
        from_back: bool,
    ) -> Result<CommandOutcome, TeleportError> {
        self.check_cooldown(player, command)?;
        self.begin(
            player,
            command,
            TeleportAction::Travel {
                command,
                destination,
                from_back,
            },
        )
    }

    fn send_request(
        &self,
        requester: &PlayerRef,
        target_name: &str,
        kind: RequestKind,
    ) -> Result<CommandOutcome, TeleportError> {
        self.check_cooldown(requester.id, kind.command())?;
        let target = self
            .host
            .directory
            .find_online(target_name)
            .ok_or_else(|| TeleportError::UnknownPlayer(target_name.to_string()))?;
        let request = self.requests.create(requester, &target, kind).into_result()?;
        self.notify(
            target.id,
            TeleportEvent::RequestReceived {
                from: requester.name.clone(),
                kind,
            },
        );
        Ok(CommandOutcome::RequestSent {
            expires_in: request.remaining_seconds(self.clock.as_ref()),
            target,
            kind,
        })
    }

    fn accept_request(
        &self,
        target: &PlayerRef,
        requester_name: Option<&str>,
    ) -> Result<CommandOutcome, TeleportError> {
        let request = match requester_name {
            Some(name) => {
                let requester = self
                    .host
                    .directory
                    .find_online(name)
                    .ok_or_else(|| TeleportError::UnknownPlayer(name.to_string()))?;
                self.requests.accept_from(target.id, requester.id)
            }
            None => self.requests.accept(target.id),
        }
        .ok_or(TeleportError::NotFound)?;

        if request.is_expired(self.clock.as_ref()) {
            return Err(TeleportError::Expired);
        }
        if !self.host.directory.is_online(request.requester.id) {
            return Err(TeleportError::PlayerOffline);
        }
        let traveller = request.travel_pair().0.id;
        if traveller != target.id && self.warmups.has_active(traveller) {
            self.requests.restore(request);
            return Err(TeleportError::Busy);
        }
        self.notify(
            request.requester.id,
            TeleportEvent::RequestAccepted {
                by: target.name.clone(),
            },
        );
        let command = request.kind.command();
        self.begin(traveller, command, TeleportAction::Summon { request })
    }

    fn deny_request(
        &self,
        target: &PlayerRef,
        requester_name: Option<&str>,
    ) -> Result<CommandOutcome, TeleportError> {
        let request = match requester_name {
            Some(name) => {
                let requester = self
                    .host
                    .directory
                    .find_online(name)
                    .ok_or_else(|| TeleportError::UnknownPlayer(name.to_string()))?;
                self.requests.deny_from(target.id, requester.id)
            }
            None => self.requests.deny(target.id),
        }
        .ok_or(TeleportError::NotFound)?;
        self.notify(
            request.requester.id,
            TeleportEvent::RequestDenied {
                by: target.name.clone(),
            },
        );
        Ok(CommandOutcome::RequestDenied {
            requester: request.requester,
        })
    }

    fn check_cooldown(&self, player: PlayerId, command: CommandKey) -> Result<(), TeleportError> {
        if self.host.capabilities.can_bypass_cooldown(player, command.as_str()) {
            return Ok(());
        }
        match self.cooldowns.remaining(command.as_str(), player) {
            0 => Ok(()),
            remaining_seconds => Err(TeleportError::OnCooldown { remaining_seconds }),
        }
    }

    fn begin(
        &self,
        traveller: PlayerId,
        command: CommandKey,
        action: TeleportAction,
    ) -> Result<CommandOutcome, TeleportError> {
        let origin = self.position(traveller)?;
        let duration = if self
            .host
            .capabilities
            .can_bypass_warmup(traveller, command.as_str())
        {
            Duration::ZERO
        } else {
            self.config.warmup(command.as_str())
        };
        let handler: Arc<dyn WarmupHandler<TeleportAction>> = self.relay.clone();
        match self
            .warmups
            .start(traveller, origin, duration, action, handler)?
        {
            Some(_) => {
                let seconds = ceil_secs(duration);
                self.notify(
                    traveller,
                    TeleportEvent::WarmupStarted {
                        command: command.as_str(),
                        seconds,
                    },
                );
                Ok(CommandOutcome::WarmupStarted {
                    traveller,
                    command,
                    seconds,
                })
            }
            None => Ok(CommandOutcome::Executed { traveller, command }),
        }
    }

    /// Warmup completion, on the world thread.
    fn finish(&self, completion: WarmupCompletion<TeleportAction>) {
        let player = completion.player;
        let command = completion.action.command();
        match self.execute(completion) {
            Ok(destination) => {
                tracing::info!(player = %player, %command, %destination, "teleported");
                self.notify(
                    player,
                    TeleportEvent::Teleported {
                        command: command.as_str(),
                        destination,
                    },
                );
            }
            Err(error) => {
                tracing::info!(player = %player, %command, %error, "teleport failed");
                self.notify(
                    player,
                    TeleportEvent::TeleportFailed {
                        command: command.as_str(),
                        error,
                    },
                );
            }
        }
    }

    fn execute(
        &self,
        completion: WarmupCompletion<TeleportAction>,
    ) -> Result<Location, TeleportError> {
        let WarmupCompletion {
            player,
            origin,
            action,
        } = completion;
        let from = self
            .host
            .executor
            .current_position(player)
            .unwrap_or(origin);
        match action {
            TeleportAction::Travel {
                command,
                destination,
                from_back: false,
            } => {
                self.teleport(player, &destination)?;
                self.back.push(player, &from);
                self.cooldowns.mark_used(command.as_str(), player);
                Ok(destination)
            }
            TeleportAction::Travel {
                command,
                destination,
                from_back: true,
            } => {
                // The announced entry, even if a death was recorded since.
                if self.back.peek(player).as_ref() != Some(&destination) {
                    tracing::info!(
                        player = %player,
                        %destination,
                        "back history changed during warmup, keeping announced target"
                    );
                }
                if !self.back.take(player, &destination) {
                    return Err(TeleportError::NotFound);
                }
                if let Err(err) = self.teleport(player, &destination) {
                    self.back.push(player, &destination);
                    return Err(err);
                }
                self.back.push(player, &from);
                self.cooldowns.mark_used(command.as_str(), player);
                Ok(destination)
            }
            TeleportAction::Summon { request } => self.summon(player, &from, &request),
            TeleportAction::Random { world, center } => {
                let destination = self.finder.find(
                    &self.locator,
                    &world,
                    center,
                    self.config.rtp.max_attempts,
                )?;
                self.teleport(player, &destination)?;
                self.back.push(player, &from);
                self.cooldowns.mark_used(CommandKey::Rtp.as_str(), player);
                Ok(destination)
            }
        }
    }

    fn summon(
        &self,
        traveller: PlayerId,
        from: &Location,
        request: &TpaRequest,
    ) -> Result<Location, TeleportError> {
        let (_, anchor) = request.travel_pair();
        let destination = self
            .host
            .executor
            .current_position(anchor.id)
            .ok_or(TeleportError::PlayerOffline)?;
        self.teleport(traveller, &destination)?;
        self.back.push(traveller, from);
        self.cooldowns
            .mark_used(request.kind.command().as_str(), request.requester.id);
        Ok(destination)
    }

    fn teleport(&self, player: PlayerId, destination: &Location) -> Result<(), TeleportError> {
        self.host
            .executor
            .teleport(
                player,
                &destination.world,
                destination.coordinate,
                destination.facing,
            )
            .map_err(TeleportError::from)
    }

    fn position(&self, player: PlayerId) -> Result<Location, TeleportError> {
        self.host
            .executor
            .current_position(player)
            .ok_or(TeleportError::PlayerOffline)
    }

    fn notify(&self, player: PlayerId, event: TeleportEvent) {
        self.host.notifier.notify(player, event);
    }
}
