use crate::teleport::tpa::TpaRequest;
use crate::world::position::{Coordinate, Location};
use std::fmt;

/// Command keys used for cooldowns, warmups and capability checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKey {
    Home,
    Warp,
    Spawn,
    Back,
    Tpa,
    TpaHere,
    Rtp,
}

impl CommandKey {
    pub const ALL: [CommandKey; 7] = [
        CommandKey::Home,
        CommandKey::Warp,
        CommandKey::Spawn,
        CommandKey::Back,
        CommandKey::Tpa,
        CommandKey::TpaHere,
        CommandKey::Rtp,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            CommandKey::Home => "home",
            CommandKey::Warp => "warp",
            CommandKey::Spawn => "spawn",
            CommandKey::Back => "back",
            CommandKey::Tpa => "tpa",
            CommandKey::TpaHere => "tpahere",
            CommandKey::Rtp => "rtp",
        }
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What to do when a warmup finishes.
#[derive(Debug, Clone, PartialEq)]
pub enum TeleportAction {
    /// Go to a fixed destination. With `from_back` the destination is the
    /// peeked back entry and is popped on completion.
    Travel {
        command: CommandKey,
        destination: Location,
        from_back: bool,
    },
    /// Accepted peer request; the traveller joins the other party's position
    /// as read at completion time.
    Summon { request: TpaRequest },
    /// Search for a safe spot around `center` in `world`.
    Random { world: String, center: Coordinate },
}

impl TeleportAction {
    pub fn command(&self) -> CommandKey {
        match self {
            TeleportAction::Travel { command, .. } => *command,
            TeleportAction::Summon { request } => request.kind.command(),
            TeleportAction::Random { .. } => CommandKey::Rtp,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_keys_are_distinct() {
        let names: std::collections::HashSet<&str> =
            CommandKey::ALL.iter().map(|key| key.as_str()).collect();
        assert_eq!(names.len(), CommandKey::ALL.len());
        assert_eq!(CommandKey::TpaHere.to_string(), "tpahere");
    }

    #[test]
    fn random_action_is_charged_as_rtp() {
        let action = TeleportAction::Random {
            world: "overworld".to_string(),
            center: Coordinate::default(),
        };
        assert_eq!(action.command(), CommandKey::Rtp);
    }
}
