use crate::error::ParseError;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeleportCommand {
    Home { name: Option<String> },
    Warp { name: String },
    Spawn,
    Back,
    Tpa { target: String },
    TpaHere { target: String },
    TpAccept { requester: Option<String> },
    TpDeny { requester: Option<String> },
    Rtp { world: Option<String> },
    Unknown(String),
}

/// Parse a chat line. Lines that do not start with `/` are not commands.
pub fn parse_teleport_command(message: &str) -> Result<Option<TeleportCommand>, ParseError> {
    let trimmed = message.trim();
    let Some(body) = trimmed.strip_prefix('/') else {
        return Ok(None);
    };

    let mut parts = body.split_whitespace();
    let command = parts.next().ok_or(ParseError::MissingName)?;
    let command = command.to_ascii_lowercase();
    let argument = parts.next().map(str::to_string);
    let parsed = match command.as_str() {
        "home" => TeleportCommand::Home { name: argument },
        "warp" => TeleportCommand::Warp {
            name: required(argument, "warp", "warp name")?,
        },
        "spawn" => TeleportCommand::Spawn,
        "back" | "return" => TeleportCommand::Back,
        "tpa" => TeleportCommand::Tpa {
            target: required(argument, "tpa", "player name")?,
        },
        "tpahere" => TeleportCommand::TpaHere {
            target: required(argument, "tpahere", "player name")?,
        },
        "tpaccept" | "tpyes" => TeleportCommand::TpAccept {
            requester: argument,
        },
        "tpdeny" | "tpno" => TeleportCommand::TpDeny {
            requester: argument,
        },
        "rtp" | "wild" => TeleportCommand::Rtp { world: argument },
        _ => TeleportCommand::Unknown(command),
    };
    Ok(Some(parsed))
}

fn required(
    value: Option<String>,
    command: &'static str,
    argument: &'static str,
) -> Result<String, ParseError> {
    value.ok_or(ParseError::MissingArgument { command, argument })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_ignores_plain_chat() {
        assert_eq!(parse_teleport_command("hello there").unwrap(), None);
    }

    #[test]
    fn parse_rejects_bare_slash() {
        assert_eq!(
            parse_teleport_command("/").unwrap_err(),
            ParseError::MissingName
        );
    }

    #[test]
    fn parse_home_with_and_without_name() {
        assert_eq!(
            parse_teleport_command("/home").unwrap(),
            Some(TeleportCommand::Home { name: None })
        );
        assert_eq!(
            parse_teleport_command("/HOME base").unwrap(),
            Some(TeleportCommand::Home {
                name: Some("base".to_string())
            })
        );
    }

    #[test]
    fn parse_warp_requires_name() {
        assert_eq!(
            parse_teleport_command("/warp").unwrap_err(),
            ParseError::MissingArgument {
                command: "warp",
                argument: "warp name"
            }
        );
        assert_eq!(
            parse_teleport_command("/warp market").unwrap(),
            Some(TeleportCommand::Warp {
                name: "market".to_string()
            })
        );
    }

    #[test]
    fn parse_tpa_variants() {
        assert_eq!(
            parse_teleport_command("/tpa Bob").unwrap(),
            Some(TeleportCommand::Tpa {
                target: "Bob".to_string()
            })
        );
        assert_eq!(
            parse_teleport_command("/tpahere Bob").unwrap(),
            Some(TeleportCommand::TpaHere {
                target: "Bob".to_string()
            })
        );
        assert!(parse_teleport_command("/tpa").is_err());
    }

    #[test]
    fn parse_accept_and_deny_optional_requester() {
        assert_eq!(
            parse_teleport_command("/tpaccept").unwrap(),
            Some(TeleportCommand::TpAccept { requester: None })
        );
        assert_eq!(
            parse_teleport_command("/tpdeny Alice").unwrap(),
            Some(TeleportCommand::TpDeny {
                requester: Some("Alice".to_string())
            })
        );
    }

    #[test]
    fn parse_rtp_and_aliases() {
        assert_eq!(
            parse_teleport_command("/wild nether").unwrap(),
            Some(TeleportCommand::Rtp {
                world: Some("nether".to_string())
            })
        );
        assert_eq!(
            parse_teleport_command("/return").unwrap(),
            Some(TeleportCommand::Back)
        );
    }

    #[test]
    fn parse_handles_unknown() {
        assert_eq!(
            parse_teleport_command("/fly").unwrap(),
            Some(TeleportCommand::Unknown("fly".to_string()))
        );
    }
}
