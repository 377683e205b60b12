use std::fmt;
use std::str::FromStr;

use crate::net::{Channel, Message};
use crate::session::{Role, Slot};

const MAX_COLUMN: u8 = 99;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("empty command")]
    Empty,
    #[error("unknown command `{0}`")]
    UnknownCommand(String),
    #[error("malformed command: {0}")]
    Malformed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Coord {
    pub row: char,
    pub column: u8,
}

impl Coord {
    pub fn new(row: char, column: u8) -> Option<Self> {
        let row = row.to_ascii_uppercase();
        (row.is_ascii_uppercase() && (1..=MAX_COLUMN).contains(&column))
            .then_some(Self { row, column })
    }
}

impl FromStr for Coord {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let malformed = || ParseError::Malformed(format!("bad coordinate `{s}`"));
        let mut chars = s.chars();
        let row = chars.next().ok_or_else(malformed)?;
        let digits = chars.as_str();
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let column = digits.parse::<u8>().map_err(|_| malformed())?;
        Coord::new(row, column).ok_or_else(malformed)
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.row, self.column)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Orientation {
    Horizontal,
    Vertical,
}

impl FromStr for Orientation {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "H" | "h" => Ok(Orientation::Horizontal),
            "V" | "v" => Ok(Orientation::Vertical),
            other => Err(ParseError::Malformed(format!("bad orientation `{other}`"))),
        }
    }
}

impl fmt::Display for Orientation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Orientation::Horizontal => "H",
            Orientation::Vertical => "V",
        })
    }
}

/// Gameplay commands forwarded to the engine. Their meaning is the engine's
/// business; only their shape is checked here.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GameCommand {
    Place {
        coord: Coord,
        orientation: Orientation,
    },
    Fire {
        coord: Coord,
    },
}

impl FromStr for GameCommand {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut words = s.split_whitespace();
        let verb = words.next().ok_or(ParseError::Empty)?;
        let command = match verb {
            "PLACE" => {
                let coord = words
                    .next()
                    .ok_or_else(|| ParseError::Malformed("PLACE needs a coordinate".into()))?
                    .parse()?;
                let orientation = words
                    .next()
                    .ok_or_else(|| ParseError::Malformed("PLACE needs H or V".into()))?
                    .parse()?;
                GameCommand::Place { coord, orientation }
            }
            "FIRE" => {
                let coord = words
                    .next()
                    .ok_or_else(|| ParseError::Malformed("FIRE needs a coordinate".into()))?
                    .parse()?;
                GameCommand::Fire { coord }
            }
            other => return Err(ParseError::UnknownCommand(other.to_string())),
        };
        if let Some(extra) = words.next() {
            return Err(ParseError::Malformed(format!("unexpected `{extra}`")));
        }
        Ok(command)
    }
}

impl fmt::Display for GameCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameCommand::Place { coord, orientation } => write!(f, "PLACE {coord} {orientation}"),
            GameCommand::Fire { coord } => write!(f, "FIRE {coord}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Hit,
    Miss,
    Sink(String),
}

impl FromStr for Outcome {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.split_once(' ') {
            None if s == "HIT" => Ok(Outcome::Hit),
            None if s == "MISS" => Ok(Outcome::Miss),
            Some(("SINK", ship)) if !ship.trim().is_empty() => Ok(Outcome::Sink(ship.to_string())),
            _ if s.is_empty() => Err(ParseError::Empty),
            _ => Err(ParseError::UnknownCommand(s.to_string())),
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Hit => f.write_str("HIT"),
            Outcome::Miss => f.write_str("MISS"),
            Outcome::Sink(ship) => write!(f, "SINK {ship}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    Hello {
        username: String,
        token: Option<String>,
    },
    Leave,
    Ping,
    Role {
        role: Role,
        token: Option<String>,
    },
    Reconnected {
        slot: Slot,
    },
    Notice(String),
    Denied(String),
    Unauthorized(String),
}

impl FromStr for ControlMessage {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (verb, rest) = s.split_once(' ').unwrap_or((s, ""));
        let args: Vec<&str> = rest.split_whitespace().collect();
        let malformed = || ParseError::Malformed(s.to_string());

        match (verb, args.as_slice()) {
            ("", _) => Err(ParseError::Empty),
            ("USER", [username]) => Ok(ControlMessage::Hello {
                username: username.to_string(),
                token: None,
            }),
            ("USER", [username, token]) => Ok(ControlMessage::Hello {
                username: username.to_string(),
                token: Some(token.to_string()),
            }),
            ("LEAVE", []) => Ok(ControlMessage::Leave),
            ("PING", []) => Ok(ControlMessage::Ping),
            ("ROLE", ["SPECTATOR"]) => Ok(ControlMessage::Role {
                role: Role::Spectator,
                token: None,
            }),
            ("ROLE", ["PLAYER", slot, token]) => Ok(ControlMessage::Role {
                role: Role::Player(slot.parse().map_err(|_| malformed())?),
                token: Some(token.to_string()),
            }),
            ("RECONNECTED", [slot]) => Ok(ControlMessage::Reconnected {
                slot: slot.parse().map_err(|_| malformed())?,
            }),
            ("NOTICE", _) => Ok(ControlMessage::Notice(rest.to_string())),
            ("DENIED", _) => Ok(ControlMessage::Denied(rest.to_string())),
            ("UNAUTHORIZED", _) => Ok(ControlMessage::Unauthorized(rest.to_string())),
            ("USER" | "LEAVE" | "PING" | "ROLE" | "RECONNECTED", _) => Err(malformed()),
            (other, _) => Err(ParseError::UnknownCommand(other.to_string())),
        }
    }
}

impl fmt::Display for ControlMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControlMessage::Hello {
                username,
                token: None,
            } => write!(f, "USER {username}"),
            ControlMessage::Hello {
                username,
                token: Some(token),
            } => write!(f, "USER {username} {token}"),
            ControlMessage::Leave => f.write_str("LEAVE"),
            ControlMessage::Ping => f.write_str("PING"),
            ControlMessage::Role {
                role: Role::Player(slot),
                token,
            } => write!(f, "ROLE PLAYER {slot} {}", token.as_deref().unwrap_or("-")),
            ControlMessage::Role {
                role: Role::Spectator,
                ..
            } => f.write_str("ROLE SPECTATOR"),
            ControlMessage::Reconnected { slot } => write!(f, "RECONNECTED {slot}"),
            ControlMessage::Notice(text) => write!(f, "NOTICE {text}"),
            ControlMessage::Denied(reason) => write!(f, "DENIED {reason}"),
            ControlMessage::Unauthorized(reason) => write!(f, "UNAUTHORIZED {reason}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum CommandRejection {
    #[error("not your turn")]
    NotYourTurn,
    #[error("spectators cannot act")]
    Unauthorized,
}

impl CommandRejection {
    pub fn to_control(self) -> ControlMessage {
        ControlMessage::Unauthorized(self.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Command(GameCommand),
    Chat(String),
    Control(ControlMessage),
}

impl Inbound {
    pub fn from_message(message: &Message) -> Result<Self, ParseError> {
        let text = message.text();
        let line = strip_newline(&text);
        match message.channel {
            Channel::Data => match line.strip_prefix("CHAT ") {
                Some(chat) => Ok(Inbound::Chat(chat.to_string())),
                None if line == "CHAT" => Err(ParseError::Malformed("CHAT needs text".into())),
                None => line.parse().map(Inbound::Command),
            },
            Channel::Chat => {
                let chat = line.strip_prefix("CHAT ").unwrap_or(line);
                if chat.is_empty() {
                    Err(ParseError::Empty)
                } else {
                    Ok(Inbound::Chat(chat.to_string()))
                }
            }
            Channel::Control => line.parse().map(Inbound::Control),
        }
    }
}

fn strip_newline(text: &str) -> &str {
    let text = text.strip_suffix('\n').unwrap_or(text);
    text.strip_suffix('\r').unwrap_or(text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_game_commands_render_canonically() {
        for line in ["PLACE B5 H", "PLACE J10 V", "FIRE A1", "FIRE C99"] {
            let command: GameCommand = line.parse().unwrap();
            assert_eq!(command.to_string(), line);
        }

        let lower: GameCommand = "FIRE b5".parse().unwrap();
        assert_eq!(lower.to_string(), "FIRE B5");
    }

    #[test]
    fn test_game_command_errors() {
        assert_eq!("".parse::<GameCommand>(), Err(ParseError::Empty));
        assert!(matches!(
            "SHOOT B5".parse::<GameCommand>(),
            Err(ParseError::UnknownCommand(_))
        ));
        for bad in ["FIRE", "FIRE 5B", "FIRE B0", "FIRE B100", "PLACE B5", "PLACE B5 X", "FIRE B5 now"] {
            assert!(
                matches!(bad.parse::<GameCommand>(), Err(ParseError::Malformed(_))),
                "{bad} should be malformed"
            );
        }
    }

    #[test]
    fn test_outcomes() {
        assert_eq!("HIT".parse(), Ok(Outcome::Hit));
        assert_eq!("MISS".parse(), Ok(Outcome::Miss));
        assert_eq!(
            "SINK Patrol Boat".parse(),
            Ok(Outcome::Sink("Patrol Boat".into()))
        );
        assert_eq!(Outcome::Sink("Destroyer".into()).to_string(), "SINK Destroyer");
        assert!("SINK".parse::<Outcome>().is_err());
    }

    #[test]
    fn test_control_lines() {
        let lines = [
            "USER alice",
            "USER bob 00ff00ff00ff00ff",
            "LEAVE",
            "PING",
            "ROLE PLAYER A 0123456789abcdef",
            "ROLE SPECTATOR",
            "RECONNECTED B",
            "NOTICE bob disconnected, waiting 60s to reconnect",
            "DENIED bob is already connected",
            "UNAUTHORIZED not your turn",
        ];
        for line in lines {
            let parsed: ControlMessage = line.parse().unwrap();
            assert_eq!(parsed.to_string(), line);
        }

        assert_eq!(
            "ROLE PLAYER B tok".parse(),
            Ok(ControlMessage::Role {
                role: Role::Player(Slot::B),
                token: Some("tok".into())
            })
        );
        assert!(matches!(
            "USER".parse::<ControlMessage>(),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            "ROLE PLAYER C tok".parse::<ControlMessage>(),
            Err(ParseError::Malformed(_))
        ));
        assert!(matches!(
            "HELLO".parse::<ControlMessage>(),
            Err(ParseError::UnknownCommand(_))
        ));
    }

    #[test]
    fn test_inbound_classification() {
        let data = Message::new(Channel::Data, &b"FIRE B5\n"[..]);
        assert_eq!(
            Inbound::from_message(&data),
            Ok(Inbound::Command(GameCommand::Fire {
                coord: Coord::new('B', 5).unwrap()
            }))
        );

        let chat_in_data = Message::new(Channel::Data, &b"CHAT hi there\n"[..]);
        assert_eq!(
            Inbound::from_message(&chat_in_data),
            Ok(Inbound::Chat("hi there".into()))
        );

        let chat = Message::new(Channel::Chat, &b"CHAT hi\n"[..]);
        assert_eq!(Inbound::from_message(&chat), Ok(Inbound::Chat("hi".into())));

        let raw_chat = Message::new(Channel::Chat, &b"good luck\r\n"[..]);
        assert_eq!(
            Inbound::from_message(&raw_chat),
            Ok(Inbound::Chat("good luck".into()))
        );

        let control = Message::new(Channel::Control, &b"LEAVE\n"[..]);
        assert_eq!(
            Inbound::from_message(&control),
            Ok(Inbound::Control(ControlMessage::Leave))
        );
    }

    #[test]
    fn test_rejections_map_to_unauthorized() {
        assert_eq!(
            CommandRejection::NotYourTurn.to_control().to_string(),
            "UNAUTHORIZED not your turn"
        );
        assert_eq!(
            CommandRejection::Unauthorized.to_control().to_string(),
            "UNAUTHORIZED spectators cannot act"
        );
    }
}
