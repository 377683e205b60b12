mod registry;

use std::fmt;
use std::str::FromStr;

pub use registry::{
    Admission, AdmitError, Departure, Expiry, SessionRegistry, SlotState, SuspendedSlot,
};

/// One of the two fixed player positions of a match.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    A,
    B,
}

impl Slot {
    pub const ALL: [Slot; 2] = [Slot::A, Slot::B];

    pub fn index(self) -> usize {
        match self {
            Slot::A => 0,
            Slot::B => 1,
        }
    }

    pub fn other(self) -> Slot {
        match self {
            Slot::A => Slot::B,
            Slot::B => Slot::A,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Slot::A => "A",
            Slot::B => "B",
        })
    }
}

impl FromStr for Slot {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(Slot::A),
            "B" => Ok(Slot::B),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Player(Slot),
    Spectator,
}

impl Role {
    pub fn slot(self) -> Option<Slot> {
        match self {
            Role::Player(slot) => Some(slot),
            Role::Spectator => None,
        }
    }

    pub fn tag(self) -> &'static str {
        match self {
            Role::Player(Slot::A) => "A",
            Role::Player(Slot::B) => "B",
            Role::Spectator => "spectator",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Player(slot) => write!(f, "player {slot}"),
            Role::Spectator => f.write_str("spectator"),
        }
    }
}
