use crate::dispatch::{CommandRejection, GameCommand};
use crate::session::{Role, Slot};

use super::{EngineEvent, GameEngine, Turn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    NotStarted,
    Placement,
    Firing(Slot),
    Over,
}

/// Pass-through engine: accepts any well-formed command from the player
/// allowed to act, echoes it as a state update and hands the turn over on
/// every `FIRE`. It knows nothing about boards or fleets.
#[derive(Debug)]
pub struct TurnRelay {
    phase: Phase,
    paused: [bool; 2],
    transcript: Vec<String>,
    placements: [Vec<String>; 2],
}

impl Default for TurnRelay {
    fn default() -> Self {
        Self::new()
    }
}

impl TurnRelay {
    pub fn new() -> Self {
        Self {
            phase: Phase::NotStarted,
            paused: [false; 2],
            transcript: Vec::new(),
            placements: [Vec::new(), Vec::new()],
        }
    }

    fn announce(&mut self, text: String) -> EngineEvent {
        self.transcript.push(text.clone());
        EngineEvent::Broadcast { text }
    }

    pub fn transcript(&self) -> &[String] {
        &self.transcript
    }
}

impl GameEngine for TurnRelay {
    fn start(&mut self) -> Vec<EngineEvent> {
        if self.phase != Phase::NotStarted {
            return Vec::new();
        }
        self.phase = Phase::Placement;
        vec![
            self.announce("GAME START".to_string()),
            self.announce("TURN OPEN".to_string()),
        ]
    }

    fn command(
        &mut self,
        slot: Slot,
        command: GameCommand,
    ) -> Result<Vec<EngineEvent>, CommandRejection> {
        self.turn().check(slot)?;

        match command {
            GameCommand::Place { .. } => {
                let placed = format!("PLACED {}", command.to_string().trim_start_matches("PLACE "));
                self.placements[slot.index()].push(placed.clone());
                Ok(vec![
                    EngineEvent::reply(slot, placed),
                    self.announce(format!("{slot} placed a ship")),
                ])
            }
            GameCommand::Fire { .. } => {
                let next = slot.other();
                self.phase = Phase::Firing(next);
                Ok(vec![
                    self.announce(format!("{slot} {command}")),
                    self.announce(format!("TURN {next}")),
                ])
            }
        }
    }

    fn snapshot(&self, viewer: Role) -> Vec<String> {
        let private = viewer
            .slot()
            .map(|slot| self.placements[slot.index()].as_slice())
            .unwrap_or_default();

        let mut lines = Vec::with_capacity(self.transcript.len() + private.len() + 2);
        lines.push(format!(
            "SNAPSHOT {}",
            self.transcript.len() + private.len() + 1
        ));
        lines.extend(private.iter().cloned());
        lines.extend(self.transcript.iter().cloned());
        lines.push(format!("TURN {}", self.turn()));
        lines
    }

    fn suspended(&mut self, slot: Slot) -> Vec<EngineEvent> {
        self.paused[slot.index()] = true;
        Vec::new()
    }

    fn resumed(&mut self, slot: Slot) -> Vec<EngineEvent> {
        self.paused[slot.index()] = false;
        Vec::new()
    }

    fn forfeited(&mut self, slot: Slot) -> Vec<EngineEvent> {
        self.paused[slot.index()] = false;
        match self.phase {
            Phase::Over => return Vec::new(),
            // Nobody to declare a winner against yet.
            Phase::NotStarted => {
                self.phase = Phase::Over;
                return Vec::new();
            }
            _ => {}
        }
        self.phase = Phase::Over;
        vec![self.announce(format!("GAME OVER {} wins by forfeit", slot.other()))]
    }

    fn turn(&self) -> Turn {
        match self.phase {
            Phase::Over => Turn::Finished,
            Phase::NotStarted => Turn::Waiting,
            _ if self.paused.iter().any(|&p| p) => Turn::Waiting,
            Phase::Placement => Turn::Open,
            Phase::Firing(slot) => Turn::Player(slot),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::{Coord, Orientation};

    fn coord(row: char, column: u8) -> Coord {
        Coord::new(row, column).unwrap()
    }

    #[test]
    fn test_placement_is_open_then_fire_alternates() {
        let mut relay = TurnRelay::new();
        assert_eq!(relay.turn(), Turn::Waiting);
        assert_eq!(
            relay.command(Slot::A, GameCommand::Fire { coord: coord('A', 1) }),
            Err(CommandRejection::NotYourTurn)
        );

        relay.start();
        assert_eq!(relay.turn(), Turn::Open);

        let events = relay
            .command(
                Slot::B,
                GameCommand::Place {
                    coord: coord('C', 3),
                    orientation: Orientation::Vertical,
                },
            )
            .unwrap();
        assert_eq!(events[0], EngineEvent::reply(Slot::B, "PLACED C3 V"));
        assert_eq!(relay.turn(), Turn::Open);

        let events = relay
            .command(Slot::A, GameCommand::Fire { coord: coord('B', 5) })
            .unwrap();
        assert_eq!(
            events,
            vec![
                EngineEvent::broadcast("A FIRE B5"),
                EngineEvent::broadcast("TURN B")
            ]
        );
        assert_eq!(relay.turn(), Turn::Player(Slot::B));

        assert_eq!(
            relay.command(Slot::A, GameCommand::Fire { coord: coord('B', 6) }),
            Err(CommandRejection::NotYourTurn)
        );
        assert!(
            relay
                .command(Slot::B, GameCommand::Fire { coord: coord('A', 2) })
                .is_ok()
        );
        assert_eq!(relay.turn(), Turn::Player(Slot::A));
    }

    #[test]
    fn test_suspension_pauses_turns() {
        let mut relay = TurnRelay::new();
        relay.start();
        relay
            .command(Slot::A, GameCommand::Fire { coord: coord('B', 5) })
            .unwrap();

        relay.suspended(Slot::A);
        assert_eq!(relay.turn(), Turn::Waiting);
        relay.resumed(Slot::A);
        assert_eq!(relay.turn(), Turn::Player(Slot::B));
    }

    #[test]
    fn test_snapshot_includes_private_placements() {
        let mut relay = TurnRelay::new();
        relay.start();
        relay
            .command(
                Slot::A,
                GameCommand::Place {
                    coord: coord('A', 1),
                    orientation: Orientation::Horizontal,
                },
            )
            .unwrap();

        let for_a = relay.snapshot(Role::Player(Slot::A));
        assert_eq!(for_a[0], "SNAPSHOT 5");
        assert!(for_a.contains(&"PLACED A1 H".to_string()));
        assert_eq!(for_a.last().map(String::as_str), Some("TURN OPEN"));

        let for_spectator = relay.snapshot(Role::Spectator);
        assert!(!for_spectator.contains(&"PLACED A1 H".to_string()));
        assert_eq!(for_spectator.len(), 5);
    }

    #[test]
    fn test_forfeit_ends_the_game_once() {
        let mut relay = TurnRelay::new();
        relay.start();
        relay.suspended(Slot::B);

        assert_eq!(
            relay.forfeited(Slot::B),
            vec![EngineEvent::broadcast("GAME OVER A wins by forfeit")]
        );
        assert_eq!(relay.turn(), Turn::Finished);
        assert!(relay.forfeited(Slot::A).is_empty());
        assert!(
            relay
                .command(Slot::A, GameCommand::Fire { coord: coord('B', 5) })
                .is_err()
        );
    }

    #[test]
    fn test_forfeit_before_start_announces_nothing() {
        let mut relay = TurnRelay::new();
        assert!(relay.forfeited(Slot::A).is_empty());
        assert_eq!(relay.turn(), Turn::Finished);
        assert!(relay.start().is_empty());
        assert!(relay.transcript().is_empty());
    }
}
