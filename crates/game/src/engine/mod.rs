mod relay;

use std::fmt;

use tokio::sync::mpsc;

use crate::dispatch::{CommandRejection, GameCommand};
use crate::net::ConnectionId;
use crate::session::{Role, Slot};

pub use relay::TurnRelay;

/// Who may currently issue game commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Turn {
    #[default]
    Waiting,
    Open,
    Player(Slot),
    Finished,
}

impl Turn {
    pub fn check(self, slot: Slot) -> Result<(), CommandRejection> {
        match self {
            Turn::Open => Ok(()),
            Turn::Player(holder) if holder == slot => Ok(()),
            _ => Err(CommandRejection::NotYourTurn),
        }
    }
}

impl fmt::Display for Turn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Turn::Waiting => f.write_str("WAITING"),
            Turn::Open => f.write_str("OPEN"),
            Turn::Player(slot) => write!(f, "{slot}"),
            Turn::Finished => f.write_str("FINISHED"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    Reply { slot: Slot, text: String },
    Broadcast { text: String },
}

impl EngineEvent {
    pub fn reply(slot: Slot, text: impl Into<String>) -> Self {
        EngineEvent::Reply {
            slot,
            text: text.into(),
        }
    }

    pub fn broadcast(text: impl Into<String>) -> Self {
        EngineEvent::Broadcast { text: text.into() }
    }
}

pub trait GameEngine: Send + 'static {
    fn start(&mut self) -> Vec<EngineEvent>;

    /// Applies a command from a player. The dispatcher gates on the cached
    /// [`Turn`] first, but the engine has the final say.
    fn command(
        &mut self,
        slot: Slot,
        command: GameCommand,
    ) -> Result<Vec<EngineEvent>, CommandRejection>;

    /// Current authoritative state for one viewer, as lines.
    fn snapshot(&self, viewer: Role) -> Vec<String>;

    fn suspended(&mut self, slot: Slot) -> Vec<EngineEvent>;

    fn resumed(&mut self, slot: Slot) -> Vec<EngineEvent>;

    fn forfeited(&mut self, slot: Slot) -> Vec<EngineEvent>;

    fn turn(&self) -> Turn;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineRequest {
    Start,
    Command { slot: Slot, command: GameCommand },
    Snapshot { connection: ConnectionId, viewer: Role },
    Suspended(Slot),
    Resumed(Slot),
    Forfeited(Slot),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineOutput {
    pub events: Vec<EngineEvent>,
    pub rejected: Option<(Slot, CommandRejection)>,
    pub snapshot: Option<(ConnectionId, Vec<String>)>,
    pub turn: Turn,
}

/// Runs `engine` on its own task. Requests are processed strictly in order;
/// the task ends when the request sender is dropped.
pub fn spawn_engine(
    mut engine: Box<dyn GameEngine>,
) -> (
    mpsc::UnboundedSender<EngineRequest>,
    mpsc::UnboundedReceiver<EngineOutput>,
) {
    let (request_tx, mut requests) = mpsc::unbounded_channel();
    let (output_tx, outputs) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Some(request) = requests.recv().await {
            let output = handle_request(engine.as_mut(), request);
            if output_tx.send(output).is_err() {
                break;
            }
        }
        log::debug!("game engine stopped");
    });

    (request_tx, outputs)
}

fn handle_request(engine: &mut dyn GameEngine, request: EngineRequest) -> EngineOutput {
    let mut output = EngineOutput {
        events: Vec::new(),
        rejected: None,
        snapshot: None,
        turn: Turn::Waiting,
    };

    match request {
        EngineRequest::Start => output.events = engine.start(),
        EngineRequest::Command { slot, command } => match engine.command(slot, command) {
            Ok(events) => output.events = events,
            Err(rejection) => output.rejected = Some((slot, rejection)),
        },
        EngineRequest::Snapshot { connection, viewer } => {
            output.snapshot = Some((connection, engine.snapshot(viewer)));
        }
        EngineRequest::Suspended(slot) => output.events = engine.suspended(slot),
        EngineRequest::Resumed(slot) => output.events = engine.resumed(slot),
        EngineRequest::Forfeited(slot) => output.events = engine.forfeited(slot),
    }

    output.turn = engine.turn();
    output
}
