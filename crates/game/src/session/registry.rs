use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use super::{Role, Slot};
use crate::net::{ConnectionId, rand_u64};

const MAX_USERNAME_LEN: usize = 32;

/// Per-slot lifecycle. `Expired` is terminal for the slot's original
/// occupant; the slot is never handed to anyone else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Unassigned,
    Active,
    Suspended { deadline: Instant },
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// First arrival of this username; the slot is now permanently theirs.
    Seated { slot: Slot, token: String },
    Resumed { slot: Slot },
    Spectating,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Departure {
    Suspended {
        slot: Slot,
        username: String,
        deadline: Instant,
    },
    /// The player announced a leave; the slot expires immediately.
    Forfeited { slot: Slot, username: String },
    Spectator { username: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Expiry {
    pub slot: Slot,
    pub username: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SuspendedSlot {
    pub slot: Slot,
    pub username: String,
    pub remaining: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AdmitError {
    #[error("usernames must be 1-{MAX_USERNAME_LEN} printable characters without spaces")]
    InvalidUsername,
    #[error("{0} is already connected")]
    NameInUse(String),
    #[error("reconnect window for {0} has expired")]
    ReconnectWindowExpired(String),
    #[error("reconnect token rejected")]
    BadToken,
    #[error("connection has already been admitted")]
    AlreadyAdmitted,
}

#[derive(Debug)]
struct Session {
    username: String,
    token: String,
    connection: Option<ConnectionId>,
    disconnected_at: Option<Instant>,
    deadline: Option<Instant>,
    expired: bool,
}

impl Session {
    fn new(username: &str, connection: ConnectionId) -> Self {
        Self {
            username: username.to_string(),
            token: format!("{:016x}", rand_u64()),
            connection: Some(connection),
            disconnected_at: None,
            deadline: None,
            expired: false,
        }
    }

    fn state(&self) -> SlotState {
        if self.expired {
            SlotState::Expired
        } else if self.connection.is_some() {
            SlotState::Active
        } else {
            match self.deadline {
                Some(deadline) => SlotState::Suspended { deadline },
                None => SlotState::Expired,
            }
        }
    }
}

#[derive(Debug, Default)]
struct SlotTable {
    slots: [Option<Session>; 2],
    spectators: HashMap<ConnectionId, String>,
}

impl SlotTable {
    fn slot_of_user(&self, username: &str) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| {
            self.slots[slot.index()]
                .as_ref()
                .is_some_and(|s| s.username == username)
        })
    }

    fn slot_of_connection(&self, connection: ConnectionId) -> Option<Slot> {
        Slot::ALL.into_iter().find(|slot| {
            self.slots[slot.index()]
                .as_ref()
                .is_some_and(|s| s.connection == Some(connection))
        })
    }

    fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        if let Some(slot) = self.slot_of_connection(connection) {
            return Some(Role::Player(slot));
        }
        self.spectators
            .contains_key(&connection)
            .then_some(Role::Spectator)
    }
}

/// Durable player identities, their slots, and the live connection bound to
/// each. All state sits behind one lock that is only held for table updates.
#[derive(Debug)]
pub struct SessionRegistry {
    table: Mutex<SlotTable>,
    reconnect_window: Duration,
    require_token: bool,
}

impl SessionRegistry {
    pub fn new(reconnect_window: Duration, require_token: bool) -> Self {
        Self {
            table: Mutex::new(SlotTable::default()),
            reconnect_window,
            require_token,
        }
    }

    pub fn reconnect_window(&self) -> Duration {
        self.reconnect_window
    }

    pub fn admit(
        &self,
        connection: ConnectionId,
        username: &str,
        token: Option<&str>,
        now: Instant,
    ) -> Result<Admission, AdmitError> {
        validate_username(username)?;

        let mut table = self.table.lock();
        if table.role_of(connection).is_some() {
            return Err(AdmitError::AlreadyAdmitted);
        }

        if let Some(slot) = table.slot_of_user(username) {
            let Some(session) = table.slots[slot.index()].as_mut() else {
                return Err(AdmitError::NameInUse(username.to_string()));
            };

            return match session.state() {
                SlotState::Active => Err(AdmitError::NameInUse(username.to_string())),
                SlotState::Unassigned | SlotState::Expired => {
                    Err(AdmitError::ReconnectWindowExpired(username.to_string()))
                }
                SlotState::Suspended { deadline } if now >= deadline => {
                    Err(AdmitError::ReconnectWindowExpired(username.to_string()))
                }
                SlotState::Suspended { .. } => {
                    if self.require_token {
                        match token {
                            Some(provided) if provided == session.token => {}
                            _ => return Err(AdmitError::BadToken),
                        }
                    }
                    session.connection = Some(connection);
                    session.disconnected_at = None;
                    session.deadline = None;
                    Ok(Admission::Resumed { slot })
                }
            };
        }

        if table.spectators.values().any(|name| name == username) {
            return Err(AdmitError::NameInUse(username.to_string()));
        }

        let free = Slot::ALL
            .into_iter()
            .find(|slot| table.slots[slot.index()].is_none());
        match free {
            Some(slot) => {
                let session = Session::new(username, connection);
                let token = session.token.clone();
                table.slots[slot.index()] = Some(session);
                Ok(Admission::Seated { slot, token })
            }
            None => {
                table.spectators.insert(connection, username.to_string());
                Ok(Admission::Spectating)
            }
        }
    }

    /// Unbinds a connection that closed. Players are suspended, or forfeit
    /// outright when `leaving`; spectator entries are simply dropped.
    pub fn release(&self, connection: ConnectionId, leaving: bool, now: Instant) -> Option<Departure> {
        let mut table = self.table.lock();

        if let Some(username) = table.spectators.remove(&connection) {
            return Some(Departure::Spectator { username });
        }

        let slot = table.slot_of_connection(connection)?;
        let session = table.slots[slot.index()].as_mut()?;
        session.connection = None;
        session.disconnected_at = Some(now);

        if leaving {
            session.expired = true;
            return Some(Departure::Forfeited {
                slot,
                username: session.username.clone(),
            });
        }

        let deadline = now + self.reconnect_window;
        session.deadline = Some(deadline);
        Some(Departure::Suspended {
            slot,
            username: session.username.clone(),
            deadline,
        })
    }

    /// Expires every suspended session whose deadline has passed.
    pub fn expire_due(&self, now: Instant) -> Vec<Expiry> {
        let mut table = self.table.lock();
        let mut expired = Vec::new();
        for slot in Slot::ALL {
            let Some(session) = table.slots[slot.index()].as_mut() else {
                continue;
            };
            if let SlotState::Suspended { deadline } = session.state() {
                if now >= deadline {
                    session.expired = true;
                    expired.push(Expiry {
                        slot,
                        username: session.username.clone(),
                    });
                }
            }
        }
        expired
    }

    pub fn role_of(&self, connection: ConnectionId) -> Option<Role> {
        self.table.lock().role_of(connection)
    }

    pub fn username_of(&self, connection: ConnectionId) -> Option<String> {
        let table = self.table.lock();
        if let Some(name) = table.spectators.get(&connection) {
            return Some(name.clone());
        }
        let slot = table.slot_of_connection(connection)?;
        table.slots[slot.index()].as_ref().map(|s| s.username.clone())
    }

    pub fn slot_state(&self, slot: Slot) -> SlotState {
        self.table.lock().slots[slot.index()]
            .as_ref()
            .map_or(SlotState::Unassigned, Session::state)
    }

    pub fn username_in(&self, slot: Slot) -> Option<String> {
        self.table.lock().slots[slot.index()]
            .as_ref()
            .map(|s| s.username.clone())
    }

    pub fn connection_of(&self, slot: Slot) -> Option<ConnectionId> {
        self.table.lock().slots[slot.index()]
            .as_ref()
            .and_then(|s| s.connection)
    }

    pub fn admitted_connections(&self) -> Vec<ConnectionId> {
        let table = self.table.lock();
        table
            .slots
            .iter()
            .flatten()
            .filter_map(|s| s.connection)
            .chain(table.spectators.keys().copied())
            .collect()
    }

    pub fn suspended(&self, now: Instant) -> Vec<SuspendedSlot> {
        let table = self.table.lock();
        Slot::ALL
            .into_iter()
            .filter_map(|slot| {
                let session = table.slots[slot.index()].as_ref()?;
                match session.state() {
                    SlotState::Suspended { deadline } => Some(SuspendedSlot {
                        slot,
                        username: session.username.clone(),
                        remaining: deadline.saturating_duration_since(now),
                    }),
                    _ => None,
                }
            })
            .collect()
    }

    pub fn disconnected_since(&self, slot: Slot) -> Option<Instant> {
        self.table.lock().slots[slot.index()]
            .as_ref()
            .and_then(|s| s.disconnected_at)
    }

    /// Both slots have been claimed at least once.
    pub fn both_seated(&self) -> bool {
        self.table.lock().slots.iter().all(Option::is_some)
    }

    pub fn spectator_count(&self) -> usize {
        self.table.lock().spectators.len()
    }
}

fn validate_username(username: &str) -> Result<(), AdmitError> {
    let valid = !username.is_empty()
        && username.chars().count() <= MAX_USERNAME_LEN
        && username.chars().all(|c| !c.is_whitespace() && !c.is_control());
    if valid {
        Ok(())
    } else {
        Err(AdmitError::InvalidUsername)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_secs(60);

    fn conn(id: u64) -> ConnectionId {
        ConnectionId(id)
    }

    fn seated(admission: Result<Admission, AdmitError>) -> Slot {
        match admission {
            Ok(Admission::Seated { slot, .. }) => slot,
            other => panic!("expected a seat, got {other:?}"),
        }
    }

    #[test]
    fn test_first_two_names_take_slots_in_arrival_order() {
        let registry = SessionRegistry::new(WINDOW, false);
        let now = Instant::now();

        assert_eq!(seated(registry.admit(conn(1), "alice", None, now)), Slot::A);
        assert_eq!(seated(registry.admit(conn(2), "bob", None, now)), Slot::B);
        assert_eq!(
            registry.admit(conn(3), "carol", None, now),
            Ok(Admission::Spectating)
        );
        assert_eq!(
            registry.admit(conn(4), "dave", None, now),
            Ok(Admission::Spectating)
        );

        assert_eq!(registry.role_of(conn(1)), Some(Role::Player(Slot::A)));
        assert_eq!(registry.role_of(conn(2)), Some(Role::Player(Slot::B)));
        assert_eq!(registry.role_of(conn(3)), Some(Role::Spectator));
        assert_eq!(registry.spectator_count(), 2);
        assert_eq!(
            registry.admit(conn(5), "carol", None, now),
            Err(AdmitError::NameInUse("carol".into()))
        );
        assert!(registry.both_seated());
        assert_eq!(registry.admitted_connections().len(), 4);
    }

    #[test]
    fn test_active_name_cannot_be_claimed_twice() {
        let registry = SessionRegistry::new(WINDOW, false);
        let now = Instant::now();

        registry.admit(conn(1), "alice", None, now).unwrap();
        assert_eq!(
            registry.admit(conn(2), "alice", None, now),
            Err(AdmitError::NameInUse("alice".into()))
        );
        assert_eq!(
            registry.admit(conn(1), "zed", None, now),
            Err(AdmitError::AlreadyAdmitted)
        );
        assert_eq!(registry.connection_of(Slot::A), Some(conn(1)));
    }

    #[test]
    fn test_reconnect_inside_window_resumes_same_slot() {
        let registry = SessionRegistry::new(WINDOW, false);
        let t = Instant::now();
        registry.admit(conn(1), "alice", None, t).unwrap();
        registry.admit(conn(2), "bob", None, t).unwrap();

        let departure = registry.release(conn(2), false, t).unwrap();
        assert_eq!(
            departure,
            Departure::Suspended {
                slot: Slot::B,
                username: "bob".into(),
                deadline: t + WINDOW
            }
        );
        assert_eq!(
            registry.slot_state(Slot::B),
            SlotState::Suspended { deadline: t + WINDOW }
        );
        assert_eq!(registry.disconnected_since(Slot::B), Some(t));

        let later = t + Duration::from_secs(59);
        assert!(registry.expire_due(later).is_empty());
        assert_eq!(
            registry.admit(conn(5), "bob", None, later),
            Ok(Admission::Resumed { slot: Slot::B })
        );
        assert_eq!(registry.slot_state(Slot::B), SlotState::Active);
        assert_eq!(registry.connection_of(Slot::B), Some(conn(5)));
        assert_eq!(registry.role_of(conn(2)), None);

        // A stale close for the old connection changes nothing.
        assert_eq!(registry.release(conn(2), false, later), None);
        assert_eq!(registry.slot_state(Slot::B), SlotState::Active);
    }

    #[test]
    fn test_reconnect_after_window_finds_slot_expired() {
        let registry = SessionRegistry::new(WINDOW, false);
        let t = Instant::now();
        registry.admit(conn(1), "alice", None, t).unwrap();
        registry.admit(conn(2), "bob", None, t).unwrap();
        registry.release(conn(2), false, t);

        let late = t + Duration::from_secs(61);
        assert_eq!(
            registry.admit(conn(6), "bob", None, late),
            Err(AdmitError::ReconnectWindowExpired("bob".into()))
        );

        assert_eq!(
            registry.expire_due(late),
            vec![Expiry {
                slot: Slot::B,
                username: "bob".into()
            }]
        );
        assert_eq!(registry.slot_state(Slot::B), SlotState::Expired);
        assert!(registry.expire_due(late).is_empty());

        assert_eq!(
            registry.admit(conn(7), "bob", None, late),
            Err(AdmitError::ReconnectWindowExpired("bob".into()))
        );
        // The forfeited slot is not reassigned to newcomers.
        assert_eq!(
            registry.admit(conn(8), "erin", None, late),
            Ok(Admission::Spectating)
        );
    }

    #[test]
    fn test_deadline_is_exclusive() {
        let registry = SessionRegistry::new(WINDOW, false);
        let t = Instant::now();
        registry.admit(conn(1), "alice", None, t).unwrap();
        registry.release(conn(1), false, t);

        assert_eq!(
            registry.admit(conn(2), "alice", None, t + WINDOW),
            Err(AdmitError::ReconnectWindowExpired("alice".into()))
        );
    }

    #[test]
    fn test_leave_forfeits_immediately() {
        let registry = SessionRegistry::new(WINDOW, false);
        let t = Instant::now();
        registry.admit(conn(1), "alice", None, t).unwrap();

        assert_eq!(
            registry.release(conn(1), true, t),
            Some(Departure::Forfeited {
                slot: Slot::A,
                username: "alice".into()
            })
        );
        assert_eq!(registry.slot_state(Slot::A), SlotState::Expired);
        assert!(registry.expire_due(t + WINDOW).is_empty());
    }

    #[test]
    fn test_spectators_have_no_reconnect_state() {
        let registry = SessionRegistry::new(WINDOW, false);
        let t = Instant::now();
        registry.admit(conn(1), "alice", None, t).unwrap();
        registry.admit(conn(2), "bob", None, t).unwrap();
        registry.admit(conn(3), "carol", None, t).unwrap();

        assert_eq!(
            registry.release(conn(3), false, t),
            Some(Departure::Spectator {
                username: "carol".into()
            })
        );
        assert_eq!(registry.role_of(conn(3)), None);
        assert!(registry.suspended(t).is_empty());

        // Returning under the same name is just a new spectator.
        assert_eq!(
            registry.admit(conn(4), "carol", None, t),
            Ok(Admission::Spectating)
        );
    }

    #[test]
    fn test_token_required_for_resume_when_enforced() {
        let registry = SessionRegistry::new(WINDOW, true);
        let t = Instant::now();
        let token = match registry.admit(conn(1), "alice", None, t) {
            Ok(Admission::Seated { token, .. }) => token,
            other => panic!("unexpected {other:?}"),
        };
        registry.release(conn(1), false, t);

        assert_eq!(
            registry.admit(conn(2), "alice", None, t),
            Err(AdmitError::BadToken)
        );
        assert_eq!(
            registry.admit(conn(3), "alice", Some("not-it"), t),
            Err(AdmitError::BadToken)
        );
        assert_eq!(
            registry.admit(conn(4), "alice", Some(&token), t),
            Ok(Admission::Resumed { slot: Slot::A })
        );
    }

    #[test]
    fn test_suspended_reports_remaining_time() {
        let registry = SessionRegistry::new(WINDOW, false);
        let t = Instant::now();
        registry.admit(conn(1), "alice", None, t).unwrap();
        registry.release(conn(1), false, t);

        let report = registry.suspended(t + Duration::from_secs(20));
        assert_eq!(
            report,
            vec![SuspendedSlot {
                slot: Slot::A,
                username: "alice".into(),
                remaining: Duration::from_secs(40)
            }]
        );
    }

    #[test]
    fn test_username_validation() {
        let registry = SessionRegistry::new(WINDOW, false);
        let now = Instant::now();
        let too_long = "x".repeat(33);
        for bad in ["", "two words", "tab\there", too_long.as_str()] {
            assert_eq!(
                registry.admit(conn(1), bad, None, now),
                Err(AdmitError::InvalidUsername)
            );
        }
        assert!(registry.admit(conn(1), &"x".repeat(32), None, now).is_ok());
    }

    #[test]
    fn test_at_most_one_connection_per_slot() {
        let registry = SessionRegistry::new(WINDOW, false);
        let t = Instant::now();
        registry.admit(conn(1), "alice", None, t).unwrap();
        registry.admit(conn(2), "bob", None, t).unwrap();

        for round in 0..5u64 {
            let old = registry.connection_of(Slot::A).unwrap();
            registry.release(old, false, t);
            registry
                .admit(conn(100 + round), "alice", None, t)
                .unwrap();

            let holders = registry
                .admitted_connections()
                .into_iter()
                .filter(|c| registry.role_of(*c) == Some(Role::Player(Slot::A)))
                .count();
            assert_eq!(holders, 1);
        }
    }
}
