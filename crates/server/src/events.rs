use broadside::{MatchEvent, Role};

pub fn log_event(event: &MatchEvent) {
    match event {
        MatchEvent::Listening { addr } => log::info!("Listening on {addr}"),
        MatchEvent::Connected { id, addr } => log::info!("{id} connected from {addr}"),
        MatchEvent::Admitted { id, username, role } => match role {
            Role::Player(slot) => log::info!("{username} seated in slot {slot} ({id})"),
            Role::Spectator => log::info!("{username} joined as spectator ({id})"),
        },
        MatchEvent::Resumed { id, username, slot } => {
            log::info!("{username} reconnected into slot {slot} ({id})")
        }
        MatchEvent::Suspended {
            username,
            slot,
            window,
        } => log::info!(
            "{username} dropped from slot {slot}, holding it for {}s",
            window.as_secs()
        ),
        MatchEvent::Expired { username, slot } => {
            log::warn!("{username} did not reconnect in time, slot {slot} forfeited")
        }
        MatchEvent::Left { username, role } => log::info!("{username} ({role}) left"),
        MatchEvent::Denied { id, reason } => log::warn!("{id} denied: {reason}"),
        MatchEvent::Closed { id, reason } => log::debug!("{id} closed: {reason}"),
        MatchEvent::Error { message } => log::error!("{message}"),
    }
}
