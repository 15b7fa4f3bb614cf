// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Session state machine

use std::fmt;

use thiserror::Error;

/// Connection and privilege state of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// No link to the device.
    #[default]
    Disconnected,
    /// The link is up, only unprivileged operations are permitted.
    Connected,
    /// The device accepted the credentials.
    LoggedIn,
}

impl SessionState {
    #[must_use]
    pub const fn is_connected(self) -> bool {
        !matches!(self, Self::Disconnected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connected => "connected",
            Self::LoggedIn => "logged in",
        };
        f.write_str(s)
    }
}

/// Input of the state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Event {
    LinkUp,
    LinkDown,
    LoginAccepted,
    LoginRejected,
    KeepaliveOk,
    KeepaliveMissed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event {event:?} is not permitted while {from}")]
pub(crate) struct InvalidTransition {
    pub(crate) from: SessionState,
    pub(crate) event: Event,
}

/// The single authority on [`SessionState`].
#[derive(Debug)]
pub(crate) struct Machine {
    state: SessionState,
    missed: u32,
    max_missed: u32,
}

impl Machine {
    pub(crate) fn new(max_missed: u32) -> Self {
        Self {
            state: SessionState::Disconnected,
            missed: 0,
            max_missed: max_missed.max(1),
        }
    }

    pub(crate) const fn state(&self) -> SessionState {
        self.state
    }

    pub(crate) fn apply(&mut self, event: Event) -> Result<SessionState, InvalidTransition> {
        use Event::*;
        use SessionState::*;

        let next = match (self.state, event) {
            (_, LinkDown) => Disconnected,
            (Disconnected, LinkUp) => Connected,
            (Connected | LoggedIn, LoginAccepted) => LoggedIn,
            (Connected | LoggedIn, LoginRejected) => Connected,
            (LoggedIn, KeepaliveOk) => LoggedIn,
            (LoggedIn, KeepaliveMissed) => {
                if self.missed + 1 >= self.max_missed {
                    Disconnected
                } else {
                    LoggedIn
                }
            }
            (from, event) => return Err(InvalidTransition { from, event }),
        };
        self.missed = match event {
            KeepaliveMissed if next == LoggedIn => self.missed + 1,
            _ => 0,
        };
        if next != self.state {
            log::debug!("Session {} -> {next} ({event:?})", self.state);
        }
        self.state = next;
        Ok(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_and_login() {
        let mut machine = Machine::new(3);
        assert_eq!(SessionState::Disconnected, machine.state());
        assert_eq!(Ok(SessionState::Connected), machine.apply(Event::LinkUp));
        assert_eq!(Ok(SessionState::LoggedIn), machine.apply(Event::LoginAccepted));
    }

    #[test]
    fn rejected_login_keeps_the_link() {
        let mut machine = Machine::new(3);
        machine.apply(Event::LinkUp).unwrap();
        assert_eq!(Ok(SessionState::Connected), machine.apply(Event::LoginRejected));
        machine.apply(Event::LoginAccepted).unwrap();
        assert_eq!(Ok(SessionState::Connected), machine.apply(Event::LoginRejected));
    }

    #[test]
    fn link_down_from_every_state() {
        for events in [&[][..], &[Event::LinkUp], &[Event::LinkUp, Event::LoginAccepted]] {
            let mut machine = Machine::new(3);
            for event in events {
                machine.apply(*event).unwrap();
            }
            assert_eq!(Ok(SessionState::Disconnected), machine.apply(Event::LinkDown));
        }
    }

    #[test]
    fn consecutive_keepalive_misses() {
        let mut machine = Machine::new(3);
        machine.apply(Event::LinkUp).unwrap();
        machine.apply(Event::LoginAccepted).unwrap();
        assert_eq!(Ok(SessionState::LoggedIn), machine.apply(Event::KeepaliveMissed));
        assert_eq!(Ok(SessionState::LoggedIn), machine.apply(Event::KeepaliveMissed));
        // A successful heartbeat resets the counter.
        machine.apply(Event::KeepaliveOk).unwrap();
        assert_eq!(Ok(SessionState::LoggedIn), machine.apply(Event::KeepaliveMissed));
        assert_eq!(Ok(SessionState::LoggedIn), machine.apply(Event::KeepaliveMissed));
        assert_eq!(Ok(SessionState::Disconnected), machine.apply(Event::KeepaliveMissed));
    }

    #[test]
    fn reject_invalid_transitions() {
        let mut machine = Machine::new(3);
        assert!(machine.apply(Event::LoginAccepted).is_err());
        assert!(machine.apply(Event::KeepaliveMissed).is_err());
        machine.apply(Event::LinkUp).unwrap();
        assert!(machine.apply(Event::LinkUp).is_err());
        assert!(machine.apply(Event::KeepaliveOk).is_err());
        assert_eq!(SessionState::Connected, machine.state());
    }
}
