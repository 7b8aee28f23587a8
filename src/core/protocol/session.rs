//! Per-connection session state: rolling sequence counter, auth flag and
//! link phase.

use std::time::Duration;

use tokio::time::Instant;

/// Highest sequence value sent before the counter wraps back to 0.
pub const MAX_SEQUENCE: u8 = 254;

/// Lifecycle of one connection attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkPhase {
    Disconnected,
    Connecting,
    Authenticating,
    Ready,
    Executing,
}

#[derive(Debug)]
pub struct Session {
    sequence: u8,
    authenticated: bool,
    phase: LinkPhase,
    last_activity: Option<Instant>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            sequence: 0,
            authenticated: false,
            phase: LinkPhase::Disconnected,
            last_activity: None,
        }
    }

    /// Returns the current counter and advances it, wrapping after 254.
    pub fn next_sequence(&mut self) -> u8 {
        let current = self.sequence;
        self.sequence = if current >= MAX_SEQUENCE { 0 } else { current + 1 };
        current
    }

    /// Peeks at the value the next request will carry.
    pub fn sequence(&self) -> u8 {
        self.sequence
    }

    pub fn phase(&self) -> LinkPhase {
        self.phase
    }

    pub fn set_phase(&mut self, phase: LinkPhase) {
        self.phase = phase;
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.phase, LinkPhase::Disconnected | LinkPhase::Connecting)
    }

    pub fn is_authenticated(&self) -> bool {
        self.authenticated
    }

    pub fn set_authenticated(&mut self, authenticated: bool) {
        self.authenticated = authenticated;
    }

    /// Records radio activity for idle tracking.
    pub fn touch(&mut self) {
        self.last_activity = Some(Instant::now());
    }

    /// Time since the last request, or `None` if the session never sent one.
    pub fn idle_for(&self) -> Option<Duration> {
        self.last_activity.map(|at| at.elapsed())
    }

    /// Called on every disconnect: counter back to 0, auth cleared.
    pub fn reset(&mut self) {
        self.sequence = 0;
        self.authenticated = false;
        self.phase = LinkPhase::Disconnected;
        self.last_activity = None;
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_wraps_after_254() {
        let mut session = Session::new();
        for expected in 0..=MAX_SEQUENCE {
            assert_eq!(session.next_sequence(), expected);
        }
        assert_eq!(session.next_sequence(), 0);
        assert_eq!(session.next_sequence(), 1);
    }

    #[test]
    fn reset_clears_counter_and_auth() {
        let mut session = Session::new();
        session.next_sequence();
        session.next_sequence();
        session.set_authenticated(true);
        session.set_phase(LinkPhase::Ready);

        session.reset();

        assert_eq!(session.sequence(), 0);
        assert!(!session.is_authenticated());
        assert_eq!(session.phase(), LinkPhase::Disconnected);
        assert!(session.idle_for().is_none());
    }

    #[test]
    fn authentication_does_not_reset_counter() {
        let mut session = Session::new();
        session.next_sequence();
        session.set_authenticated(true);
        assert_eq!(session.next_sequence(), 1);
    }
}
