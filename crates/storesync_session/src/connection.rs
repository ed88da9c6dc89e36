//! Connection-state observation.
//!
//! The backend delivers `(previous, next)` state pairs; the monitor derives
//! a semantic event from each pair and logs it. It performs no corrective
//! action: reconnection is automatic at the transport layer. Its one
//! operator-facing duty is alerting on repeated reconnect failures.

use storesync_backend::{ConnectionState, ConnectionTransition};
use tracing::{debug, info, warn};

/// Semantic event derived from a connection-state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A connection attempt started.
    Connecting,
    /// The session is connected.
    Connected,
    /// An established connection dropped.
    Disconnected,
    /// A reconnect attempt failed.
    FailedReconnecting,
}

/// Derives the semantic event for a `(previous, next)` pair.
///
/// The four events are mutually exclusive given the pair; an unmatched pair
/// yields `None` and is the caller's cue to log an unexpected transition.
pub fn interpret(previous: ConnectionState, next: ConnectionState) -> Option<ConnectionEvent> {
    match (previous, next) {
        (_, ConnectionState::Connecting) => Some(ConnectionEvent::Connecting),
        (_, ConnectionState::Connected) => Some(ConnectionEvent::Connected),
        (ConnectionState::Connected, ConnectionState::Disconnected) => {
            Some(ConnectionEvent::Disconnected)
        }
        (ConnectionState::Connecting, ConnectionState::Disconnected) => {
            Some(ConnectionEvent::FailedReconnecting)
        }
        (ConnectionState::Disconnected, ConnectionState::Disconnected) => None,
    }
}

/// Observes connection transitions for the open replica.
#[derive(Debug)]
pub struct ConnectionMonitor {
    alert_threshold: u32,
    failed_streak: u32,
}

impl ConnectionMonitor {
    /// Creates a monitor that alerts after `alert_threshold` consecutive
    /// reconnect failures.
    pub fn new(alert_threshold: u32) -> Self {
        Self {
            alert_threshold,
            failed_streak: 0,
        }
    }

    /// Logs the semantic event for one transition and returns it.
    pub fn observe(&mut self, transition: ConnectionTransition) -> Option<ConnectionEvent> {
        let event = interpret(transition.previous, transition.next);
        match event {
            Some(ConnectionEvent::Connecting) => debug!("connecting to sync backend"),
            Some(ConnectionEvent::Connected) => {
                if self.failed_streak > 0 {
                    info!(after_failures = self.failed_streak, "reconnected");
                } else {
                    info!("connected");
                }
                self.failed_streak = 0;
            }
            Some(ConnectionEvent::Disconnected) => {
                // While the network stays down the pair alternates
                // (Disconnected, Connecting) / (Connecting, Disconnected);
                // no manual reconnect call is needed.
                info!("disconnected; transport retries automatically");
            }
            Some(ConnectionEvent::FailedReconnecting) => {
                self.failed_streak += 1;
                if self.failed_streak >= self.alert_threshold {
                    warn!(
                        consecutive_failures = self.failed_streak,
                        "repeated reconnect failures"
                    );
                } else {
                    info!("failed to reconnect");
                }
            }
            None => warn!(
                previous = ?transition.previous,
                next = ?transition.next,
                "unexpected connection transition"
            ),
        }
        event
    }

    /// Current count of consecutive reconnect failures.
    pub fn failed_streak(&self) -> u32 {
        self.failed_streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use storesync_backend::ConnectionState::{Connected, Connecting, Disconnected};

    #[test]
    fn every_pair_maps_to_at_most_one_event() {
        assert_eq!(
            interpret(Disconnected, Connecting),
            Some(ConnectionEvent::Connecting)
        );
        assert_eq!(
            interpret(Connecting, Connected),
            Some(ConnectionEvent::Connected)
        );
        assert_eq!(
            interpret(Connected, Disconnected),
            Some(ConnectionEvent::Disconnected)
        );
        assert_eq!(
            interpret(Connecting, Disconnected),
            Some(ConnectionEvent::FailedReconnecting)
        );
        assert_eq!(interpret(Disconnected, Disconnected), None);
    }

    #[test]
    fn established_drop_is_disconnected_not_failed_reconnect() {
        // (Connected, Disconnected) must derive exactly Disconnected.
        assert_eq!(
            interpret(Connected, Disconnected),
            Some(ConnectionEvent::Disconnected)
        );
        assert_ne!(
            interpret(Connected, Disconnected),
            Some(ConnectionEvent::FailedReconnecting)
        );
    }

    #[test]
    fn next_state_dominates_for_connecting_and_connected() {
        for previous in [Disconnected, Connecting, Connected] {
            assert_eq!(
                interpret(previous, Connecting),
                Some(ConnectionEvent::Connecting)
            );
            assert_eq!(
                interpret(previous, Connected),
                Some(ConnectionEvent::Connected)
            );
        }
    }

    #[test]
    fn failed_streak_counts_and_resets() {
        let mut monitor = ConnectionMonitor::new(3);
        let fail = ConnectionTransition::new(Connecting, Disconnected);

        monitor.observe(fail);
        monitor.observe(fail);
        assert_eq!(monitor.failed_streak(), 2);

        monitor.observe(ConnectionTransition::new(Connecting, Connected));
        assert_eq!(monitor.failed_streak(), 0);
    }

    #[test]
    fn unmatched_pair_does_not_touch_the_streak() {
        let mut monitor = ConnectionMonitor::new(3);
        monitor.observe(ConnectionTransition::new(Connecting, Disconnected));
        assert_eq!(
            monitor.observe(ConnectionTransition::new(Disconnected, Disconnected)),
            None
        );
        assert_eq!(monitor.failed_streak(), 1);
    }
}
