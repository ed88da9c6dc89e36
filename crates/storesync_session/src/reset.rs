//! Client-reset policy selection and hook observation.
//!
//! The reset mechanics themselves are the backend's job. This coordinator
//! only selects the policy at open time and observes the two hooks the
//! backend invokes around a reset, exactly once per episode.

use storesync_backend::ClientResetMode;
use tracing::{info, warn};

/// Selects the reset policy for this client.
///
/// Read-mostly clients can safely discard local unsynced changes;
/// read-write clients should attempt recovery first.
pub fn select_reset_mode(read_only: bool) -> ClientResetMode {
    if read_only {
        ClientResetMode::DiscardUnsyncedChanges
    } else {
        ClientResetMode::RecoverOrDiscardUnsyncedChanges
    }
}

/// Observes client-reset episodes.
#[derive(Debug)]
pub struct ClientResetCoordinator {
    mode: ClientResetMode,
    in_episode: bool,
    episodes_completed: u32,
}

impl ClientResetCoordinator {
    /// Creates a coordinator for the selected mode.
    pub fn new(mode: ClientResetMode) -> Self {
        Self {
            mode,
            in_episode: false,
            episodes_completed: 0,
        }
    }

    /// The policy selected at open time.
    pub fn mode(&self) -> ClientResetMode {
        self.mode
    }

    /// Pre-reset hook: marks the boundary past which local unsynced writes
    /// may be discarded.
    pub fn on_before(&mut self) {
        if self.in_episode {
            warn!("duplicate pre-reset hook; a reset episode is already in progress");
            return;
        }
        self.in_episode = true;
        info!(mode = ?self.mode, "client reset starting; unsynced local writes may be discarded");
    }

    /// Post-reset hook: confirms local and remote histories converged.
    pub fn on_after(&mut self) {
        if !self.in_episode {
            warn!("post-reset hook without a matching pre-reset hook");
            return;
        }
        self.in_episode = false;
        self.episodes_completed += 1;
        info!("client reset complete; histories converged");
    }

    /// True while a reset episode is between its two hooks.
    pub fn in_episode(&self) -> bool {
        self.in_episode
    }

    /// Number of completed reset episodes.
    pub fn episodes_completed(&self) -> u32 {
        self.episodes_completed
    }
}
