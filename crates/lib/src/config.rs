//! Room configuration.

use serde::{Deserialize, Serialize};

use crate::Result;

/// Settings for a [`Room`](crate::Room).
///
/// Deserializes from JSON with every field optional; missing fields take
/// their defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoomConfig {
    /// Reject all local mutations.
    pub read_only: bool,
    /// Server-assigned connection id. Without one, ids use a random
    /// `local-` prefix until [`Room::set_connection_id`](crate::Room::set_connection_id).
    pub connection_id: Option<u32>,
    /// Maximum number of undo entries kept. `0` disables history.
    pub history_limit: usize,
    /// Suffix generated list positions with the connection id so concurrent
    /// inserts from different clients never produce the same position.
    pub seed_positions: bool,
}

impl Default for RoomConfig {
    fn default() -> Self {
        Self {
            read_only: false,
            connection_id: None,
            history_limit: 100,
            seed_positions: true,
        }
    }
}

impl RoomConfig {
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    pub fn with_connection_id(mut self, connection_id: u32) -> Self {
        self.connection_id = Some(connection_id);
        self
    }

    pub fn with_history_limit(mut self, history_limit: usize) -> Self {
        self.history_limit = history_limit;
        self
    }

    pub fn with_seed_positions(mut self, seed_positions: bool) -> Self {
        self.seed_positions = seed_positions;
        self
    }

    /// Parses a configuration from JSON.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
