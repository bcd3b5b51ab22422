//! One point-in-time dump of game state.
//!
//! A [`Snapshot`] is the parsed JSON document produced by the in-game script,
//! either as an RCON reply or as a file under `script-output`. It is kept
//! loosely typed: each metric group deserializes only the sub-tree it needs,
//! so a malformed sub-tree fails one group and not the whole scrape.
//!
//! ```text
//! {
//!   "game":      { "time": { "tick", "ticks_played", "paused" } },
//!   "players":   { <username>: { "connected" } },
//!   "forces":    { <force>: { "research": { "progress" },
//!                             "launches": { "count", "items": { <item>: n } },
//!                             <surface>: { "prototypes": { <name>: { "type", "production", "consumption" } },
//!                                          "entities": { <name>: n } } } },
//!   "surfaces":  { <surface>: { "ticks_per_day", "pollution": { "total" } } },
//!   "pollution": { <surface>: { <source>: net } }
//! }
//! ```

use serde_json::{Map, Value};

/// A parsed snapshot document. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    root: Map<String, Value>,
}

impl Snapshot {
    /// Parse raw bytes into a snapshot.
    ///
    /// # Errors
    ///
    /// Returns an error if `raw` is not valid JSON or its top level is not an
    /// object.
    pub fn from_slice(raw: &[u8]) -> Result<Self, serde_json::Error> {
        let root = serde_json::from_slice(raw)?;
        Ok(Self { root })
    }

    /// Look up a top-level key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.root.get(key)
    }

    /// Follow `path` from the top level, returning the value at its end.
    #[must_use]
    pub fn pointer(&self, path: &[&str]) -> Option<&Value> {
        let (first, rest) = path.split_first()?;
        rest.iter()
            .try_fold(self.root.get(*first)?, |value, key| value.get(*key))
    }
}
