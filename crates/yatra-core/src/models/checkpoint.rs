//! Checkpoint model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Stable numeric checkpoint identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CheckpointId(i64);

impl CheckpointId {
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for CheckpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for CheckpointId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(s.trim().parse()?))
    }
}

/// A physical checkpoint. Configuration data, immutable while the event runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Checkpoint {
    pub id: CheckpointId,
    pub name: String,
    /// Event day this checkpoint belongs to (1-based)
    #[serde(default = "default_day")]
    pub day: u32,
    /// Position within the route
    #[serde(default)]
    pub sort_order: i32,
}

const fn default_day() -> u32 {
    1
}

impl Checkpoint {
    pub fn new(id: i64, name: impl Into<String>, day: u32, sort_order: i32) -> Self {
        Self {
            id: CheckpointId::new(id),
            name: name.into(),
            day,
            sort_order,
        }
    }
}

/// Sort checkpoints into route order: day, then sort order, then id.
pub fn sort_route(checkpoints: &mut [Checkpoint]) {
    checkpoints.sort_by_key(|checkpoint| (checkpoint.day, checkpoint.sort_order, checkpoint.id));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn route_order_groups_by_day() {
        let mut checkpoints = vec![
            Checkpoint::new(3, "Summit", 2, 1),
            Checkpoint::new(2, "Gate", 1, 2),
            Checkpoint::new(1, "Base", 1, 1),
        ];
        sort_route(&mut checkpoints);
        let ids: Vec<i64> = checkpoints.iter().map(|c| c.id.get()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
    }

    #[test]
    fn parses_checkpoint_id() {
        assert_eq!(" 7 ".parse::<CheckpointId>().unwrap(), CheckpointId::new(7));
        assert!("seven".parse::<CheckpointId>().is_err());
    }
}
