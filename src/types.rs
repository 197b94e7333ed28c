//! Shared value types: phases, operating mode and charger commands

use serde::{Deserialize, Serialize};
use std::fmt;

/// Supply phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Phase {
    L1,
    L2,
    L3,
}

impl Phase {
    pub const ALL: [Phase; 3] = [Phase::L1, Phase::L2, Phase::L3];

    /// Phases in use for an installation with `count` phases (1..=3)
    pub fn active(count: u8) -> Vec<Phase> {
        Self::ALL
            .iter()
            .copied()
            .take(usize::from(count.min(3)))
            .collect()
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::L1 => "L1",
            Phase::L2 => "L2",
            Phase::L3 => "L3",
        };
        f.write_str(s)
    }
}

/// Overcurrent handling mode, fixed for a controller's lifetime
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OvercurrentMode {
    /// Tolerate brief overcurrent, act on accumulated thermal risk
    #[default]
    Optimised,
    /// Reduce on every overcurrent sample
    Conservative,
}

/// Which phase(s) a limit command applies to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandTarget {
    Phase(Phase),
    /// One limit shared by every phase (synced-limit chargers)
    All,
}

impl CommandTarget {
    pub fn phase(&self) -> Option<Phase> {
        match self {
            CommandTarget::Phase(p) => Some(*p),
            CommandTarget::All => None,
        }
    }
}

impl fmt::Display for CommandTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandTarget::Phase(p) => write!(f, "{}", p),
            CommandTarget::All => f.write_str("ALL"),
        }
    }
}

/// Intent to change a charger limit; produced, sent and discarded within a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChargerCommand {
    pub target: CommandTarget,
    pub amps: u32,
}
