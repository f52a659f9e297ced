use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::Domain;

/// Coarse tag shown next to a rule. Assigned by the control surface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Social,
    Game,
    #[default]
    Other,
}

/// Default mode applied to newly added domains.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlockMode {
    /// Quota-limited: access until the decaying daily budget is used up.
    #[default]
    Detox,
    /// Always blocked.
    Normal,
}

impl std::str::FromStr for BlockMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "detox" => Ok(Self::Detox),
            "normal" | "hard" => Ok(Self::Normal),
            other => Err(format!("unknown mode '{other}' (expected detox or normal)")),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "social" => Ok(Self::Social),
            "game" => Ok(Self::Game),
            "other" => Ok(Self::Other),
            other => Err(format!("unknown category '{other}'")),
        }
    }
}

/// One restricted domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlockRule {
    pub id: String,
    pub name: Domain,
    #[serde(default)]
    pub category: Category,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub added_at: DateTime<Utc>,
    /// `true` selects detox (quota-limited) mode, `false` a hard block.
    #[serde(default)]
    pub detox_mode: bool,
}

impl BlockRule {
    pub fn new(name: Domain, category: Category, mode: BlockMode, now: DateTime<Utc>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name,
            category,
            added_at: now,
            detox_mode: mode == BlockMode::Detox,
        }
    }

    pub fn mode(&self) -> BlockMode {
        if self.detox_mode {
            BlockMode::Detox
        } else {
            BlockMode::Normal
        }
    }
}
