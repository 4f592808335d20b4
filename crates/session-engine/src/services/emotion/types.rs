use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use thiserror::Error;

/// Number of trigger events retained per state
pub const TRIGGER_HISTORY_LIMIT: usize = 10;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error("Invalid scenario configuration: {0}")]
    InvalidScenario(String),

    #[error("Emotional tracking is disabled for scenario {0}")]
    TrackingDisabled(i32),
}

/// One explained agitation change
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub timestamp: DateTime<Utc>,
    pub cause: String,
    pub delta: i32,
}

/// Agitation state attached to a session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionalState {
    pub level: i32,
    pub min: i32,
    pub max: i32,
    /// False for scenarios without emotional tracking
    pub enabled: bool,
    pub last_updated: DateTime<Utc>,
    pub triggers: VecDeque<TriggerEvent>,
}

impl EmotionalState {
    pub fn new(level: i32, min: i32, max: i32) -> Self {
        Self {
            level: level.clamp(min, max),
            min,
            max,
            enabled: true,
            last_updated: Utc::now(),
            triggers: VecDeque::with_capacity(TRIGGER_HISTORY_LIMIT),
        }
    }

    /// Neutral state for scenarios that do not track agitation
    pub fn disabled() -> Self {
        Self {
            level: 0,
            min: 0,
            max: 0,
            enabled: false,
            last_updated: Utc::now(),
            triggers: VecDeque::new(),
        }
    }

    pub(crate) fn record_trigger(&mut self, event: TriggerEvent) {
        self.triggers.push_back(event);
        while self.triggers.len() > TRIGGER_HISTORY_LIMIT {
            self.triggers.pop_front();
        }
    }

    pub fn last_trigger(&self) -> Option<&TriggerEvent> {
        self.triggers.back()
    }
}

/// Qualitative bucket of an agitation level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionalCategory {
    Disabled,
    Calm,
    Nervous,
    Agitated,
    Aggressive,
}

impl EmotionalCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disabled => "disabled",
            Self::Calm => "calm",
            Self::Nervous => "nervous",
            Self::Agitated => "agitated",
            Self::Aggressive => "aggressive",
        }
    }
}

impl std::fmt::Display for EmotionalCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Score breakdown of one participant message
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResponseAnalysis {
    pub empathy: u8,
    pub questioning: u8,
    pub reassurance: u8,
    pub judgment_avoidance: u8,
    /// Sum of the four sub-scores, 0..=100
    pub total: u8,
    pub is_adaptive: bool,
    pub agitation_change: i32,
    /// High-severity phrases that added to `agitation_change`
    pub matched_triggers: Vec<String>,
}

impl ResponseAnalysis {
    pub fn describe(&self) -> String {
        let mut cause = format!(
            "{} response (score {}: empathy {}, questioning {}, reassurance {}, non-judgment {})",
            if self.is_adaptive { "adaptive" } else { "maladaptive" },
            self.total,
            self.empathy,
            self.questioning,
            self.reassurance,
            self.judgment_avoidance,
        );
        if !self.matched_triggers.is_empty() {
            cause.push_str(&format!("; triggers: {}", self.matched_triggers.join(", ")));
        }
        cause
    }
}
