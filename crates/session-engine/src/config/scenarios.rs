//! Scenario catalogue: persona text and optional emotional-tracking profile
//! per scenario, loaded from a TOML file.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use tracing::{info, warn};

use crate::services::emotion::EngineError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ScenarioConfig {
    pub id: i32,
    pub name: String,
    pub persona: String,
    /// Absent when the scenario does not track agitation
    #[serde(default)]
    pub emotion: Option<EmotionalProfile>,
}

impl ScenarioConfig {
    /// Stand-in used when the catalogue has no entry for a scenario id
    pub fn untracked(id: i32) -> Self {
        Self {
            id,
            name: format!("scenario-{}", id),
            persona: "Vous êtes un patient qui consulte. Répondez simplement, en français, \
                      comme une personne réelle le ferait."
                .to_string(),
            emotion: None,
        }
    }

    pub fn tracks_emotion(&self) -> bool {
        self.emotion.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmotionalProfile {
    pub initial: i32,
    #[serde(default = "default_min")]
    pub min: i32,
    #[serde(default = "default_max")]
    pub max: i32,
    pub thresholds: CategoryThresholds,
    #[serde(default)]
    pub directives: DirectiveTemplates,
    /// Scenario-specific phrases that push agitation up on top of the base band
    #[serde(default)]
    pub triggers: Vec<TriggerPhrase>,
}

fn default_min() -> i32 {
    0
}

fn default_max() -> i32 {
    100
}

impl EmotionalProfile {
    /// Reject profiles that would break the agitation state machine
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.min >= self.max {
            return Err(EngineError::InvalidScenario(format!(
                "min ({}) must be below max ({})",
                self.min, self.max
            )));
        }
        if self.initial < self.min || self.initial > self.max {
            return Err(EngineError::InvalidScenario(format!(
                "initial level {} outside [{}, {}]",
                self.initial, self.min, self.max
            )));
        }

        let t = &self.thresholds;
        let ascending = self.min <= t.nervous
            && t.nervous < t.agitated
            && t.agitated < t.aggressive
            && t.aggressive <= self.max;
        if !ascending {
            return Err(EngineError::InvalidScenario(format!(
                "thresholds must ascend within [{}, {}]: nervous={}, agitated={}, aggressive={}",
                self.min, self.max, t.nervous, t.agitated, t.aggressive
            )));
        }

        if let Some(bad) = self.triggers.iter().find(|t| t.delta <= 0 || t.phrase.trim().is_empty()) {
            return Err(EngineError::InvalidScenario(format!(
                "trigger '{}' must have a non-empty phrase and a positive delta (got {})",
                bad.phrase, bad.delta
            )));
        }

        Ok(())
    }
}

/// Lower bounds of each category, ascending. Levels below `nervous` are calm.
#[derive(Debug, Clone, Copy, Deserialize, Serialize, PartialEq, Eq)]
pub struct CategoryThresholds {
    pub nervous: i32,
    pub agitated: i32,
    pub aggressive: i32,
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct DirectiveTemplates {
    pub calm: String,
    pub nervous: String,
    pub agitated: String,
    pub aggressive: String,
}

impl Default for DirectiveTemplates {
    fn default() -> Self {
        Self {
            calm: "Vous êtes relativement calme. Vous répondez aux questions, \
                   avec un peu de méfiance mais sans hostilité."
                .to_string(),
            nervous: "Vous êtes nerveux. Vos phrases sont courtes, vous hésitez, \
                      vous demandez parfois pourquoi on vous pose ces questions."
                .to_string(),
            agitated: "Vous êtes agité. Vous coupez la parole, vous haussez le ton \
                       et vous remettez en cause ce que dit votre interlocuteur."
                .to_string(),
            aggressive: "Vous êtes très agressif verbalement. Vous refusez de coopérer, \
                         vous menacez de partir et vous exigez qu'on vous laisse tranquille."
                .to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
pub struct TriggerPhrase {
    pub phrase: String,
    pub delta: i32,
}

/// Read-only scenario lookup
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ScenarioProvider: Send + Sync {
    async fn scenario(&self, scenario_id: i32) -> Option<ScenarioConfig>;
}

#[derive(Debug, Deserialize)]
struct CatalogFile {
    #[serde(default, rename = "scenario")]
    scenarios: Vec<ScenarioConfig>,
}

/// In-memory catalogue built from `config/scenarios.toml`
#[derive(Debug, Clone, Default)]
pub struct ScenarioCatalog {
    scenarios: HashMap<i32, ScenarioConfig>,
}

impl ScenarioCatalog {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scenario catalogue {}", path.display()))?;
        let catalog = Self::from_toml(&raw)
            .with_context(|| format!("Invalid scenario catalogue {}", path.display()))?;
        info!("Loaded {} scenarios from {}", catalog.len(), path.display());
        Ok(catalog)
    }

    pub fn from_toml(raw: &str) -> Result<Self> {
        let file: CatalogFile = toml::from_str(raw)?;
        let mut scenarios = HashMap::with_capacity(file.scenarios.len());

        for scenario in file.scenarios {
            if let Some(profile) = &scenario.emotion {
                profile
                    .validate()
                    .with_context(|| format!("Scenario {} ({})", scenario.id, scenario.name))?;
            }
            if scenarios.insert(scenario.id, scenario).is_some() {
                anyhow::bail!("Duplicate scenario id in catalogue");
            }
        }

        Ok(Self { scenarios })
    }

    pub fn len(&self) -> usize {
        self.scenarios.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scenarios.is_empty()
    }
}

#[async_trait]
impl ScenarioProvider for ScenarioCatalog {
    async fn scenario(&self, scenario_id: i32) -> Option<ScenarioConfig> {
        let found = self.scenarios.get(&scenario_id).cloned();
        if found.is_none() {
            warn!("Scenario {} not in catalogue, emotional tracking disabled", scenario_id);
        }
        found
    }
}
