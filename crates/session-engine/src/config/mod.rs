pub mod scenarios;
pub mod settings;

pub use scenarios::{
    CategoryThresholds, DirectiveTemplates, EmotionalProfile, ScenarioCatalog, ScenarioConfig,
    ScenarioProvider, TriggerPhrase,
};
#[cfg(test)]
pub use scenarios::MockScenarioProvider;
pub use settings::{
    CacheConfig, DatabaseConfig, LlmConfig, PersistenceConfig, ScenariosConfig, ServerConfig,
    SessionConfig, Settings,
};
