pub mod conversation;
pub mod emotion;
pub mod llm_service;
pub mod orchestrator;
pub mod persistence;

pub use conversation::ConversationCache;
pub use emotion::EmotionalStateEngine;
pub use llm_service::{GenerationProvider, LlmService};
pub use orchestrator::{BackgroundTasks, SessionOrchestrator};
pub use persistence::PersistenceGateway;
