mod service;
pub mod types;

pub use service::{BackgroundTasks, SessionOrchestrator};
pub use types::{EngineStats, TurnError};
