//! Agitation tracking for the simulated actor
//!
//! Pure scoring and transition logic: free-text participant input is scored
//! against marker lexicons and turned into a bounded agitation level, which
//! in turn selects the behavioral directives handed to the generator.

mod engine;
mod lexicon;
pub mod types;

pub use engine::EmotionalStateEngine;
pub use types::{
    EmotionalCategory, EmotionalState, EngineError, ResponseAnalysis, TriggerEvent,
    TRIGGER_HISTORY_LIMIT,
};
