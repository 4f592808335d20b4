//! Conversation memory
//!
//! Provides in-memory per-session state with:
//! - Thread-safe caching (DashMap), atomic per-key initialization
//! - Bounded FIFO message history
//! - Idle-time eviction through a periodic sweep
//! - Keyword role detection and topic extraction

mod cache;
mod role_detector;
pub mod types;

pub use cache::ConversationCache;
pub use role_detector::{RoleDetector, TopicExtractor};
pub use types::{CacheStats, ConversationContext, SessionEntry, StatusChangeError};
