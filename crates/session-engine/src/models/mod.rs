pub mod session;
pub mod turn;

pub use session::{
    ConversationMessage, MessageRole, ParticipantRole, SessionId, SessionStatus,
};
pub use turn::{Addressing, TurnReply, TurnRequest};
