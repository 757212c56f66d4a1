// ABOUTME: Core library for archscribe: message model, truncation ranges, diagram documents, and prompts.
// ABOUTME: Everything here is synchronous and free of I/O so the store, agent, and server crates can share it.

pub mod conversation;
pub mod diagram;
pub mod diagram_type;
pub mod message;
pub mod prompt;
pub mod truncation;

pub use conversation::{ConversationKind, ConversationMessage};
pub use diagram::{AppendOutcome, DiagramDocument, DiagramError};
pub use diagram_type::DiagramType;
pub use message::{
    ContentBlock, MessageContent, MessageMetrics, MessageRole, ModelRef, StorageMessage,
    TokenUsage,
};
pub use truncation::{DeletedRange, KeepStrategy};
