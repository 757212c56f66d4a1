// ABOUTME: Agent system for archscribe: provider adapters, exploration and diagram tools, and the task loop.
// ABOUTME: A task explores a codebase through tool calls and finishes with a draw.io diagram.

pub mod config;
pub mod context;
pub mod provider;
pub mod providers;
pub mod task_loop;
pub mod testing;
pub mod tools;

pub use config::{AgentConfig, ConfigError, ProviderKind};
pub use context::ContextWindowManager;
pub use provider::{ModelInfo, ProviderAdapter, ProviderError, ProviderEvent, ToolCall};
pub use providers::create_provider;
pub use task_loop::{
    EventEmitter, LoopError, LoopEvent, LoopSettings, TaskOutcome, TaskRequest, TaskRunner,
    TaskStatus,
};
