//! LLM decision plumbing: provider clients, prompt building, and action-list
//! parsing. The contract is strict (agents must answer with a single JSON
//! object carrying an `actions` array) and everything that enforces it
//! lives here.

pub mod prompt;
pub mod provider;
pub mod wire;

pub use prompt::{PromptConfig, build_decision_messages};
pub use provider::{AgentConfig, ChatClient, ChatMessage, ChatModel, ProviderKind};
pub use wire::{ActionParseError, parse_action_list};
