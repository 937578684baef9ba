pub mod conversation;
pub mod model;
pub mod openrouter;
pub mod orchestrator;
pub mod progress;
pub mod prompt;



pub use conversation::{Conversation, Turn};
pub use model::{AgentTurn, CompletionModel, ToolCall, ToolDefinition};
pub use openrouter::OpenRouterClient;
pub use orchestrator::SynthesisController;
pub use progress::{ChannelSink, NoopSink, Phase, ProgressEvent, ProgressSink};
