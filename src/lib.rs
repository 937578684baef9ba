pub mod agents;
pub mod config;
pub mod error;
pub mod fetch;
pub mod parser;
pub mod selector;
pub mod snapshot;

pub use agents::{CompletionModel, OpenRouterClient, SynthesisController};
pub use config::AppConfig;
pub use error::{ForgeError, Result};
pub use parser::{extract, ExtractedFeed, ExtractionConfig, SynthesisResult};
pub use snapshot::ChangeDetector;
