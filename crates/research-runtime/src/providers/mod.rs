pub mod openai;

pub use openai::{ApiAuth, OpenAiConfig, OpenAiPolicy};
