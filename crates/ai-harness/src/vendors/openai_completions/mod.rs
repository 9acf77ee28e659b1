//! OpenAI Chat Completions adapter (`openai-completions`), shared by the
//! compatible vendors (Groq, xAI, OpenRouter, Cerebras, Mistral, DeepSeek,
//! local servers).
mod adapter;
mod compat;
mod config;
mod options;
mod request;
mod transport;

pub use adapter::OpenAiCompletionsProvider;
pub use compat::ResolvedCompat;
pub use config::OpenAiCompletionsClientConfig;
pub use options::OpenAiCompletionsOptions;
