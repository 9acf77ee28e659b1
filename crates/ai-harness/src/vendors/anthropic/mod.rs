//! Anthropic Messages API adapter (`anthropic-messages`).
mod adapter;
mod config;
mod options;
mod request;
mod transport;

pub use adapter::AnthropicProvider;
pub use config::AnthropicClientConfig;
pub use options::AnthropicOptions;
