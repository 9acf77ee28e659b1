//! AWS Bedrock `ConverseStream` adapter (`bedrock-converse-stream`).
//!
//! Requests authenticate with a Bedrock API key (bearer token); the response
//! body is AWS binary event-stream framing rather than SSE.
mod adapter;
mod config;
mod eventstream;
mod options;
mod request;
mod transport;

pub use adapter::BedrockProvider;
pub use config::BedrockClientConfig;
pub use options::BedrockOptions;
