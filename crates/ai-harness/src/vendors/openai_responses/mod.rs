//! OpenAI Responses API adapter (`openai-responses`).
//!
//! Tool-call ids produced here have the form `call_id|item_id`: the call id
//! pairs results with calls, the item id is needed to replay the call.
mod adapter;
mod config;
mod options;
mod request;
mod transport;

pub use adapter::OpenAiResponsesProvider;
pub use config::OpenAiResponsesClientConfig;
pub use options::OpenAiResponsesOptions;
