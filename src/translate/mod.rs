//! Bidirectional translation between the OpenAI Chat Completions wire format
//! and the Bedrock Converse wire format.

pub mod bedrock_types;
pub mod openai_types;
pub mod request;
pub mod response;
pub mod streaming;
