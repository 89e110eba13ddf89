pub mod json;
pub mod openai;

use crate::retry::RetryPolicy;
use anyhow::Result;
use serde_json::Value;

pub use json::{parse_reply, MalformedReply};

#[async_trait::async_trait]
pub trait Llm: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String>;
}

/// Completes `prompt` under `retry` and reads the reply as JSON. Call
/// failures and unreadable replies both come back as [`MalformedReply`].
pub async fn complete_json(llm: &dyn Llm, prompt: &str, retry: &RetryPolicy) -> std::result::Result<Value, MalformedReply> {
    let text = retry
        .run("llm completion", |_| llm.complete(prompt))
        .await
        .map_err(|e| MalformedReply::new(format!("llm call failed: {e:#}"), ""))?;
    parse_reply(&text)
}
