pub mod claims;
pub mod config;
pub mod dates;
pub mod error;
pub mod fetch;
pub mod labels;
pub mod llm;
pub mod pipeline;
pub mod predict;
pub mod qa;
pub mod relevance;
pub mod retrieve;
pub mod retry;
pub mod scoring;
pub mod search;
pub mod types;

pub use error::{Error, Result};
