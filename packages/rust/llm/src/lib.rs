//! LLM-backed stages of the dataset pipeline.
//!
//! - [`DomainExpander`] / [`LlmDomainExpander`]: prompt → domains and queries
//! - [`CaptionAnnotator`] / [`VisionCaptionAnnotator`]: image + context → caption
//!
//! Both talk to an OpenAI-compatible chat completions endpoint through
//! [`ChatClient`].

mod caption;
mod client;
mod expander;

pub use caption::{CaptionAnnotator, VisionCaptionAnnotator};
pub use client::{
    ChatClient, ChatMessage, ChatRequest, ContentPart, ImageUrl, MessageContent, ResponseFormat, Role,
};
pub use expander::{DomainExpander, LlmDomainExpander, parse_domains};
