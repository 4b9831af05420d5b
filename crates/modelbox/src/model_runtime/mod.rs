//! Runtime supervision core.
//!
//! Tracks per-model lifecycle state, spawns and terminates one
//! `llama-server` process per managed model, and mediates completion
//! requests against whichever backend flavor a model is configured for.

pub mod binary_locator;
pub mod client;
pub mod instance;
pub mod manager;
pub mod prompt;

pub use binary_locator::BinaryLocator;
pub use client::CompletionClient;
pub use instance::{InstancePool, RuntimeInstance};
pub use manager::{ModelManager, ModelStatus};
pub use prompt::{format_prompt, strip_reasoning};
