//! LLM Provider layer
//!
//! One contract, two backends: a local model daemon and a hosted
//! chat-completion API. The factory picks one from configuration.

mod contract;
mod error;
pub mod factory;
pub mod hosted;
pub mod local;

#[cfg(test)]
mod fake_server;

pub use contract::*;
pub use error::ProviderError;
pub use factory::{create_provider, create_provider_from_env, resolve_and_create};
pub use hosted::HostedBackend;
pub use local::LocalBackend;
