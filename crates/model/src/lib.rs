//! An abstraction layer for chat-completion models.
//!
//! This crate establishes an unified protocol for the agent to interact
//! with a streaming chat model, so that the conversation loop can be
//! driven by a real HTTP provider or a scripted fake one without
//! modifying the core codebase.
//!
//! Types in this crate don't define any behavior, instead they are the
//! constraints that the implementors should adhere to.

#![deny(missing_docs)]

mod error;
mod provider;
mod request;
mod response;

pub use error::*;
pub use provider::*;
pub use request::*;
pub use response::*;
