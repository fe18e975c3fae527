//! An out-of-the-box chat loop that assembles built-in tools and the
//! OpenAI-compatible model provider.
//!
//! The crate includes a CLI tool for using in the terminal. And you can also
//! use it as a library to bring the chat loop into your own host apps.

#![deny(missing_docs)]

#[macro_use]
extern crate tracing;

mod config;
mod session;
pub mod tools;

pub use config::{EnvConfig, EnvConfigError};
pub use session::{Session, SessionBuilder};

/// Re-exports of [`chatloop_core`] crate.
pub mod core {
    pub use chatloop_core::*;
}
