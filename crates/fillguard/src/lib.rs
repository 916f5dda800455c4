#![doc = include_str!("../README.md")]

mod config;
mod coordinator;
mod error;
mod fetch;
mod key;
mod orchestrator;
mod store;

#[cfg(test)]
mod testing;

pub use crate::config::*;
pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::fetch::*;
pub use crate::key::*;
pub use crate::orchestrator::*;
pub use crate::store::*;
