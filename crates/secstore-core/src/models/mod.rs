//! Data models for the agent
//!
//! Stores and objects travel by value inside commands; upload records live
//! only in the agent's upload registry.

mod command;
mod data_object;
mod upload;

pub use command::*;
pub use data_object::*;
pub use upload::*;
