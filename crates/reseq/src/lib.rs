#![doc = include_str!("../README.md")]

mod config;
mod coordinator;
mod error;
mod merge;
mod metrics;
mod pending;
mod sender;
mod token;


pub use crate::config::*;
pub use crate::coordinator::*;
pub use crate::error::*;
pub use crate::merge::*;
pub use crate::metrics::{CoordinatorMetrics, CoordinatorState};
pub use crate::pending::*;
pub use crate::sender::*;
pub use crate::token::*;
