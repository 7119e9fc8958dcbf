//! Line-protocol service and request processing.
//!
//! ## Structure
//!
//! - [`handler`] - Connection handling (`ReplyService`).
//! - [`processor`] - Request parsing and execution.
//! - [`reply`] - Replies and the sender that writes them in order.

pub mod handler;
pub mod processor;
pub mod reply;
