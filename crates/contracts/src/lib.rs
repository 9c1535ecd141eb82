//! # Contracts
//!
//! Frozen interface contracts shared by every crate of the output stage.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Time Model
//! - Record timestamps are whole seconds since the Unix epoch (`u64`)
//! - Rendering (RFC 3339, strftime, time zone) is the concern of each sink

mod blueprint;
mod error;
mod record;
mod sink;

pub use blueprint::*;
pub use error::*;
pub use record::*;
pub use sink::*;
