//! Per-connection session state
//!
//! Each client connection owns one `Session`: a small state machine that
//! consumes Wyoming events and decides what to send back and when to close.

mod machine;

pub use machine::{Outcome, Session};
