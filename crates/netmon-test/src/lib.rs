//! Integration test infrastructure for the netmon engine
//!
//! Provides:
//! - Rendered Cisco CLI outputs for arbitrary router states
//! - A scripted transport that plays back outputs and failures per device
//! - A recording store that counts writes and can be told to fail
//! - An engine harness wired to all of the above

pub mod fixtures;
mod harness;
mod store;
mod transport;
mod verification;

pub use fixtures::*;
pub use harness::TestEngine;
pub use store::RecordingStore;
pub use transport::{ScriptedTransport, Step};
pub use verification::*;
