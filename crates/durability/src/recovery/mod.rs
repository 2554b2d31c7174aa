//! Recovery module
//!
//! - `replayer`: startup scan that rebuilds the in-doubt transaction set

pub mod replayer;

pub use replayer::{RecoveryReplayer, ReplayResult, ReplayStats};
