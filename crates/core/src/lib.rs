//! Core types for xalog
//!
//! This crate defines the identifiers shared by the log writer, the recovery
//! replayer and the coordinator:
//! - Xid: X/Open transaction identifier (format id, global id, branch qualifier)
//! - XidGenerator: per-coordinator id allocation with restart anti-collision
//! - BranchInfo: one resource manager's participation in a transaction
//! - XidBranchesPair: an in-doubt transaction reconstructed by recovery
//! - LogMark: opaque position of a prepare record in the log

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod branch;
pub mod generator;
pub mod xid;

pub use branch::{BranchInfo, LogMark, XidBranchesPair};
pub use generator::{XidError, XidGenerator, MAX_IDENTITY_LEN};
pub use xid::{Xid, BRANCH_QUALIFIER_SIZE, FORMAT_ID, GLOBAL_ID_SIZE};
