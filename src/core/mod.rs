//! Core archive engine
//!
//! Listing, retry, per-object transfer, deadline gating, bounded dispatch
//! and result aggregation, tied together by [`ArchiveEngine`].

mod aggregator;
mod deadline;
mod dispatcher;
mod engine;
mod lister;
mod retry;
mod worker;

pub use aggregator::*;
pub use deadline::*;
pub use dispatcher::*;
pub use engine::*;
pub use lister::*;
pub use retry::*;
pub use worker::*;
