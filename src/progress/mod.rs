//! Progress reporting module
//!
//! Terminal progress bars for archive runs: objects handled, bytes moved,
//! throughput and ETA.

mod reporter;

pub use reporter::*;
