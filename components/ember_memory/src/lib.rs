//! Table heap and garbage collection bookkeeping.
//!
//! Tables live in a slot arena owned by the [`Heap`]. Scripts and hosts
//! refer to them through generation-checked [`TableHandle`]s
//! (`ember_core::TableHandle`): when the collector reclaims a slot its
//! generation is bumped, so a handle that outlived its table resolves
//! to `None` instead of whatever got allocated there next.

#![warn(missing_docs)]
#![warn(clippy::all)]

mod heap;
mod stats;

pub use heap::Heap;
pub use stats::GcStats;
