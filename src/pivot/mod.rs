//! Aggregation Engine (pivot core)
//!
//! Pure, synchronous hierarchical aggregation over a flat record set already
//! fetched upstream. A [`PivotTree`] is a function of (record set,
//! configuration): changing the configuration rebuilds the tree from the
//! unchanged records with no network involvement, and the record set itself
//! is immutable for the duration of a pivot session.

pub mod config;
pub mod export;
pub mod tree;

pub use config::{Aggregation, Density, DisplayOptions, LayoutMode, PivotConfiguration};
pub use export::{export_delimited, ExportOptions, GRAND_TOTAL_LABEL};
pub use tree::{PivotNode, PivotRow, PivotTree, ValueColumn, UNKNOWN_BUCKET};
