//! Per-document analytics, each replaying its own private copy of the
//! document.
//!
//! - [`cohesion`]: support, perception and simultaneity between authors
//! - [`blocks`]: author runs for the minimap
//! - [`timeline`]: day-by-day author snapshots

pub mod blocks;
pub mod cohesion;
pub mod timeline;

pub use blocks::{AuthorBlock, BlockAnalyzer, BlockMeta};
pub use cohesion::{CatchUpReport, CohMeta, CohesionAnalyzer, CohesionGraph};
pub use timeline::{
    Parallelogram, Rectangle, TimelineAnalyzer, TimelineColumn, TimelineError, TimelineMeta,
};
