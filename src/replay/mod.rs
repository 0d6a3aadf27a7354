//! Document reconstruction from revisions.
//!
//! - [`list`]: the arena-backed character list with its cursor
//! - [`engine`]: applying revisions to a list, with per-analytic hooks
//! - [`runs`]: grouping consecutive nodes into runs

pub mod list;
pub mod engine;
pub mod runs;

pub use list::{CharacterNode, DocumentList, ListError, NodeId};
pub use engine::{
    ApplyStats, DocumentReplay, InsertContext, PlainHooks, ReplayError, ReplayHooks,
    RetainContext,
};
pub use runs::{detect_runs, Run};
