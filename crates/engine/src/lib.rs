//! Placement engine for Terraplan maps.
//!
//! [`Editor`] is the entry point: it owns one map's [`PlacementStore`], its
//! undo [`History`] and the current [`Selection`], validates every edit with
//! the collision checks in [`collision`], and pushes a
//! [`MapUpdate`](terraplan_protocol::MapUpdate) to subscribers after each
//! committed change. [`SqliteStore`] is the persistence and inventory backend.

pub mod catalog;
pub mod collision;
pub mod editor;
pub mod error;
pub mod geometry;
pub mod history;
pub mod input;
pub mod selection;
pub mod session;
pub mod storage;
pub mod store;

pub use catalog::Catalog;
pub use editor::{Editor, EditorConfig};
pub use error::EditError;
pub use history::{Action, BatchKind, History};
pub use input::{InputCommand, InputOutcome};
pub use selection::Selection;
pub use session::{EditorSession, LoadOutcome, LoadTicket};
pub use storage::{MapSummary, SaveOutcome, SqliteStore};
pub use store::PlacementStore;
