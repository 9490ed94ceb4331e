//! Terraplan: design tabletop terrain layouts from a modular piece inventory.
//!
//! Re-exports the engine and protocol crates under one name, plus a prelude
//! with the types most callers need to drive an editing session.

pub use terraplan_engine as engine;
pub use terraplan_protocol as protocol;

pub mod prelude {
    pub use terraplan_engine::{
        Catalog, EditError, Editor, EditorConfig, EditorSession, SqliteStore,
    };
    pub use terraplan_protocol::{
        GridConfig, MapState, MapUpdate, ModularPiece, PlacedPiece, Point, Rotation,
    };
}
