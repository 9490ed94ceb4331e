use std::collections::HashMap;
use terraplan_protocol::{ModularPiece, TerrainType};

/// Read-only view of the inventory: pieces and terrain types by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pieces: HashMap<String, ModularPiece>,
    terrain: HashMap<String, TerrainType>,
}

impl Catalog {
    pub fn new(
        pieces: impl IntoIterator<Item = ModularPiece>,
        terrain: impl IntoIterator<Item = TerrainType>,
    ) -> Self {
        Self {
            pieces: pieces.into_iter().map(|p| (p.id.clone(), p)).collect(),
            terrain: terrain.into_iter().map(|t| (t.id.clone(), t)).collect(),
        }
    }

    pub fn piece(&self, id: &str) -> Option<&ModularPiece> {
        self.pieces.get(id)
    }

    /// Pieces in id order.
    pub fn pieces(&self) -> impl Iterator<Item = &ModularPiece> {
        let mut all: Vec<_> = self.pieces.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all.into_iter()
    }

    /// Terrain types in id order.
    pub fn terrain_types(&self) -> impl Iterator<Item = &TerrainType> {
        let mut all: Vec<_> = self.terrain.values().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        all.into_iter()
    }

    pub fn len(&self) -> usize {
        self.pieces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pieces.is_empty()
    }
}
