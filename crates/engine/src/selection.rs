use std::collections::BTreeSet;
use terraplan_protocol::MapState;

/// Ids of the placed pieces currently targeted by batch operations.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Selection {
    ids: BTreeSet<String>,
}

impl Selection {
    pub fn select(&mut self, id: impl Into<String>) {
        self.ids.clear();
        self.ids.insert(id.into());
    }

    /// Shift-click: add if absent, remove if present.
    pub fn toggle(&mut self, id: impl Into<String>) {
        let id = id.into();
        if !self.ids.remove(&id) {
            self.ids.insert(id);
        }
    }

    pub fn select_many<I, S>(&mut self, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.ids = ids.into_iter().map(Into::into).collect();
    }

    pub fn clear(&mut self) {
        self.ids.clear();
    }

    /// Drop ids that no longer name a placed piece. Returns true if anything was removed.
    pub fn prune(&mut self, map: &MapState) -> bool {
        let before = self.ids.len();
        self.ids.retain(|id| map.piece(id).is_some());
        self.ids.len() != before
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.ids.iter().map(String::as_str)
    }

    pub fn to_vec(&self) -> Vec<String> {
        self.ids.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terraplan_protocol::{PlacedPiece, Rotation};

    #[test]
    fn toggle_adds_then_removes() {
        let mut s = Selection::default();
        s.select("a");
        s.toggle("b");
        assert_eq!(s.to_vec(), vec!["a", "b"]);
        s.toggle("a");
        assert_eq!(s.to_vec(), vec!["b"]);
    }

    #[test]
    fn select_replaces_the_set() {
        let mut s = Selection::default();
        s.select_many(["a", "b", "c"]);
        s.select("z");
        assert_eq!(s.to_vec(), vec!["z"]);
        s.clear();
        assert!(s.is_empty());
    }

    #[test]
    fn prune_drops_missing_ids() {
        let mut map = MapState::default();
        map.placed_pieces.push(PlacedPiece {
            id: "keep".into(),
            piece_id: "p".into(),
            x: 0.0,
            y: 0.0,
            rotation: Rotation::Deg0,
            level: 0,
        });
        let mut s = Selection::default();
        s.select_many(["keep", "gone"]);
        assert!(s.prune(&map));
        assert_eq!(s.to_vec(), vec!["keep"]);
        assert!(!s.prune(&map));
    }
}
