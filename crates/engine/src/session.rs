//! Map switching for a single editor. Loads are requested, fetched elsewhere,
//! and only applied if no newer request has been made in the meantime.

use crate::editor::Editor;
use terraplan_protocol::MapState;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    pub map_id: String,
    generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    Applied,
    /// The store had no map under that id; the editor is unchanged.
    Missing,
    /// A newer request superseded this one; the response was dropped.
    Stale,
}

pub struct EditorSession {
    editor: Editor,
    map_id: Option<String>,
    pending: Option<LoadTicket>,
    generation: u64,
}

impl EditorSession {
    pub fn new(editor: Editor) -> Self {
        Self {
            editor,
            map_id: None,
            pending: None,
            generation: 0,
        }
    }

    pub fn editor(&self) -> &Editor {
        &self.editor
    }

    pub fn editor_mut(&mut self) -> &mut Editor {
        &mut self.editor
    }

    /// Id of the map currently in the editor, if it came from the store.
    pub fn map_id(&self) -> Option<&str> {
        self.map_id.as_deref()
    }

    /// Callers should block edits while this is true.
    pub fn is_loading(&self) -> bool {
        self.pending.is_some()
    }

    pub fn request_load(&mut self, map_id: impl Into<String>) -> LoadTicket {
        self.generation += 1;
        let ticket = LoadTicket {
            map_id: map_id.into(),
            generation: self.generation,
        };
        self.pending = Some(ticket.clone());
        ticket
    }

    pub fn complete_load(
        &mut self,
        ticket: &LoadTicket,
        snapshot: Option<MapState>,
    ) -> LoadOutcome {
        if self.pending.as_ref() != Some(ticket) {
            log::warn!("dropping stale load of map {} (gen {})", ticket.map_id, ticket.generation);
            return LoadOutcome::Stale;
        }
        self.pending = None;
        match snapshot {
            Some(map) => {
                self.editor.load_map_data(map);
                self.map_id = Some(ticket.map_id.clone());
                LoadOutcome::Applied
            }
            None => {
                log::warn!("map {} not found", ticket.map_id);
                LoadOutcome::Missing
            }
        }
    }

    /// Start a fresh, unsaved map.
    pub fn new_map(&mut self, map: MapState) {
        self.pending = None;
        self.map_id = None;
        self.editor.load_map_data(map);
    }

    /// Record that the current map now lives in the store under `map_id`.
    pub fn mark_saved(&mut self, map_id: impl Into<String>) {
        self.map_id = Some(map_id.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Catalog;
    use crate::editor::EditorConfig;

    fn session() -> EditorSession {
        let config = EditorConfig::default();
        EditorSession::new(Editor::new(MapState::default(), Catalog::default(), &config))
    }

    fn named(name: &str) -> MapState {
        MapState {
            name: name.into(),
            ..MapState::default()
        }
    }

    #[test]
    fn latest_request_wins() {
        let mut s = session();
        let old = s.request_load("crypt");
        let new = s.request_load("tower");
        assert!(s.is_loading());

        assert_eq!(s.complete_load(&old, Some(named("Crypt"))), LoadOutcome::Stale);
        assert_eq!(s.editor().map().name, "Untitled map");

        assert_eq!(s.complete_load(&new, Some(named("Tower"))), LoadOutcome::Applied);
        assert_eq!(s.editor().map().name, "Tower");
        assert_eq!(s.map_id(), Some("tower"));
        assert!(!s.is_loading());
    }

    #[test]
    fn re_requesting_the_same_id_still_invalidates_the_old_ticket() {
        let mut s = session();
        let first = s.request_load("crypt");
        let second = s.request_load("crypt");
        assert_eq!(s.complete_load(&first, Some(named("old"))), LoadOutcome::Stale);
        assert_eq!(s.complete_load(&second, Some(named("new"))), LoadOutcome::Applied);
        assert_eq!(s.complete_load(&second, Some(named("again"))), LoadOutcome::Stale);
        assert_eq!(s.editor().map().name, "new");
    }

    #[test]
    fn missing_map_leaves_editor_alone() {
        let mut s = session();
        let t = s.request_load("nowhere");
        assert_eq!(s.complete_load(&t, None), LoadOutcome::Missing);
        assert_eq!(s.map_id(), None);
        assert!(!s.is_loading());
    }
}
