//! The editing context: one map's placement store, its history and selection,
//! and the renderers subscribed to changes.
//!
//! All mutations run synchronously on the caller's thread. Renderers never
//! touch the store; they read [`MapUpdate`]s from their channel.

use crate::catalog::Catalog;
use crate::error::EditError;
use crate::geometry::{snap_piece, SnapResult};
use crate::history::{Action, History};
use crate::selection::Selection;
use crate::store::PlacementStore;
use crossbeam_channel::{Receiver, Sender};
use serde::{Deserialize, Serialize};
use terraplan_protocol::{events, GridConfig, MapState, MapUpdate, PlacedPiece, Point, Rotation};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EditorConfig {
    /// Undo depth; 0 keeps everything.
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

fn default_history_limit() -> usize {
    200
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            history_limit: default_history_limit(),
        }
    }
}

pub struct Editor {
    store: PlacementStore,
    history: History,
    selection: Selection,
    subscribers: Vec<Sender<MapUpdate>>,
    revision: u64,
}

impl Editor {
    pub fn new(map: MapState, catalog: Catalog, config: &EditorConfig) -> Self {
        Self {
            store: PlacementStore::new(map, catalog),
            history: History::new(config.history_limit),
            selection: Selection::default(),
            subscribers: Vec::new(),
            revision: 0,
        }
    }

    pub fn map(&self) -> &MapState {
        self.store.map()
    }

    pub fn catalog(&self) -> &Catalog {
        self.store.catalog()
    }

    pub fn selection(&self) -> &Selection {
        &self.selection
    }

    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    pub fn can_redo(&self) -> bool {
        self.history.can_redo()
    }

    /// Register a renderer. Receivers that are dropped get pruned on the next send.
    pub fn subscribe(&mut self) -> Receiver<MapUpdate> {
        let (tx, rx) = crossbeam_channel::unbounded();
        self.subscribers.push(tx);
        rx
    }

    pub fn snapshot(&self, event: &str) -> MapUpdate {
        MapUpdate {
            revision: self.revision,
            event: event.to_string(),
            map: self.store.map().clone(),
            selection: self.selection.to_vec(),
            can_undo: self.history.can_undo(),
            can_redo: self.history.can_redo(),
        }
    }

    fn notify(&mut self, event: &str) {
        self.selection.prune(self.store.map());
        self.revision += 1;
        let count = self.store.map().placed_pieces.len();
        log::debug!("rev {} {event} ({count} pieces)", self.revision);
        if self.subscribers.is_empty() {
            return;
        }
        let update = self.snapshot(event);
        self.subscribers.retain(|tx| tx.send(update.clone()).is_ok());
    }

    fn commit(&mut self, action: Action) {
        let event = action.event();
        self.history.commit(action);
        self.notify(event);
    }

    /// Place a catalog piece. Returns the new placed-piece id.
    pub fn place_piece(
        &mut self,
        piece_id: &str,
        x: f64,
        y: f64,
        rotation: Rotation,
        level: i32,
    ) -> Result<String, EditError> {
        let (id, action) = self.store.place(piece_id, Point::new(x, y), rotation, level)?;
        self.commit(action);
        Ok(id)
    }

    pub fn move_piece(&mut self, placed_id: &str, x: f64, y: f64) -> Result<(), EditError> {
        let action = self.store.move_piece(placed_id, Point::new(x, y))?;
        self.commit(action);
        Ok(())
    }

    pub fn rotate_piece(&mut self, placed_id: &str, rotation: Rotation) -> Result<(), EditError> {
        let action = self.store.rotate_piece(placed_id, rotation)?;
        self.commit(action);
        Ok(())
    }

    pub fn delete_piece(&mut self, placed_id: &str) -> Result<(), EditError> {
        let action = self.store.delete(placed_id)?;
        self.commit(action);
        Ok(())
    }

    /// Delete the listed pieces as one undo step. Returns how many were removed.
    pub fn delete_many(&mut self, ids: &[String]) -> usize {
        match self.store.delete_many(ids.iter().map(String::as_str)) {
            Some(action) => {
                let n = batch_len(&action);
                self.commit(action);
                n
            }
            None => 0,
        }
    }

    pub fn delete_selected(&mut self) -> usize {
        let ids = self.selection.to_vec();
        self.delete_many(&ids)
    }

    /// Rotate every selected piece 90° clockwise as one undo step.
    pub fn rotate_selected(&mut self) -> Result<usize, EditError> {
        let ids = self.selection.to_vec();
        match self.store.rotate_many(ids.iter().map(String::as_str))? {
            Some(action) => {
                let n = batch_len(&action);
                self.commit(action);
                Ok(n)
            }
            None => Ok(0),
        }
    }

    pub fn clear_map(&mut self) -> usize {
        match self.store.clear() {
            Some(action) => {
                let n = batch_len(&action);
                self.commit(action);
                n
            }
            None => 0,
        }
    }

    /// Swap in a different map. History and selection start over.
    pub fn load_map_data(&mut self, map: MapState) {
        log::info!("loading map {:?} ({} pieces)", map.name, map.placed_pieces.len());
        self.store.load(map);
        self.history.clear();
        self.selection.clear();
        self.notify(events::MAP_LOADED);
    }

    /// Swap the inventory. Undo/redo entries are dropped when any piece
    /// footprint changed, since they were validated against the old sizes.
    pub fn set_catalog(&mut self, catalog: Catalog) -> Result<(), EditError> {
        let reshaped = self
            .store
            .catalog()
            .pieces()
            .any(|old| catalog.piece(&old.id).map(|p| p.size) != Some(old.size));
        self.store.set_catalog(catalog)?;
        if reshaped && (self.history.can_undo() || self.history.can_redo()) {
            log::info!("catalog footprints changed; clearing history");
            self.history.clear();
        }
        self.notify(events::CATALOG_CHANGED);
        Ok(())
    }

    pub fn undo(&mut self) -> Result<(), EditError> {
        let event = self.history.undo(self.store.map_mut())?;
        log::debug!("undo {event}");
        self.notify(events::UNDO);
        Ok(())
    }

    pub fn redo(&mut self) -> Result<(), EditError> {
        let event = self.history.redo(self.store.map_mut())?;
        log::debug!("redo {event}");
        self.notify(events::REDO);
        Ok(())
    }

    pub fn select(&mut self, placed_id: &str) -> Result<(), EditError> {
        self.require_placed(placed_id)?;
        self.selection.select(placed_id);
        self.notify(events::SELECTION);
        Ok(())
    }

    pub fn toggle_selection(&mut self, placed_id: &str) -> Result<(), EditError> {
        self.require_placed(placed_id)?;
        self.selection.toggle(placed_id);
        self.notify(events::SELECTION);
        Ok(())
    }

    /// Replace the selection; ids not on the map are dropped.
    pub fn select_many(&mut self, ids: &[String]) {
        self.selection.select_many(ids.iter().cloned());
        self.notify(events::SELECTION);
    }

    pub fn clear_selection(&mut self) {
        if self.selection.is_empty() {
            return;
        }
        self.selection.clear();
        self.notify(events::SELECTION);
    }

    fn require_placed(&self, placed_id: &str) -> Result<&PlacedPiece, EditError> {
        self.store.map().piece(placed_id).ok_or_else(|| {
            log::warn!("selection: no placed piece {placed_id}");
            EditError::InvalidReference(placed_id.to_string())
        })
    }

    pub fn set_grid_config(&mut self, grid: GridConfig) {
        self.store.set_grid_config(grid);
        self.notify(events::GRID_CHANGED);
    }

    pub fn add_level(&mut self, level: i32) -> bool {
        let added = self.store.add_level(level);
        if added {
            self.notify(events::LEVELS_CHANGED);
        }
        added
    }

    pub fn remove_level(&mut self, level: i32) -> Result<(), EditError> {
        self.store.remove_level(level)?;
        self.notify(events::LEVELS_CHANGED);
        Ok(())
    }

    pub fn set_active_level(&mut self, level: i32) -> Result<(), EditError> {
        self.store.set_active_level(level)?;
        self.notify(events::LEVELS_CHANGED);
        Ok(())
    }

    /// Where a dragged piece would land under the cursor, without placing it.
    pub fn snap_preview(
        &self,
        piece_id: &str,
        cursor: Point,
        rotation: Rotation,
        level: i32,
    ) -> Result<SnapResult, EditError> {
        let catalog = self.store.catalog();
        let piece = catalog
            .piece(piece_id)
            .ok_or_else(|| EditError::UnknownPiece(piece_id.to_string()))?;
        let neighbors: Vec<(&PlacedPiece, _)> = self
            .store
            .map()
            .pieces_on_level(level)
            .filter_map(|p| catalog.piece(&p.piece_id).map(|m| (p, m)))
            .collect();
        Ok(snap_piece(cursor, &self.store.map().grid_config, piece, rotation, &neighbors))
    }
}

fn batch_len(action: &Action) -> usize {
    match action {
        Action::Batch { actions, .. } => actions.len(),
        _ => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use terraplan_protocol::{ModularPiece, Size};

    fn catalog() -> Catalog {
        let mk = |id: &str, w: f64, h: f64, diag: bool| ModularPiece {
            id: id.into(),
            name: id.into(),
            terrain_type_id: "grass".into(),
            size: Size { width: w, height: h },
            is_diagonal: diag,
            default_rotation: Rotation::Deg0,
            cell_colors: None,
            quantity: None,
        };
        Catalog::new([mk("sq3", 3.0, 3.0, false), mk("tri2", 2.0, 2.0, true)], [])
    }

    fn editor() -> Editor {
        Editor::new(MapState::default(), catalog(), &EditorConfig::default())
    }

    #[test]
    fn flush_placement_scenario() {
        let mut ed = editor();
        let first = ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        let err = ed.place_piece("sq3", 1.0, 1.0, Rotation::Deg0, 0).unwrap_err();
        assert_eq!(err, EditError::Collision { against: first.clone(), level: 0 });
        let second = ed.place_piece("sq3", 3.0, 0.0, Rotation::Deg0, 0).unwrap();

        ed.undo().unwrap();
        let ids: Vec<&str> = ed.map().placed_pieces.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str()]);

        ed.redo().unwrap();
        let ids: Vec<&str> = ed.map().placed_pieces.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec![first.as_str(), second.as_str()]);
    }

    #[test]
    fn undo_restores_exact_state_for_each_kind() {
        let mut ed = editor();
        let a = ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        let b = ed.place_piece("sq3", 5.0, 0.0, Rotation::Deg0, 0).unwrap();

        let steps: Vec<Box<dyn Fn(&mut Editor)>> = vec![
            Box::new(|ed: &mut Editor| ed.move_piece(&a, 0.0, 10.0).unwrap()),
            Box::new(|ed: &mut Editor| ed.rotate_piece(&b, Rotation::Deg90).unwrap()),
            Box::new(|ed: &mut Editor| ed.delete_piece(&a).unwrap()),
            Box::new(|ed: &mut Editor| {
                ed.select_many(&[a.clone(), b.clone()]);
                assert_eq!(ed.delete_selected(), 2);
            }),
            Box::new(|ed: &mut Editor| assert_eq!(ed.clear_map(), 2)),
        ];
        for step in steps {
            let before = ed.map().clone();
            step(&mut ed);
            let after = ed.map().clone();
            ed.undo().unwrap();
            assert_eq!(ed.map(), &before);
            ed.redo().unwrap();
            assert_eq!(ed.map(), &after);
            ed.undo().unwrap();
        }
    }

    #[test]
    fn clear_is_a_single_undo_step() {
        let mut ed = editor();
        for x in [0.0, 4.0, 8.0] {
            ed.place_piece("sq3", x, 0.0, Rotation::Deg0, 0).unwrap();
        }
        let before = ed.map().clone();
        assert_eq!(ed.clear_map(), 3);
        assert!(ed.map().placed_pieces.is_empty());
        ed.undo().unwrap();
        assert_eq!(ed.map(), &before);
    }

    #[test]
    fn new_commit_discards_redo() {
        let mut ed = editor();
        ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        ed.undo().unwrap();
        assert!(ed.can_redo());
        ed.place_piece("sq3", 10.0, 0.0, Rotation::Deg0, 0).unwrap();
        assert!(!ed.can_redo());
        assert_eq!(ed.redo().unwrap_err(), EditError::EmptyHistory("redo"));
    }

    #[test]
    fn selection_never_holds_deleted_ids() {
        let mut ed = editor();
        let a = ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        let b = ed.place_piece("sq3", 4.0, 0.0, Rotation::Deg0, 0).unwrap();
        ed.select(&a).unwrap();
        ed.toggle_selection(&b).unwrap();
        ed.delete_piece(&a).unwrap();
        assert_eq!(ed.selection().to_vec(), vec![b.clone()]);

        // Undoing the place of b removes it, so it leaves the selection too.
        ed.undo().unwrap();
        ed.undo().unwrap();
        assert!(ed.selection().is_empty());
        assert!(ed.select("ghost").is_err());
    }

    #[test]
    fn rotate_selected_turns_each_piece_once() {
        let mut ed = editor();
        let a = ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        let b = ed.place_piece("sq3", 4.0, 0.0, Rotation::Deg90, 0).unwrap();
        ed.select_many(&[a.clone(), b.clone()]);
        assert_eq!(ed.rotate_selected().unwrap(), 2);
        assert_eq!(ed.map().piece(&a).unwrap().rotation, Rotation::Deg90);
        assert_eq!(ed.map().piece(&b).unwrap().rotation, Rotation::Deg180);
        ed.undo().unwrap();
        assert_eq!(ed.map().piece(&a).unwrap().rotation, Rotation::Deg0);
        assert_eq!(ed.map().piece(&b).unwrap().rotation, Rotation::Deg90);
    }

    #[test]
    fn load_resets_history_and_selection() {
        let mut ed = editor();
        let a = ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        ed.select(&a).unwrap();
        let fresh = MapState {
            name: "Sewers".into(),
            ..MapState::default()
        };
        ed.load_map_data(fresh.clone());
        assert_eq!(ed.map(), &fresh);
        assert!(ed.selection().is_empty());
        assert!(!ed.can_undo());
        assert_eq!(ed.undo().unwrap_err(), EditError::EmptyHistory("undo"));
    }

    #[test]
    fn subscribers_see_commits_but_not_rejections() {
        let mut ed = editor();
        let rx = ed.subscribe();
        ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        assert!(ed.place_piece("sq3", 1.0, 0.0, Rotation::Deg0, 0).is_err());
        let _ = ed.undo();
        let _ = ed.undo();

        let got: Vec<MapUpdate> = rx.try_iter().collect();
        let names: Vec<&str> = got.iter().map(|u| u.event.as_str()).collect();
        assert_eq!(names, vec![events::PIECE_PLACED, events::UNDO]);
        assert_eq!(got[0].revision + 1, got[1].revision);
        assert_eq!(got[0].map.placed_pieces.len(), 1);
        assert!(got[1].can_redo);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let mut ed = editor();
        drop(ed.subscribe());
        let live = ed.subscribe();
        ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        assert_eq!(ed.subscribers.len(), 1);
        assert_eq!(live.try_iter().count(), 1);
    }

    #[test]
    fn snap_preview_uses_map_grid() {
        let mut ed = editor();
        ed.set_grid_config(GridConfig {
            cell_size: 1.0,
            magnetic_snap: true,
            ..GridConfig::default()
        });
        ed.place_piece("tri2", 0.0, 0.0, Rotation::Deg90, 0).unwrap();
        let hit = ed.snap_preview("tri2", Point::new(2.2, 0.1), Rotation::Deg0, 0).unwrap();
        assert!(hit.magnetic);
        assert_eq!(hit.point, Point::new(2.0, 0.0));
        // Other levels have no neighbors to pull toward.
        ed.add_level(1);
        let plain = ed.snap_preview("tri2", Point::new(2.2, 0.1), Rotation::Deg0, 1).unwrap();
        assert!(!plain.magnetic);
        assert!(ed.snap_preview("nope", Point::default(), Rotation::Deg0, 0).is_err());
    }

    #[test]
    fn undo_restores_a_removed_level() {
        let mut ed = editor();
        ed.add_level(1);
        let id = ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 1).unwrap();
        ed.delete_piece(&id).unwrap();
        ed.remove_level(1).unwrap();
        assert!(!ed.map().levels.contains(&1));

        ed.undo().unwrap();
        assert_eq!(ed.map().piece(&id).unwrap().level, 1);
        assert!(ed.map().levels.contains(&1));
        // The level is real again: more pieces can go on it.
        ed.place_piece("sq3", 5.0, 0.0, Rotation::Deg0, 1).unwrap();
    }

    #[test]
    fn catalog_change_cannot_orphan_or_overlap_placed_pieces() {
        let mut ed = editor();
        ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap();
        let tri = ed.catalog().piece("tri2").cloned().unwrap();

        let err = ed.set_catalog(Catalog::new([tri.clone()], [])).unwrap_err();
        assert_eq!(err, EditError::PieceInUse("sq3".into()));
        let err = ed.place_piece("sq3", 0.0, 0.0, Rotation::Deg0, 0).unwrap_err();
        assert!(err.is_collision());
        assert!(ed.can_undo());

        // A footprint change is accepted when it fits, but drops history.
        let mut sq = ed.catalog().piece("sq3").cloned().unwrap();
        sq.size = Size { width: 2.0, height: 2.0 };
        ed.set_catalog(Catalog::new([sq, tri], [])).unwrap();
        assert!(!ed.can_undo());
        assert!(ed.place_piece("sq3", 1.0, 1.0, Rotation::Deg0, 0).unwrap_err().is_collision());
    }
}
