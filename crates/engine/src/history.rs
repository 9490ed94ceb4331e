//! Linear undo/redo over committed placement actions.

use crate::error::EditError;
use terraplan_protocol::{events, MapState, PlacedPiece, Point, Rotation};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchKind {
    DeleteSelected,
    RotateSelected,
    Clear,
}

/// One committed mutation, carrying enough before/after data to run either way.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Place { index: usize, piece: PlacedPiece },
    Move { id: String, from: Point, to: Point },
    Rotate { id: String, from: Rotation, to: Rotation },
    Delete { index: usize, piece: PlacedPiece },
    Batch { kind: BatchKind, actions: Vec<Action> },
}

impl Action {
    pub fn event(&self) -> &'static str {
        match self {
            Self::Place { .. } => events::PIECE_PLACED,
            Self::Move { .. } => events::PIECE_MOVED,
            Self::Rotate { .. } => events::PIECE_ROTATED,
            Self::Delete { .. } => events::PIECE_DELETED,
            Self::Batch {
                kind: BatchKind::Clear,
                ..
            } => events::MAP_CLEARED,
            Self::Batch { .. } => events::BATCH,
        }
    }

    /// Run the action forward. No collision checks: the target state was valid
    /// when the action was first committed.
    pub fn apply(&self, map: &mut MapState) {
        match self {
            Self::Place { index, piece } => insert_at(map, *index, piece),
            Self::Move { id, to, .. } => set_position(map, id, *to),
            Self::Rotate { id, to, .. } => set_rotation(map, id, *to),
            Self::Delete { index, piece } => remove_at(map, *index, &piece.id),
            Self::Batch { actions, .. } => actions.iter().for_each(|a| a.apply(map)),
        }
    }

    pub fn revert(&self, map: &mut MapState) {
        match self {
            Self::Place { index, piece } => remove_at(map, *index, &piece.id),
            Self::Move { id, from, .. } => set_position(map, id, *from),
            Self::Rotate { id, from, .. } => set_rotation(map, id, *from),
            Self::Delete { index, piece } => insert_at(map, *index, piece),
            Self::Batch { actions, .. } => actions.iter().rev().for_each(|a| a.revert(map)),
        }
    }
}

fn insert_at(map: &mut MapState, index: usize, piece: &PlacedPiece) {
    // The level may have been removed after the piece left it.
    if map.levels.insert(piece.level) {
        log::info!("history: restored level {} for piece {}", piece.level, piece.id);
    }
    let index = index.min(map.placed_pieces.len());
    map.placed_pieces.insert(index, piece.clone());
}

fn remove_at(map: &mut MapState, index: usize, id: &str) {
    let pos = match map.placed_pieces.get(index) {
        Some(p) if p.id == id => Some(index),
        _ => map.placed_pieces.iter().position(|p| p.id == id),
    };
    match pos {
        Some(i) => {
            map.placed_pieces.remove(i);
        }
        None => log::warn!("history: piece {id} already gone"),
    }
}

fn set_position(map: &mut MapState, id: &str, to: Point) {
    match map.placed_pieces.iter_mut().find(|p| p.id == id) {
        Some(p) => {
            p.x = to.x;
            p.y = to.y;
        }
        None => log::warn!("history: cannot move missing piece {id}"),
    }
}

fn set_rotation(map: &mut MapState, id: &str, to: Rotation) {
    match map.placed_pieces.iter_mut().find(|p| p.id == id) {
        Some(p) => p.rotation = to,
        None => log::warn!("history: cannot rotate missing piece {id}"),
    }
}

#[derive(Debug, Clone, Default)]
pub struct History {
    past: Vec<Action>,
    future: Vec<Action>,
    /// Max entries kept in `past`; 0 means unbounded.
    limit: usize,
}

impl History {
    pub fn new(limit: usize) -> Self {
        Self {
            past: Vec::new(),
            future: Vec::new(),
            limit,
        }
    }

    /// Record an action that has already been applied. Drops any redo entries.
    pub fn commit(&mut self, action: Action) {
        self.past.push(action);
        self.future.clear();
        if self.limit > 0 && self.past.len() > self.limit {
            let excess = self.past.len() - self.limit;
            self.past.drain(..excess);
        }
    }

    /// Revert the newest action. Returns the event name of what was undone.
    pub fn undo(&mut self, map: &mut MapState) -> Result<&'static str, EditError> {
        let action = self.past.pop().ok_or(EditError::EmptyHistory("undo"))?;
        action.revert(map);
        let event = action.event();
        self.future.push(action);
        Ok(event)
    }

    pub fn redo(&mut self, map: &mut MapState) -> Result<&'static str, EditError> {
        let action = self.future.pop().ok_or(EditError::EmptyHistory("redo"))?;
        action.apply(map);
        let event = action.event();
        self.past.push(action);
        Ok(event)
    }

    pub fn can_undo(&self) -> bool {
        !self.past.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.future.is_empty()
    }

    pub fn clear(&mut self) {
        self.past.clear();
        self.future.clear();
    }

    pub fn len(&self) -> usize {
        self.past.len()
    }

    pub fn is_empty(&self) -> bool {
        self.past.is_empty()
    }
}
