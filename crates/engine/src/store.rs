//! Authoritative model of one map. Every mutation is validated first and then
//! applied through the same [`Action`] that history will later replay.

use crate::catalog::Catalog;
use crate::collision::{find_collision, Candidate};
use crate::error::EditError;
use crate::history::{Action, BatchKind};
use std::time::{SystemTime, UNIX_EPOCH};
use terraplan_protocol::{GridConfig, MapState, PlacedPiece, Point, Rotation};

fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

fn require_finite(at: Point) -> Result<(), EditError> {
    if at.x.is_finite() && at.y.is_finite() {
        Ok(())
    } else {
        Err(EditError::NonFinite { x: at.x, y: at.y })
    }
}

#[derive(Debug, Clone, Default)]
pub struct PlacementStore {
    map: MapState,
    catalog: Catalog,
    id_counter: u64,
}

impl PlacementStore {
    pub fn new(map: MapState, catalog: Catalog) -> Self {
        Self {
            map,
            catalog,
            id_counter: 0,
        }
    }

    pub fn map(&self) -> &MapState {
        &self.map
    }

    pub(crate) fn map_mut(&mut self) -> &mut MapState {
        &mut self.map
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Swap the inventory. Refused if a placed piece would lose its entry or
    /// a resized piece would overlap a neighbor.
    pub fn set_catalog(&mut self, catalog: Catalog) -> Result<(), EditError> {
        self.check_catalog(&catalog)?;
        self.catalog = catalog;
        Ok(())
    }

    pub fn check_catalog(&self, catalog: &Catalog) -> Result<(), EditError> {
        let placed = &self.map.placed_pieces;
        if let Some(p) = placed.iter().find(|p| catalog.piece(&p.piece_id).is_none()) {
            return Err(EditError::PieceInUse(p.piece_id.clone()));
        }
        for p in placed {
            let candidate = Candidate {
                piece_id: &p.piece_id,
                at: p.position(),
                rotation: p.rotation,
                level: p.level,
            };
            if let Some(hit) = find_collision(&candidate, placed, catalog, Some(&p.id)) {
                return Err(EditError::Collision {
                    against: hit.id.clone(),
                    level: p.level,
                });
            }
        }
        Ok(())
    }

    /// Replace the whole map. Not an action: a load starts a new editing session.
    pub fn load(&mut self, map: MapState) {
        self.map = map;
    }

    fn new_id(&mut self) -> String {
        loop {
            self.id_counter += 1;
            let id = format!("pp-{}-{}", now_ms(), self.id_counter);
            if self.map.piece(&id).is_none() {
                return id;
            }
        }
    }

    fn require_level(&self, level: i32) -> Result<(), EditError> {
        if self.map.levels.contains(&level) {
            Ok(())
        } else {
            Err(EditError::UnknownLevel(level))
        }
    }

    fn find(&self, placed_id: &str) -> Result<(usize, &PlacedPiece), EditError> {
        self.map
            .placed_pieces
            .iter()
            .enumerate()
            .find(|(_, p)| p.id == placed_id)
            .ok_or_else(|| {
                log::warn!("no placed piece {placed_id}");
                EditError::InvalidReference(placed_id.to_string())
            })
    }

    fn check(
        &self,
        candidate: &Candidate<'_>,
        pieces: &[PlacedPiece],
        exclude: Option<&str>,
    ) -> Result<(), EditError> {
        match find_collision(candidate, pieces, &self.catalog, exclude) {
            Some(hit) => Err(EditError::Collision {
                against: hit.id.clone(),
                level: candidate.level,
            }),
            None => Ok(()),
        }
    }

    /// Returns the new placed-piece id along with the applied action.
    pub fn place(
        &mut self,
        piece_id: &str,
        at: Point,
        rotation: Rotation,
        level: i32,
    ) -> Result<(String, Action), EditError> {
        require_finite(at)?;
        if self.catalog.piece(piece_id).is_none() {
            return Err(EditError::UnknownPiece(piece_id.to_string()));
        }
        self.require_level(level)?;
        let candidate = Candidate {
            piece_id,
            at,
            rotation,
            level,
        };
        self.check(&candidate, &self.map.placed_pieces, None)?;

        let id = self.new_id();
        let piece = PlacedPiece {
            id: id.clone(),
            piece_id: piece_id.to_string(),
            x: at.x,
            y: at.y,
            rotation,
            level,
        };
        let action = Action::Place {
            index: self.map.placed_pieces.len(),
            piece,
        };
        action.apply(&mut self.map);
        Ok((id, action))
    }

    pub fn move_piece(&mut self, placed_id: &str, to: Point) -> Result<Action, EditError> {
        require_finite(to)?;
        let (_, p) = self.find(placed_id)?;
        let candidate = Candidate {
            piece_id: &p.piece_id,
            at: to,
            rotation: p.rotation,
            level: p.level,
        };
        self.check(&candidate, &self.map.placed_pieces, Some(placed_id))?;

        let action = Action::Move {
            id: placed_id.to_string(),
            from: p.position(),
            to,
        };
        action.apply(&mut self.map);
        Ok(action)
    }

    pub fn rotate_piece(&mut self, placed_id: &str, to: Rotation) -> Result<Action, EditError> {
        let (_, p) = self.find(placed_id)?;
        let candidate = Candidate {
            piece_id: &p.piece_id,
            at: p.position(),
            rotation: to,
            level: p.level,
        };
        self.check(&candidate, &self.map.placed_pieces, Some(placed_id))?;

        let action = Action::Rotate {
            id: placed_id.to_string(),
            from: p.rotation,
            to,
        };
        action.apply(&mut self.map);
        Ok(action)
    }

    /// Turn every listed piece 90° clockwise, all or nothing.
    pub fn rotate_many<'a>(
        &mut self,
        ids: impl IntoIterator<Item = &'a str>,
    ) -> Result<Option<Action>, EditError> {
        let mut scratch = self.map.placed_pieces.clone();
        let mut actions = Vec::new();
        for id in ids {
            let Some(i) = scratch.iter().position(|p| p.id == id) else {
                log::warn!("rotate: skipping unknown piece {id}");
                continue;
            };
            let p = &scratch[i];
            let to = p.rotation.clockwise();
            let candidate = Candidate {
                piece_id: &p.piece_id,
                at: p.position(),
                rotation: to,
                level: p.level,
            };
            self.check(&candidate, &scratch, Some(id))?;
            actions.push(Action::Rotate {
                id: id.to_string(),
                from: p.rotation,
                to,
            });
            scratch[i].rotation = to;
        }
        Ok(self.commit_batch(BatchKind::RotateSelected, actions))
    }

    pub fn delete(&mut self, placed_id: &str) -> Result<Action, EditError> {
        let (index, p) = self.find(placed_id)?;
        let action = Action::Delete {
            index,
            piece: p.clone(),
        };
        action.apply(&mut self.map);
        Ok(action)
    }

    pub fn delete_many<'a>(&mut self, ids: impl IntoIterator<Item = &'a str>) -> Option<Action> {
        let mut doomed: Vec<usize> = Vec::new();
        for id in ids {
            match self.map.placed_pieces.iter().position(|p| p.id == id) {
                Some(i) if !doomed.contains(&i) => doomed.push(i),
                Some(_) => {}
                None => log::warn!("delete: skipping unknown piece {id}"),
            }
        }
        // Highest index first so the recorded indices stay valid while removing.
        doomed.sort_unstable_by(|a, b| b.cmp(a));
        let actions = doomed
            .into_iter()
            .map(|index| Action::Delete {
                index,
                piece: self.map.placed_pieces[index].clone(),
            })
            .collect();
        self.commit_batch(BatchKind::DeleteSelected, actions)
    }

    pub fn clear(&mut self) -> Option<Action> {
        let actions = self
            .map
            .placed_pieces
            .iter()
            .enumerate()
            .rev()
            .map(|(index, p)| Action::Delete {
                index,
                piece: p.clone(),
            })
            .collect();
        self.commit_batch(BatchKind::Clear, actions)
    }

    fn commit_batch(&mut self, kind: BatchKind, actions: Vec<Action>) -> Option<Action> {
        if actions.is_empty() {
            return None;
        }
        let action = Action::Batch { kind, actions };
        action.apply(&mut self.map);
        Some(action)
    }

    pub fn add_level(&mut self, level: i32) -> bool {
        self.map.levels.insert(level)
    }

    pub fn remove_level(&mut self, level: i32) -> Result<(), EditError> {
        self.require_level(level)?;
        if self.map.pieces_on_level(level).next().is_some() {
            return Err(EditError::LevelNotEmpty(level));
        }
        self.map.levels.remove(&level);
        if self.map.level == level {
            self.map.level = self.map.levels.iter().copied().min_by_key(|l| l.abs()).unwrap_or(0);
        }
        Ok(())
    }

    pub fn set_active_level(&mut self, level: i32) -> Result<(), EditError> {
        self.require_level(level)?;
        self.map.level = level;
        Ok(())
    }

    pub fn set_grid_config(&mut self, grid: GridConfig) {
        self.map.grid_config = grid;
    }
}
