//! Overlap checks between a candidate placement and the pieces already on a map.
//!
//! Diagonal pieces are tested with their full bounding box, not their
//! triangular footprint, so two half-square triangles that visually tile a
//! square are still reported as colliding.

use crate::catalog::Catalog;
use crate::geometry::{bounds_at, effective_bounds, overlaps};
use terraplan_protocol::{PlacedPiece, Point, Rotation};

#[derive(Debug, Clone, Copy)]
pub struct Candidate<'a> {
    pub piece_id: &'a str,
    pub at: Point,
    pub rotation: Rotation,
    pub level: i32,
}

/// First piece on the candidate's level whose bounds overlap it.
/// `exclude_id` skips the piece being moved or rotated.
pub fn find_collision<'p>(
    candidate: &Candidate<'_>,
    existing: &'p [PlacedPiece],
    catalog: &Catalog,
    exclude_id: Option<&str>,
) -> Option<&'p PlacedPiece> {
    let piece = catalog.piece(candidate.piece_id)?;
    let cb = bounds_at(piece.size, candidate.at, candidate.rotation);
    existing
        .iter()
        .filter(|p| p.level == candidate.level)
        .filter(|p| exclude_id != Some(p.id.as_str()))
        .find(|p| match catalog.piece(&p.piece_id) {
            Some(other) => overlaps(&cb, &effective_bounds(other, p)),
            None => {
                log::warn!(
                    "placed piece {} references unknown piece {}; skipping",
                    p.id,
                    p.piece_id
                );
                false
            }
        })
}

pub fn has_collision(
    candidate: &Candidate<'_>,
    existing: &[PlacedPiece],
    catalog: &Catalog,
    exclude_id: Option<&str>,
) -> bool {
    find_collision(candidate, existing, catalog, exclude_id).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;
    use terraplan_protocol::{ModularPiece, Size};

    fn catalog() -> Catalog {
        let mk = |id: &str, w: f64, h: f64, diag: bool| ModularPiece {
            id: id.into(),
            name: id.into(),
            terrain_type_id: "stone".into(),
            size: Size { width: w, height: h },
            is_diagonal: diag,
            default_rotation: Rotation::Deg0,
            cell_colors: None,
            quantity: None,
        };
        Catalog::new(
            [mk("sq3", 3.0, 3.0, false), mk("bar", 1.0, 4.0, false), mk("tri", 2.0, 2.0, true)],
            [],
        )
    }

    fn at(id: &str, piece: &str, x: f64, y: f64, rotation: Rotation, level: i32) -> PlacedPiece {
        PlacedPiece {
            id: id.into(),
            piece_id: piece.into(),
            x,
            y,
            rotation,
            level,
        }
    }

    fn cand(piece_id: &str, x: f64, y: f64, rotation: Rotation, level: i32) -> Candidate<'_> {
        Candidate {
            piece_id,
            at: Point::new(x, y),
            rotation,
            level,
        }
    }

    #[test]
    fn overlapping_square_collides_and_flush_square_does_not() {
        let cat = catalog();
        let existing = vec![at("a", "sq3", 0.0, 0.0, Rotation::Deg0, 0)];
        assert!(has_collision(&cand("sq3", 1.0, 1.0, Rotation::Deg0, 0), &existing, &cat, None));
        assert!(!has_collision(&cand("sq3", 3.0, 0.0, Rotation::Deg0, 0), &existing, &cat, None));
    }

    #[test]
    fn other_levels_never_collide() {
        let cat = catalog();
        let existing = vec![at("a", "sq3", 0.0, 0.0, Rotation::Deg0, 0)];
        assert!(!has_collision(&cand("sq3", 0.0, 0.0, Rotation::Deg0, 1), &existing, &cat, None));
        assert!(!has_collision(&cand("sq3", 0.0, 0.0, Rotation::Deg0, -1), &existing, &cat, None));
    }

    #[test]
    fn excluded_piece_is_ignored() {
        let cat = catalog();
        let existing = vec![at("a", "sq3", 0.0, 0.0, Rotation::Deg0, 0)];
        let moved = cand("sq3", 1.0, 0.0, Rotation::Deg0, 0);
        assert!(!has_collision(&moved, &existing, &cat, Some("a")));
    }

    #[test]
    fn rotation_changes_the_footprint() {
        let cat = catalog();
        // 1x4 bar at x=0; a 90° bar at (1,0) spans x 1..5 and misses it.
        let existing = vec![at("a", "bar", 0.0, 0.0, Rotation::Deg0, 0)];
        assert!(!has_collision(&cand("bar", 1.0, 0.0, Rotation::Deg90, 0), &existing, &cat, None));
        assert!(has_collision(&cand("bar", 0.0, 3.0, Rotation::Deg90, 0), &existing, &cat, None));
    }

    #[test]
    fn diagonals_collide_as_full_boxes() {
        let cat = catalog();
        let existing = vec![at("a", "tri", 0.0, 0.0, Rotation::Deg0, 0)];
        // The 180° triangle fills exactly the other half of the square.
        let flipped = cand("tri", 0.0, 0.0, Rotation::Deg180, 0);
        let hit = find_collision(&flipped, &existing, &cat, None);
        assert_eq!(hit.map(|p| p.id.as_str()), Some("a"));
    }

    #[test]
    fn unknown_pieces_do_not_collide() {
        let cat = catalog();
        let existing = vec![at("ghost", "missing", 0.0, 0.0, Rotation::Deg0, 0)];
        assert!(!has_collision(&cand("sq3", 0.0, 0.0, Rotation::Deg0, 0), &existing, &cat, None));
        assert!(!has_collision(&cand("missing", 0.0, 0.0, Rotation::Deg0, 0), &[], &cat, None));
    }
}
