//! World/grid conversions and rotation-aware bounding boxes.
//!
//! Everything here is pure. Bounds are always derived from the stored
//! rotation on demand and never cached on the placed piece.

use terraplan_protocol::{Bounds, GridConfig, ModularPiece, PlacedPiece, Point, Rotation, Size};

/// Size of a piece after applying `rotation` (width/height swap at 90/270).
pub fn rotated_size(size: Size, rotation: Rotation) -> Size {
    if rotation.swaps_axes() {
        Size {
            width: size.height,
            height: size.width,
        }
    } else {
        size
    }
}

pub fn bounds_at(size: Size, at: Point, rotation: Rotation) -> Bounds {
    let s = rotated_size(size, rotation);
    Bounds {
        x: at.x,
        y: at.y,
        w: s.width,
        h: s.height,
    }
}

pub fn effective_bounds(piece: &ModularPiece, placement: &PlacedPiece) -> Bounds {
    bounds_at(piece.size, placement.position(), placement.rotation)
}

/// Area shared by two boxes; zero when they only touch along an edge or corner.
pub fn intersection_area(a: &Bounds, b: &Bounds) -> f64 {
    let dx = (a.x + a.w).min(b.x + b.w) - a.x.max(b.x);
    let dy = (a.y + a.h).min(b.y + b.h) - a.y.max(b.y);
    if dx > 0.0 && dy > 0.0 {
        dx * dy
    } else {
        0.0
    }
}

/// True if the interiors overlap. Touching is NOT counted as overlap.
pub fn overlaps(a: &Bounds, b: &Bounds) -> bool {
    intersection_area(a, b) > 0.0
}

/// Grid cell under `point`, clamped into the map. Rendering aid only.
pub fn world_to_cell(
    point: Point,
    grid: &GridConfig,
    map_width: f64,
    map_height: f64,
) -> (usize, usize) {
    let cell = grid.cell_size;
    if !(cell.is_finite() && cell > 0.0) {
        return (0, 0);
    }
    let cols = cell_count(map_width, cell);
    let rows = cell_count(map_height, cell);
    // `as usize` saturates: negatives and NaN land on 0.
    let col = ((point.x / cell).floor() as usize).min(cols - 1);
    let row = ((point.y / cell).floor() as usize).min(rows - 1);
    (col, row)
}

fn cell_count(extent: f64, cell: f64) -> usize {
    ((extent / cell).ceil() as usize).max(1)
}

/// Round to the nearest grid intersection, or pass through when snapping is off.
pub fn snap(point: Point, grid: &GridConfig) -> Point {
    let cell = grid.cell_size;
    if !grid.snap_to_grid || !(cell.is_finite() && cell > 0.0) {
        return point;
    }
    Point {
        x: (point.x / cell).round() * cell,
        y: (point.y / cell).round() * cell,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Top,
    Right,
    Bottom,
    Left,
}

impl Side {
    pub fn opposite(self) -> Self {
        match self {
            Self::Top => Self::Bottom,
            Self::Right => Self::Left,
            Self::Bottom => Self::Top,
            Self::Left => Self::Right,
        }
    }
}

/// Sides of the bounding box covered by a full leg of a diagonal piece.
/// At 0° the right angle sits in the top-left corner.
pub fn diagonal_legs(rotation: Rotation) -> [Side; 2] {
    match rotation {
        Rotation::Deg0 => [Side::Top, Side::Left],
        Rotation::Deg90 => [Side::Top, Side::Right],
        Rotation::Deg180 => [Side::Bottom, Side::Right],
        Rotation::Deg270 => [Side::Bottom, Side::Left],
    }
}

#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize)]
pub struct SnapResult {
    pub point: Point,
    pub rotation: Rotation,
    /// Set when the result came from a diagonal neighbor rather than the grid.
    pub magnetic: bool,
}

/// Snap a piece being dragged. `neighbors` are placed pieces on the same level
/// together with their catalog entries.
///
/// With magnetic snap on, a diagonal piece is pulled flush against a diagonal
/// neighbor so that a leg of each lies on the shared edge. Among every
/// orientation/side pairing the one nearest the cursor wins, provided it is
/// within one cell; otherwise plain grid snap applies.
pub fn snap_piece(
    cursor: Point,
    grid: &GridConfig,
    piece: &ModularPiece,
    rotation: Rotation,
    neighbors: &[(&PlacedPiece, &ModularPiece)],
) -> SnapResult {
    let fallback = SnapResult {
        point: snap(cursor, grid),
        rotation,
        magnetic: false,
    };
    if !grid.snap_to_grid || !grid.magnetic_snap || !piece.is_diagonal {
        return fallback;
    }

    let mut best: Option<(f64, SnapResult)> = None;
    for (placed, neighbor) in neighbors {
        if !neighbor.is_diagonal {
            continue;
        }
        let nb = effective_bounds(neighbor, placed);
        for side in diagonal_legs(placed.rotation) {
            for r in Rotation::ALL {
                if !diagonal_legs(r).contains(&side.opposite()) {
                    continue;
                }
                let s = rotated_size(piece.size, r);
                let at = match side {
                    Side::Right => Point::new(nb.x + nb.w, nb.y),
                    Side::Left => Point::new(nb.x - s.width, nb.y),
                    Side::Bottom => Point::new(nb.x, nb.y + nb.h),
                    Side::Top => Point::new(nb.x, nb.y - s.height),
                };
                let d = cursor.distance(at);
                let better = match &best {
                    None => true,
                    Some((bd, b)) => {
                        d < *bd || (d == *bd && r == rotation && b.rotation != rotation)
                    }
                };
                if better {
                    best = Some((
                        d,
                        SnapResult {
                            point: at,
                            rotation: r,
                            magnetic: true,
                        },
                    ));
                }
            }
        }
    }

    match best {
        Some((d, hit)) if d <= grid.cell_size => hit,
        _ => fallback,
    }
}
