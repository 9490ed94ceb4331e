use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

/// Quarter-turn rotation of a placed piece. Serialized as plain degrees.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(try_from = "u16", into = "u16")]
pub enum Rotation {
    #[default]
    Deg0,
    Deg90,
    Deg180,
    Deg270,
}

impl Rotation {
    pub const ALL: [Rotation; 4] = [
        Rotation::Deg0,
        Rotation::Deg90,
        Rotation::Deg180,
        Rotation::Deg270,
    ];

    pub fn degrees(self) -> u16 {
        match self {
            Self::Deg0 => 0,
            Self::Deg90 => 90,
            Self::Deg180 => 180,
            Self::Deg270 => 270,
        }
    }

    pub fn from_degrees(deg: u16) -> Option<Self> {
        match deg % 360 {
            0 => Some(Self::Deg0),
            90 => Some(Self::Deg90),
            180 => Some(Self::Deg180),
            270 => Some(Self::Deg270),
            _ => None,
        }
    }

    /// True for 90/270, where width and height trade places.
    pub fn swaps_axes(self) -> bool {
        matches!(self, Self::Deg90 | Self::Deg270)
    }

    pub fn clockwise(self) -> Self {
        match self {
            Self::Deg0 => Self::Deg90,
            Self::Deg90 => Self::Deg180,
            Self::Deg180 => Self::Deg270,
            Self::Deg270 => Self::Deg0,
        }
    }
}

impl TryFrom<u16> for Rotation {
    type Error = String;

    fn try_from(deg: u16) -> Result<Self, Self::Error> {
        Self::from_degrees(deg)
            .ok_or_else(|| format!("rotation must be 0, 90, 180 or 270 (got {deg})"))
    }
}

impl From<Rotation> for u16 {
    fn from(r: Rotation) -> Self {
        r.degrees()
    }
}

impl fmt::Display for Rotation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}°", self.degrees())
    }
}

/// World position in inches.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Size {
    pub width: f64,
    pub height: f64,
}

/// Axis-aligned box in world inches.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub x: f64,
    pub y: f64,
    pub w: f64,
    pub h: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TerrainType {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

/// Catalog entry for a physical tile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModularPiece {
    pub id: String,
    pub name: String,
    pub terrain_type_id: String,
    pub size: Size,
    #[serde(default)]
    pub is_diagonal: bool,
    /// Only meaningful for diagonal pieces.
    #[serde(default)]
    pub default_rotation: Rotation,
    /// Row-major terrain type ids for multi-terrain pieces.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cell_colors: Option<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlacedPiece {
    pub id: String,
    pub piece_id: String,
    /// Top-left of the unrotated bounding box.
    pub x: f64,
    pub y: f64,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default)]
    pub level: i32,
}

impl PlacedPiece {
    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridConfig {
    pub cell_size: f64,
    #[serde(default = "default_true")]
    pub show_grid: bool,
    #[serde(default = "default_true")]
    pub snap_to_grid: bool,
    #[serde(default)]
    pub magnetic_snap: bool,
}

fn default_true() -> bool {
    true
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            cell_size: 1.0,
            show_grid: true,
            snap_to_grid: true,
            magnetic_snap: false,
        }
    }
}

/// UI-only camera; never consulted for collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ViewTransform {
    pub zoom: f64,
    #[serde(default)]
    pub pan_x: f64,
    #[serde(default)]
    pub pan_y: f64,
}

impl Default for ViewTransform {
    fn default() -> Self {
        Self {
            zoom: 1.0,
            pan_x: 0.0,
            pan_y: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapState {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub width: f64,
    pub height: f64,
    pub levels: BTreeSet<i32>,
    #[serde(default)]
    pub placed_pieces: Vec<PlacedPiece>,
    #[serde(default)]
    pub grid_config: GridConfig,
    /// Active level in the editor.
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub view: ViewTransform,
}

impl Default for MapState {
    fn default() -> Self {
        Self {
            name: "Untitled map".to_string(),
            description: String::new(),
            width: 60.0,
            height: 44.0,
            levels: BTreeSet::from([0]),
            placed_pieces: Vec::new(),
            grid_config: GridConfig::default(),
            level: 0,
            view: ViewTransform::default(),
        }
    }
}

impl MapState {
    pub fn piece(&self, placed_id: &str) -> Option<&PlacedPiece> {
        self.placed_pieces.iter().find(|p| p.id == placed_id)
    }

    pub fn pieces_on_level(&self, level: i32) -> impl Iterator<Item = &PlacedPiece> {
        self.placed_pieces.iter().filter(move |p| p.level == level)
    }
}

/// State-changed notification pushed to renderers after every committed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MapUpdate {
    pub revision: u64,
    pub event: String,
    pub map: MapState,
    pub selection: Vec<String>,
    pub can_undo: bool,
    pub can_redo: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct KeyInput {
    pub key: String,
    #[serde(default)]
    pub ctrl: bool,
    #[serde(default)]
    pub meta: bool,
    #[serde(default)]
    pub shift: bool,
}

impl KeyInput {
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Self::default()
        }
    }

    /// Primary modifier: ctrl on Linux/Windows, cmd on macOS.
    pub fn primary(&self) -> bool {
        self.ctrl || self.meta
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointerClick {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub placed_id: Option<String>,
    #[serde(default)]
    pub shift: bool,
}

pub mod events {
    pub const PIECE_PLACED: &str = "piece.placed";
    pub const PIECE_MOVED: &str = "piece.moved";
    pub const PIECE_ROTATED: &str = "piece.rotated";
    pub const PIECE_DELETED: &str = "piece.deleted";
    pub const BATCH: &str = "batch";
    pub const MAP_CLEARED: &str = "map.cleared";
    pub const MAP_LOADED: &str = "map.loaded";
    pub const LEVELS_CHANGED: &str = "map.levels";
    pub const GRID_CHANGED: &str = "map.grid";
    pub const UNDO: &str = "history.undo";
    pub const REDO: &str = "history.redo";
    pub const SELECTION: &str = "selection";
    pub const CATALOG_CHANGED: &str = "catalog.changed";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rotation_serializes_as_degrees() {
        let p = PlacedPiece {
            id: "a".into(),
            piece_id: "p".into(),
            x: 1.0,
            y: 2.0,
            rotation: Rotation::Deg270,
            level: -1,
        };
        let v = serde_json::to_value(&p).unwrap();
        assert_eq!(v["rotation"], 270);
        assert_eq!(v["pieceId"], "p");
    }

    #[test]
    fn rotation_rejects_off_axis_degrees() {
        let err = serde_json::from_str::<Rotation>("45").unwrap_err();
        assert!(err.to_string().contains("0, 90, 180 or 270"));
        assert_eq!(serde_json::from_str::<Rotation>("180").unwrap(), Rotation::Deg180);
    }

    #[test]
    fn map_state_defaults_fill_missing_fields() {
        let m: MapState = serde_json::from_str(
            r#"{"name":"Crypt","width":24,"height":24,"levels":[1,-1,0]}"#,
        )
        .unwrap();
        assert_eq!(m.levels.iter().copied().collect::<Vec<_>>(), vec![-1, 0, 1]);
        assert!(m.placed_pieces.is_empty());
        assert_eq!(m.grid_config, GridConfig::default());
        assert_eq!(m.view.zoom, 1.0);
    }

    #[test]
    fn primary_modifier_accepts_ctrl_or_meta() {
        let mut k = KeyInput::new("z");
        assert!(!k.primary());
        k.meta = true;
        assert!(k.primary());
    }
}
