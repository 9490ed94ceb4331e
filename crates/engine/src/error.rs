/// Reasons an edit can be rejected. None of these end the editing session.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum EditError {
    #[error("placement overlaps {against} on level {level}")]
    Collision { against: String, level: i32 },
    #[error("no placed piece with id {0}")]
    InvalidReference(String),
    #[error("piece {0} is not in the catalog")]
    UnknownPiece(String),
    #[error("level {0} does not exist on this map")]
    UnknownLevel(i32),
    #[error("level {0} still has pieces on it")]
    LevelNotEmpty(i32),
    #[error("position ({x}, {y}) is not a finite point")]
    NonFinite { x: f64, y: f64 },
    #[error("piece {0} is still placed on the map")]
    PieceInUse(String),
    #[error("nothing to {0}")]
    EmptyHistory(&'static str),
}

impl EditError {
    /// Rejections the UI can show; everything else is a stale or buggy request.
    pub fn is_collision(&self) -> bool {
        matches!(self, Self::Collision { .. })
    }
}
