// ═══════════════════════════════════════════════════════════════════════
// Error types
// ═══════════════════════════════════════════════════════════════════════

use thiserror::Error;

/// A record on the wire that could not be turned into game state.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("empty record")]
    EmptyRecord,
    #[error("unknown record tag `{0}`")]
    UnknownTag(String),
    #[error("record `{tag}` expects {expected} fields, got {got}")]
    FieldCount { tag: String, expected: usize, got: usize },
    #[error("bad number `{0}`")]
    BadNumber(String),
    #[error("unknown resource type `{0}`")]
    UnknownResource(String),
    #[error("unknown unit type code {0}")]
    UnknownUnitType(u8),
    #[error("team {0} is not 0 or 1")]
    BadTeam(u8),
    #[error("city tile references unknown city `{0}`")]
    UnknownCity(String),
    #[error("position ({0}, {1}) is off the map")]
    OutOfBounds(i32, i32),
    #[error("missing map header: {0}")]
    MissingHeader(&'static str),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("config json error: {0}")]
    Json(#[from] serde_json::Error),
}
