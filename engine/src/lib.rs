pub mod types;
pub mod error;
pub mod constants;
pub mod map;
pub mod protocol;
pub mod engine;
pub mod navigation;
pub mod survival;


pub use types::*;
pub use constants::{Config, GameConstants, Hyperparameters};
pub use engine::GameState;
pub use error::{ConfigError, ProtocolError};
pub use map::GameMap;
pub use navigation::{Navigator, Orientation};
