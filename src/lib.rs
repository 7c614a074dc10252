pub mod config;
mod engine;
pub mod events;
pub mod output;
pub mod song;
pub mod timing;

pub use config::{ConfigError, EngineConfig};
pub use engine::{
    EngineCommand, EngineError, EngineHandle, EngineUpdate, TransportStatus, spawn_engine,
};
pub use song::{Song, SongError};
