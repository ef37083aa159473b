#![warn(non_snake_case)]

pub mod config;
pub mod controller;
pub mod engine;
pub mod irrigation;
pub mod net;
pub mod options;
pub mod session;
pub mod web;

pub use config::EngineConfig;
pub use controller::{Controller, ControllerMarking, DomainTransition, GuardError};
pub use engine::{Engine, EngineError, EngineEvent, EngineSnapshot, MarkingSnapshot};
pub use irrigation::{IrrigationState, StateUpdate};
pub use session::{Applied, Session, SessionError, SessionHandle};

/// Environment variable selecting the log filter, e.g. `IRRIGATE_LOG=debug`.
pub const LOG_ENV: &str = "IRRIGATE_LOG";

/// Installs `env_logger` when `IRRIGATE_LOG` is set; logging stays off otherwise.
pub fn init_logger() {
    if std::env::var(LOG_ENV).is_ok() {
        let e = env_logger::Env::new()
            .filter(LOG_ENV)
            .write_style("IRRIGATE_LOG_STYLE");
        env_logger::init_from_env(e);
    }
}
