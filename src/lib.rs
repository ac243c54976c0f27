pub mod config;
pub mod diagnostic;
pub mod engine;
pub mod logging;
pub mod mastery;
pub mod store;

pub use config::Config;
pub use engine::{EngineError, TutorEngine};
