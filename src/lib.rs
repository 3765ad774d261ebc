pub mod config;
pub mod controller;
pub mod error;
pub mod logging;
pub mod routes;
pub mod server;
pub mod signal;
pub mod worker;

pub use config::{ConfigUpdate, Configuration, EngineSettings, ServiceArgs};
pub use controller::{ControlResponse, LoadController, RunState};
pub use error::EngineError;
pub use signal::CancellationSignal;
