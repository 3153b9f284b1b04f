pub mod attach;
pub mod client;
pub mod config;
pub mod model;
pub mod persist;
pub mod pipeline;
pub mod protocol;
pub mod sync;
pub mod telemetry;
pub mod terminal;
pub mod transport;
pub mod workspace;
