mod ort_service;

pub mod app;
pub mod classifier;
pub mod config;
pub mod dispatcher;
pub mod model_loader;
pub mod model_service;
pub mod preprocess;
pub mod routes;
pub mod schema;
pub mod server;
pub mod telemetry;

pub use app::start_app;
