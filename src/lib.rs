// Library for both binaries and the integration tests

pub mod agent;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod models;
pub mod prober;
pub mod routes;
pub mod sampler;
pub mod storage;
pub mod transport;
pub mod version;
pub mod window;
