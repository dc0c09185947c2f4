pub mod backend;
pub mod config;
pub mod error;
pub mod filestore;
pub mod graph;
pub mod jobs;
pub mod model;
pub mod pipeline;
pub mod reconcile;
pub mod shutdown;
pub mod status;
pub mod store;
pub mod worker;
