pub mod config;
pub mod error;
pub mod feature_store;
pub mod ingest;
pub mod model;
pub mod offline;
pub mod records;
pub mod retry;
pub mod service;

pub use error::{FeatureStoreError, Result};
pub use feature_store::FeatureStore;
