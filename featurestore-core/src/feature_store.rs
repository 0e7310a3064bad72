//! Feature Store module. Owns the remote clients and applies the client-side
//! policies around them: definition checks, duplicate recovery and batch ingestion.

mod feature_store_impl;

pub use feature_store_impl::FeatureStore;
