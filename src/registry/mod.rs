//! Versioned capability registry: types, persistence, catalog.

pub mod capability;
pub mod registry;
pub mod store;

pub use capability::{
    Artifact, Capability, CapabilityMetadata, CapabilitySpec, Constraints, IoSpec, SmokeTest,
    SUCCESS_RATE_ALPHA,
};
pub use registry::{CapabilityRegistry, SearchHit, DEFAULT_SEARCH_LIMIT};
pub use store::RegistryStore;
