//! Image model: references, metadata, and the on-disk store

pub mod reference;
pub mod spec;
pub mod store;

pub use reference::BaseReference;
pub use spec::{ImageSpec, RuntimeConfig};
pub use store::{ImageStore, StagingDir};
