//! vigil-store — in-memory key-value aggregation for one resource.

pub mod merge;
pub mod store;

pub use merge::StoreSet;
pub use store::{Entry, Store};
