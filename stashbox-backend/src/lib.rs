#![doc = include_str!("../README.md")]
#![warn(missing_docs)]

pub mod error;
pub mod store;

pub use error::StoreError;
pub use store::{SharedStore, Store, StoreResult};
