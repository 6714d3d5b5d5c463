#![doc = include_str!("RUSTDOC.md")]

pub mod adapter;
pub mod database;
pub mod logger;

#[doc(inline)]
pub use adapter::{Adapter, AdapterError, AdapterResult, ConnectionConfig, Criteria};
