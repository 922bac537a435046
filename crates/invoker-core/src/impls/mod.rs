//! Impls - concrete bindings for the ports.
//!
//! - **InMemoryObjectStore**: tests and development
//! - **LocalObjectStore**: a directory on the container filesystem

pub mod inmem_store;
pub mod local_store;

pub use self::inmem_store::InMemoryObjectStore;
pub use self::local_store::LocalObjectStore;
