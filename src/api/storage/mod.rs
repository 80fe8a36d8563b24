//! Storage module for the API.
//!
//! An in-process transactional entity store. Query methods live on [`Tables`], split by
//! entity family; `Store` hands out read guards and transactions over them.

pub mod environment;
pub mod error;
pub mod flow;
pub mod http;
pub mod memory;
pub mod ordering;
pub mod response;
pub mod workspace;

pub use error::StorageError;
pub use http::HttpCascade;
pub use memory::{BULK_CHUNK, Reader, Store, Tables, Tx};
