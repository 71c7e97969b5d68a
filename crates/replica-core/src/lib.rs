pub mod config;
pub mod error;
pub mod hash;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod reconcile;
pub mod record;
pub mod template;
pub mod types;

pub use error::{ReplicaError, Result};
