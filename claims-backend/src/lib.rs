pub mod claims;
pub mod config;
pub mod error;
pub mod models;

pub use claims::ClaimStore;
pub use config::StoreConfig;
pub use error::ClaimStoreError;
