pub mod aggregate;
pub mod api;
pub mod authority;
pub mod config;
pub mod debounce;
pub mod error;
pub mod http;
pub mod interaction;
pub mod library;
pub mod models;
pub mod session;
pub mod store;
pub mod token_store;

pub use error::{Error, Result};
