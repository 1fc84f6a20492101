pub mod config;
pub mod error;
pub mod model;
pub mod sources;

pub use config::Config;
pub use error::*;
pub use model::*;
pub use sources::{PolicySource, ResourcePage, ResourceSource};
