pub mod error;
pub mod models;
pub mod services;

pub use error::SweepError;
pub use models::*;
pub use services::*;
