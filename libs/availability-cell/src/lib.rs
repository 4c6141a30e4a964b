pub mod models;
pub mod services;

// Re-export the types other cells build on
pub use models::*;
pub use services::*;
