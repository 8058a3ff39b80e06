pub mod validation;
pub mod write_config;

// Re-export common validation functions
pub use validation::*;
