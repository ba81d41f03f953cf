pub mod errors;
pub mod logger;
pub mod time;
pub mod types;

pub use errors::*;
pub use types::*;
