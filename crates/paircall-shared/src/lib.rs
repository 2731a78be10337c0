pub mod constants;
pub mod error;
pub mod identity;
pub mod protocol;
pub mod state;
pub mod types;
