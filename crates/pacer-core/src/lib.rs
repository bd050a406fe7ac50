pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod gate;
pub mod io;
pub mod ledger;
pub mod paths;
pub mod scheduler;
pub mod store;
pub mod types;

pub use error::{PacerError, Result};
