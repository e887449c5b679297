pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod registry;
pub mod scheduler;
pub mod series;
pub mod shutdown;
pub mod worker;

pub use engine::Engine;
pub use error::{ForgeError, Result};
pub use gateway::Gateway;
