pub mod config;
pub mod tags;

pub use config::*;
pub use tags::*;
