//! Schema module - Data and configuration types shared by the generation core.

mod arm;
mod config;
mod data;
mod generator_run;
mod search_space;
mod trial;

pub use arm::*;
pub use config::*;
pub use data::*;
pub use generator_run::*;
pub use search_space::*;
pub use trial::*;
