pub mod indicators;
pub mod provider;


pub use indicators::*;
pub use provider::*;
