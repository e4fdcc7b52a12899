//! CLI command implementations.

pub mod compile;
pub mod inspect;
pub mod run;
pub mod target;
