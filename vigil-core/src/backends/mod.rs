//! Built-in backend kinds.

pub mod env;
pub mod file;
pub mod statik;
