//! Command handlers for the toolwire CLI.

pub mod call;
pub mod servers;
pub mod tools;

pub use call::*;
pub use servers::*;
pub use tools::*;
