pub mod automation;
pub mod command;
pub mod error;
pub mod repo;

#[cfg(test)]
mod test_support;

pub use automation::*;
pub use command::*;
pub use error::*;
pub use repo::*;
