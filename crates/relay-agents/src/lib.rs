pub mod adapter;
pub mod error;
pub mod prompt;
pub mod sink;
pub mod supervisor;
pub mod types;

pub use adapter::*;
pub use error::*;
pub use prompt::*;
pub use sink::*;
pub use supervisor::*;
pub use types::*;
