//! Type definitions

pub mod import;
pub mod messages;
pub mod roster;
pub mod session;
pub mod upload;

pub use import::*;
pub use messages::*;
pub use roster::*;
pub use session::*;
pub use upload::*;
