/*!
Keeps a single configuration file alive: watch its directory, and rewrite the
file with fixed content whenever it is deleted.
*/

pub mod core;
pub mod error;
pub mod logging;

pub use crate::core::config::{GuardConfig, WatchTarget};
pub use crate::core::guard::{ActiveGuard, Guard, GuardStats};
pub use crate::error::GuardError;
