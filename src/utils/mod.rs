pub mod command;
pub mod fs;
pub mod locker;

// Trait-based abstraction for testability
pub mod executor;

// Re-export commonly used types and traits (used by test crate)
pub use command::{CommandError, CommandOutput, CommandSpec};
pub use executor::{CommandExecutor, RealExecutor};
pub use fs::TreeSize;
pub use locker::ResourceLock;
