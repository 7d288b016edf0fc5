pub mod instant;
pub mod missing;

// Re-export types for convenience.
pub use crate::types::instant::TimeInstant;
pub use crate::types::missing::Missing;
