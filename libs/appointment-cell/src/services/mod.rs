pub mod booking;
pub mod conflict;
pub mod lifecycle;
pub mod locks;

pub use booking::SchedulingService;
pub use conflict::{check_conflict, ConflictOutcome};
pub use lifecycle::{validate_transition, TransitionEffect};
pub use locks::{ResourceKey, ResourceLocks};
