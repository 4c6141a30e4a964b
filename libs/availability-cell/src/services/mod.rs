pub mod profile;
pub mod windows;

pub use profile::{InMemoryProfileStore, ProfileStore, SupabaseProfileStore};
pub use windows::{covers, free_intervals_on, AvailabilityWindows, SlotIter, WindowQuery};
