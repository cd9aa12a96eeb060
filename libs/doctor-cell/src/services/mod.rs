pub mod availability;
pub mod slots;
pub mod store;

pub use availability::AvailabilityService;
pub use slots::{bookable, generate_slots};
pub use store::{InMemoryProtocolStore, ProtocolStore, SupabaseProtocolStore};
