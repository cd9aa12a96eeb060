pub mod assignment;
pub mod store;
pub mod workflow;

pub use assignment::LabRequestService;
pub use store::{InMemoryLabRequestStore, LabRequestStore, SupabaseLabRequestStore};
pub use workflow::{transition, Transition};
