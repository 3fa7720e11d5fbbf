pub mod clock;
pub mod config;
pub mod engine;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod retry;
pub mod store;
pub mod sweeper;
pub mod wal;

pub use engine::{BookingError, BookingService};
pub use store::{InMemoryStore, ReservationStore, StoreError, StoreTransaction};
