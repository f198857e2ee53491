pub mod clock;
pub mod error;
pub mod handlers;
pub mod models;
pub mod router;
pub mod services;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{ReservationError, StoreError};
pub use handlers::ReservationAppState;
pub use models::*;
pub use router::reservation_routes;
pub use services::*;
pub use store::{InMemoryReservationStore, RedisReservationStore, ReservationStore};
