pub mod availability;
pub mod lock_manager;
pub mod reaper;
pub mod reservation;
pub mod verification;

pub use availability::{AvailabilityCalculator, AvailableSlots, SlotIter};
pub use lock_manager::LockManager;
pub use reaper::LockReaper;
pub use reservation::ReservationService;
pub use verification::{StaticCodeVerifier, VerificationProvider};
