pub mod manager;
pub mod sweep;

pub use manager::{
    CommitOutcome, CommitStatus, ReservationRules, ReserveOutcome, SeatReservationManager,
};
pub use sweep::{run_reservation_sweeper, sweep_expired_reservations, SweepReport};
