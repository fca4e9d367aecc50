//! ctxbus Runtime - Bus instance and broadcast router
//!
//! Every bus operation runs as one uninterrupted turn:
//! 1. Take the dispatch turn (total order across operations)
//! 2. Mutate shared state (registry, membership, listeners)
//! 3. Plan deliveries (broadcast fan-out or replay)
//! 4. Release state, invoke listener callbacks in registration order
//! 5. Record statistics
//! 6. Apply the bus calls those callbacks queued, oldest first

pub mod config;
pub mod router;
pub mod bus;
pub mod telemetry;

pub use config::*;
pub use router::*;
pub use bus::*;
pub use telemetry::*;
