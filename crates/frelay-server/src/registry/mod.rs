//! Session registry: membership, id allocation, broadcast.

pub mod ids;
pub mod sessions;

pub use ids::{IdAllocator, IdPolicy};
pub use sessions::{BroadcastReport, SessionRegistry, DEFAULT_WRITE_TIMEOUT};
