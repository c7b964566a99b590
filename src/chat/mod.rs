mod broadcaster;
mod client;

pub use broadcaster::{Broadcaster, BroadcasterError, BroadcasterHandle};
pub use client::{ClientHandle, UserSocket, OUTBOUND_QUEUE_CAPACITY};
