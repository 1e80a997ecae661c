//! Non-blocking message transport. Routers maintain persistent duplex
//! connections to peers, frame length-prefixed payloads and deliver fully
//! assembled frames to registered listeners.

pub mod buffer;
pub mod channel;
pub mod frame;
pub mod router;
pub mod shared;
