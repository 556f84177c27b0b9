//! The browser WebSocket bridge.
//!
//! Per-session fan-out with monotonic sequence numbers, a bounded replay
//! ring, the subscribe/ack protocol, and multi-viewer semantics; plus the
//! loopback endpoint the Claude-style CLI dials back into, and the
//! permission arbiter's wiring to both backends.

pub mod hub;
pub mod ring;
pub mod ws;

pub use hub::Bridge;
pub use ring::{DEFAULT_RING_CAPACITY, EventRing};
pub use ws::{SocketKind, parse_ws_path, serve};
