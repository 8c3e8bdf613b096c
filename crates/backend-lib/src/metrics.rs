// ==============
// crates/backend-lib/src/metrics.rs
// ==============
//! Central place for metric keys. No recorder is installed here; the
//! embedding binary decides where they go.
pub const WS_CONNECTION: &str = "ws.connection";
pub const WS_ACTIVE: &str = "ws.active";
pub const WS_REJECTED: &str = "ws.rejected";
pub const SESSION_EVICTED: &str = "session.evicted";
pub const MESSAGE_PERSISTED: &str = "message.persisted";
pub const MESSAGE_DELIVERED: &str = "message.delivered";
pub const FRAME_REJECTED: &str = "frame.rejected";
pub const OUTBOUND_DROPPED: &str = "outbound.dropped";
pub const PUSH_OFFLINE: &str = "push.offline";
pub const PUSH_FAILED: &str = "push.failed";
