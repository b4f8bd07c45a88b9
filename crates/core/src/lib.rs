//! Frame codec, control-vocabulary payload types, and proxy-side request
//! correlation primitives shared by `camtunnel-hub` and `camtunnel-agent`.
//!
//! This crate has no transport or I/O dependency of its own: it only
//! encodes/decodes bytes and owns the in-memory bookkeeping for in-flight
//! requests. Both binaries wire it up to their own WebSocket transport.

pub mod frame;
pub mod pending;
pub mod protocol;

use std::time::Duration;

/// Default liveness timeout: a session with no received frames for this
/// long is declared dead and closed.
pub const DEFAULT_HEARTBEAT_TIMEOUT: Duration = Duration::from_secs(30);

/// Default deadline for a non-streaming request (`LIST_VIDEOS`).
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_secs(30);

/// Default chunk size the agent reads/sends per binary frame.
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;

/// Default `page_size` for `LIST_VIDEOS` when the client omits it.
pub const DEFAULT_PAGE_SIZE: u32 = 60;

/// Hard ceiling on `page_size` regardless of client request.
pub const DEFAULT_MAX_PAGE_SIZE: u32 = 500;
