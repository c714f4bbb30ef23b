/// Application name
pub const APP_NAME: &str = "Palabre";

/// Seconds a call may ring before it is marked missed.
pub const DEFAULT_RING_TIMEOUT_SECS: u64 = 45;

/// Default page size for message backfill queries.
pub const DEFAULT_PAGE_LIMIT: u32 = 50;

/// Hard cap on a single message backfill page.
pub const MAX_PAGE_LIMIT: u32 = 200;

/// Maximum text content size in bytes (8 KiB).
pub const MAX_CONTENT_BYTES: usize = 8 * 1024;

/// Maximum attachment URL length.
pub const MAX_ATTACHMENT_URL_BYTES: usize = 2048;

/// Default HTTP/WebSocket API port.
pub const DEFAULT_HTTP_PORT: u16 = 8080;
