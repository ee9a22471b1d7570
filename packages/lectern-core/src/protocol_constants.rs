//! Fixed protocol constants that should NOT be changed.
//!
//! Node ids are bookmarked by remote controllers, so the id namespace below is
//! a wire contract. Changing any of these breaks existing clients.

// ─────────────────────────────────────────────────────────────────────────────
// Application Identity
// ─────────────────────────────────────────────────────────────────────────────

/// Application name used in health responses and logs.
pub const APP_NAME: &str = "lectern";

/// Identity the server itself presents when it issues commands internally.
pub const SELF_IDENTITY: &str = "lectern";

/// HTTP header carrying the caller identity for `/api/*` routes.
pub const CALLER_HEADER: &str = "x-lectern-caller";

// ─────────────────────────────────────────────────────────────────────────────
// Browse Tree Node Ids
// ─────────────────────────────────────────────────────────────────────────────

/// Root of the browse tree.
pub const NODE_ROOT: &str = "root";

/// Chapters of the item loaded in the session; listed only while one is.
pub const NODE_NOW_PLAYING: &str = "now-playing";

/// Single most-recent in-progress item.
pub const NODE_CONTINUE: &str = "continue";

/// Recently played items, newest first.
pub const NODE_RECENT: &str = "recent";

/// Full catalog.
pub const NODE_LIBRARY: &str = "library";

/// Distinct authors.
pub const NODE_BY_AUTHOR: &str = "by-author";

/// Distinct series.
pub const NODE_BY_SERIES: &str = "by-series";

/// Prefix for a single playable item: `item:<id>`.
pub const PREFIX_ITEM: &str = "item:";

/// Prefix for a chapter of an item: `chapter:<itemId>:<index>`.
pub const PREFIX_CHAPTER: &str = "chapter:";

/// Prefix for an author grouping: `author:<name>`.
pub const PREFIX_AUTHOR: &str = "author:";

/// Prefix for a series grouping: `series:<name>`.
pub const PREFIX_SERIES: &str = "series:";

/// Prefix for empty-result placeholders: `empty:<context>`.
pub const PREFIX_EMPTY: &str = "empty:";

// ─────────────────────────────────────────────────────────────────────────────
// Catalog Shaping
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum number of search results returned to a controller.
pub const SEARCH_RESULT_LIMIT: usize = 10;

/// Maximum number of entries in the recently-played grouping.
pub const RECENT_ITEM_LIMIT: usize = 10;

// ─────────────────────────────────────────────────────────────────────────────
// Artwork
// ─────────────────────────────────────────────────────────────────────────────

/// Maximum edge length of artwork sent to controllers (pixels).
///
/// Controllers share a size-capped transport; larger bitmaps fail outright.
pub const MAX_ARTWORK_DIM: u32 = 512;

/// Hard ceiling on remote artwork downloads (bytes).
pub const MAX_ARTWORK_FETCH_BYTES: usize = 16 * 1024 * 1024;

/// Timeout for remote artwork downloads (seconds).
pub const ARTWORK_FETCH_TIMEOUT_SECS: u64 = 10;

/// JPEG quality used when re-encoding artwork.
pub const ARTWORK_JPEG_QUALITY: u8 = 85;

/// Concurrent artwork resolutions per browse response.
pub const ARTWORK_RESOLVE_CONCURRENCY: usize = 4;

/// JPEG DCT scaling bottoms out at 1/8.
pub const JPEG_MAX_DCT_SCALE: u32 = 8;

// ─────────────────────────────────────────────────────────────────────────────
// Transport Controls
// ─────────────────────────────────────────────────────────────────────────────

/// Forward skip increment for `SkipNext` (seconds).
pub const SKIP_FORWARD_SECS: u64 = 30;

/// Backward skip increment for `SkipPrevious` (seconds).
pub const SKIP_BACK_SECS: u64 = 10;

/// Position within a chapter below which "previous chapter" moves back a
/// chapter instead of restarting the current one (milliseconds).
pub const CHAPTER_RESTART_THRESHOLD_MS: u64 = 3000;

/// Minimum lead before a chapter start counts as "next" (milliseconds).
pub const NEXT_CHAPTER_LEAD_MS: u64 = 1000;

/// Playback speed bounds.
pub const MIN_PLAYBACK_SPEED: f32 = 0.5;
pub const MAX_PLAYBACK_SPEED: f32 = 3.0;

// ─────────────────────────────────────────────────────────────────────────────
// Audio Focus
// ─────────────────────────────────────────────────────────────────────────────

/// Output volume factor while ducked under a transient competing source.
pub const DUCK_VOLUME_FACTOR: f32 = 0.3;

/// Output volume factor with focus fully held.
pub const FULL_VOLUME_FACTOR: f32 = 1.0;

// ─────────────────────────────────────────────────────────────────────────────
// Session & Events
// ─────────────────────────────────────────────────────────────────────────────

/// Interval between position snapshots while playing (milliseconds).
pub const POSITION_PUBLISH_INTERVAL_MS: u64 = 1000;

/// Capacity of the session command channel.
pub const SESSION_CHANNEL_CAPACITY: usize = 64;

/// Capacity of the broadcast channel for controller events.
pub const EVENT_CHANNEL_CAPACITY: usize = 100;

/// Capacity of the engine event broadcast channel.
pub const ENGINE_EVENT_CAPACITY: usize = 32;

// ─────────────────────────────────────────────────────────────────────────────
// WebSocket
// ─────────────────────────────────────────────────────────────────────────────

/// How often the WebSocket handler checks for heartbeat timeout (seconds).
pub const WS_HEARTBEAT_CHECK_INTERVAL_SECS: u64 = 1;

/// Heartbeat timeout: close the connection after this much silence (seconds).
pub const WS_HEARTBEAT_TIMEOUT_SECS: u64 = 30;

// ─────────────────────────────────────────────────────────────────────────────
// Server
// ─────────────────────────────────────────────────────────────────────────────

/// Port range scanned when no preferred port is configured.
pub const PORT_RANGE_START: u16 = 49500;
pub const PORT_RANGE_END: u16 = 49510;
