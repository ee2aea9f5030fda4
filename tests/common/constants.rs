//! Shared constants for end-to-end tests

// ============================================================================
// Upload Limits
// ============================================================================

/// Per-file limit used by test servers, small enough to exceed cheaply
pub const TEST_MAX_FILE_SIZE_BYTES: u64 = 64 * 1024;

/// Whole-request limit used by test servers
pub const TEST_MAX_REQUEST_SIZE_BYTES: usize = 1024 * 1024;

// ============================================================================
// Timing Constants
// ============================================================================

/// Maximum time to wait for server to become ready (milliseconds)
pub const SERVER_READY_TIMEOUT_MS: u64 = 5000;

/// Request timeout for HTTP client (seconds)
pub const REQUEST_TIMEOUT_SECS: u64 = 10;

/// Poll interval when waiting for server readiness (milliseconds)
pub const SERVER_READY_POLL_INTERVAL_MS: u64 = 50;
