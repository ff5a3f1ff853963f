// =============================================================================
// Application Identity
// =============================================================================

/// Application name in title case (for display and platform directories)
pub const APP_NAME: &str = "Arbor";

/// Application name in lowercase (for paths and identifiers)
pub const APP_NAME_LOWER: &str = "arbor";

/// Unix-style dotfile folder name
pub const APP_DOT_FOLDER: &str = ".arbor";

// =============================================================================
// Configuration Files
// =============================================================================

/// Config file name
pub const CONFIG_FILE_NAME: &str = "arbor.json";

/// Environment variable for config file path
pub const ENV_CONFIG: &str = "ARBOR_CONFIG";

// =============================================================================
// Environment Variables - Debug
// =============================================================================

/// Environment variable for debug mode
pub const ENV_DEBUG: &str = "ARBOR_DEBUG";

// =============================================================================
// Environment Variables - Server
// =============================================================================

/// Environment variable for server host
pub const ENV_HOST: &str = "ARBOR_HOST";

/// Environment variable for server port
pub const ENV_PORT: &str = "ARBOR_PORT";

/// Environment variable for log level/filter
pub const ENV_LOG: &str = "ARBOR_LOG";

// =============================================================================
// Server Defaults
// =============================================================================

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default server port
pub const DEFAULT_PORT: u16 = 5390;

// =============================================================================
// Environment Variables - Storage
// =============================================================================

/// Environment variable to override data directory
pub const ENV_DATA_DIR: &str = "ARBOR_DATA_DIR";

/// Environment variable for the storage backend (sqlite or memory)
pub const ENV_STORAGE_BACKEND: &str = "ARBOR_STORAGE";

// =============================================================================
// Authentication
// =============================================================================

/// Environment variable with accepted API keys (comma separated)
pub const ENV_API_KEYS: &str = "ARBOR_API_KEYS";

/// Header carrying the ingestion API key
pub const API_KEY_HEADER: &str = "x-api-key";

/// API key prefix
pub const API_KEY_PREFIX: &str = "arb-";

/// Random part length of generated API keys
pub const API_KEY_RANDOM_LENGTH: usize = 40;

/// Minimum accepted length for configured API keys
pub const API_KEY_MIN_LENGTH: usize = 16;

// =============================================================================
// Pricing
// =============================================================================

/// Environment variable for a local pricing table override
pub const ENV_PRICING_FILE: &str = "ARBOR_PRICING_FILE";

/// Environment variable for the flat fallback rate (USD per 1k tokens)
pub const ENV_PRICING_FALLBACK_PER_1K: &str = "ARBOR_PRICING_FALLBACK_PER_1K";

// =============================================================================
// Ingestion
// =============================================================================

/// Trace name assigned when the payload omits one
pub const DEFAULT_TRACE_NAME: &str = "unnamed-trace";

/// Allowed drift between an explicit span latency and its timestamps
pub const DEFAULT_LATENCY_TOLERANCE_MS: i64 = 5;

/// Maximum spans accepted in a single trace payload
pub const DEFAULT_MAX_SPANS_PER_TRACE: usize = 10_000;

/// Maximum serialized size of a single span input/output/attributes value
pub const MAX_SPAN_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Maximum number of tags on a trace
pub const MAX_TRACE_TAGS: usize = 64;

// =============================================================================
// SQLite Database
// =============================================================================

/// SQLite database filename
pub const SQLITE_DB_FILENAME: &str = "arbor.db";

/// SQLite connection pool max connections
pub const SQLITE_MAX_CONNECTIONS: u32 = 5;

/// SQLite busy timeout in seconds
pub const SQLITE_BUSY_TIMEOUT_SECS: u64 = 30;

/// SQLite cache size (negative = KB, so -64000 = 64MB)
pub const SQLITE_CACHE_SIZE: &str = "-64000";

/// SQLite WAL auto-checkpoint threshold (pages, ~4MB at 1000)
pub const SQLITE_WAL_AUTOCHECKPOINT: &str = "1000";

/// WAL checkpoint interval in seconds (5 minutes)
pub const SQLITE_CHECKPOINT_INTERVAL_SECS: u64 = 300;

// =============================================================================
// HTTP
// =============================================================================

/// Default request body limit
pub const DEFAULT_BODY_LIMIT: usize = 1024 * 1024;

/// Body limit for trace ingestion
pub const INGEST_BODY_LIMIT: usize = 32 * 1024 * 1024;

// =============================================================================
// Shutdown
// =============================================================================

/// Maximum time to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
