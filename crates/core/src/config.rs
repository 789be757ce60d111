use std::path::PathBuf;

/// Scheduler and executor configuration loaded from environment variables.
///
/// Loaded once at startup and passed by `Arc`; there is no runtime
/// mutation. All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Global cap on concurrently RUNNING jobs (default: `4`).
    pub max_workers: usize,
    /// Cap on distinct tenants with at least one RUNNING job (default: `3`).
    pub max_active_users: usize,
    /// Tile edge length in pixels (default: `1024`).
    pub tile_size: u32,
    /// Context margin added around interior tiles, in pixels (default: `64`).
    pub tile_overlap: u32,
    /// Maximum jobs a single workflow may hold (default: `10`).
    pub max_jobs_per_workflow: usize,
    /// When false, SEGMENT_CELLS jobs use the deterministic threshold
    /// fallback instead of a registered InstanSeg implementation.
    pub enable_instanseg: bool,
    /// Root directory for uploads and per-job results (default: `uploads`).
    pub data_dir: PathBuf,
}

impl Settings {
    /// Load settings from environment variables with defaults.
    ///
    /// | Env Var                 | Default   |
    /// |-------------------------|-----------|
    /// | `MAX_WORKERS`           | `4`       |
    /// | `MAX_ACTIVE_USERS`      | `3`       |
    /// | `TILE_SIZE`             | `1024`    |
    /// | `TILE_OVERLAP`          | `64`      |
    /// | `MAX_JOBS_PER_WORKFLOW` | `10`      |
    /// | `ENABLE_INSTANTSEG`     | `false`   |
    /// | `DATA_DIR`              | `uploads` |
    pub fn from_env() -> Self {
        Self {
            max_workers: env_parse("MAX_WORKERS", 4),
            max_active_users: env_parse("MAX_ACTIVE_USERS", 3),
            tile_size: env_parse("TILE_SIZE", 1024),
            tile_overlap: env_parse("TILE_OVERLAP", 64),
            max_jobs_per_workflow: env_parse("MAX_JOBS_PER_WORKFLOW", 10),
            enable_instanseg: env_parse("ENABLE_INSTANTSEG", false),
            data_dir: std::env::var("DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("uploads")),
        }
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            max_workers: 4,
            max_active_users: 3,
            tile_size: 1024,
            tile_overlap: 64,
            max_jobs_per_workflow: 10,
            enable_instanseg: false,
            data_dir: PathBuf::from("uploads"),
        }
    }
}

/// Parse an environment variable, panicking on malformed values.
///
/// Misconfiguration should fail fast at startup rather than be silently
/// replaced by a default.
fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => raw
            .parse()
            .unwrap_or_else(|_| panic!("{key} must be a valid {}", std::any::type_name::<T>())),
        Err(_) => default,
    }
}
