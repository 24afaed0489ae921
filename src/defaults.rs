//! Default values for everything configurable, collected in one place so
//! the configuration layer and the CLI agree on them.

use directories::ProjectDirs;
use std::path::PathBuf;

pub const ORGANIZATION: &str = "";

pub const APPLICATION: &str = "vistore";

pub const CONFIG_FILE: &str = "vistore.json";

fn project_dirs() -> Result<ProjectDirs, anyhow::Error> {
    ProjectDirs::from("", ORGANIZATION, APPLICATION)
        .ok_or_else(|| anyhow::anyhow!("Could not open user's home directory"))
}

/// Default location of the server configuration file.
pub fn config_path() -> Result<PathBuf, anyhow::Error> {
    Ok(project_dirs()?.config_dir().join(CONFIG_FILE))
}

/// Port served to metadata clients.
pub const fn server_port() -> u16 {
    55555
}

/// Port served to query clients.
pub const fn query_port() -> u16 {
    55558
}

/// Listen backlog for the accepting socket.
pub const MAX_CONN_QUEUE: u32 = 2048;

/// Upper bound on concurrently served client connections.
pub const fn max_simultaneous_clients() -> usize {
    64
}

/// Number of pre-opened backend sessions kept in the pool.
pub const fn backend_pool_size() -> usize {
    16
}

/// Milliseconds a request may wait to open its backend transaction.
pub const fn transaction_timeout_ms() -> u64 {
    10_000
}

/// Seconds between expiration sweeps; zero disables the sweep task.
pub const fn expiration_sweep_interval() -> u64 {
    0
}

/// Automatic replication interval; zero disables replication.
pub const fn autoreplicate_interval() -> u64 {
    0
}

/// Unit for [`autoreplicate_interval`]: `s`, `m` or `h`.
pub fn autoreplication_unit() -> String {
    "s".to_string()
}

pub fn db_root_path() -> PathBuf {
    PathBuf::from("vistore_db")
}
