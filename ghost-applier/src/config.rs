//! Migration configuration. Plain data: parsing it out of
//! CLI flags or a config file is out of scope for this crate, but the struct derives `clap::Args` and `serde::Deserialize`
//! so an embedding binary can wire either source in directly, the same way
//! a similar config struct is consumed by its adapters.

use serde::{Deserialize, Serialize};

fn default_chunk_size() -> u64 {
    1000
}

fn default_max_retries() -> u32 {
    60
}

fn default_cut_over_lock_timeout_seconds() -> u64 {
    3
}

fn default_timezone() -> String {
    "+00:00".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    1000
}

/// Static configuration for one migration. Immutable once a
/// [`crate::context::MigrationContext`] is built from it.
#[derive(Clone, Debug, clap::Args, Serialize, Deserialize)]
pub struct MigrationConfig {
    #[arg(long)]
    pub database: String,

    #[arg(long)]
    pub table: String,

    #[arg(long)]
    pub alter: String,

    /// Starting row-copy chunk size. The copier does not currently
    /// auto-tune this value; an operator-facing throttler may call
    /// `MigrationContext::set_chunk_size` directly.
    #[arg(long, default_value_t = default_chunk_size())]
    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[arg(long, default_value_t = default_max_retries())]
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    #[arg(long, default_value_t = default_cut_over_lock_timeout_seconds())]
    #[serde(default = "default_cut_over_lock_timeout_seconds")]
    pub cut_over_lock_timeout_seconds: u64,

    #[arg(long, default_value_t = default_timezone())]
    #[serde(default = "default_timezone")]
    pub timezone: String,

    #[arg(long, default_value_t = default_heartbeat_interval_ms())]
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    /// Whether row-copy runs inside a transaction per chunk. When `false`,
    /// the first chunk uses `INSERT IGNORE` so a restarted copy tolerates
    /// rows already inserted by a previous attempt.
    #[arg(long, default_value_t = true)]
    #[serde(default = "default_true")]
    pub transactional_row_copy: bool,

    /// Whether the Applier tracks a net row-count delta from applied DML,
    /// for ETA estimation. Disabling this avoids the extra atomic op on
    /// the hot DML-apply path.
    #[arg(long, default_value_t = true)]
    #[serde(default = "default_true")]
    pub count_row_events: bool,

    #[arg(long)]
    #[serde(default)]
    pub initially_drop_old_table: bool,
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_with_defaults_from_minimal_json() {
        let json = r#"{"database":"shop","table":"orders","alter":"ADD COLUMN x INT"}"#;
        let config: MigrationConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.max_retries, 60);
        assert!(config.transactional_row_copy);
        assert!(config.count_row_events);
        assert!(!config.initially_drop_old_table);
    }
}
