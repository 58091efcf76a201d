//! Applier core of an online, non-blocking schema-change engine: modeled
//! on gh-ost's triggerless, binlog-replay approach to altering a live
//! MySQL table. This crate owns everything from "create the ghost table"
//! through "atomically swap it into place"; the binlog streamer, the
//! throttle policy, and any CLI/operator surface live outside it.

pub mod applier;
pub mod changelog;
pub mod config;
pub mod context;
pub mod copier;
pub mod cutover;
pub mod event;
pub mod lifecycle;
pub mod rollback;
pub mod schema;
pub mod throttle;
pub mod translator;

pub use applier::DmlApplier;
pub use changelog::{write_changelog, write_state, WriteChangelogState};
pub use config::MigrationConfig;
pub use context::{ColumnOrdinalMap, ColumnValues, MigrationContext, PartitionInfo, SharedColumn, UniqueKey};
pub use copier::{ChunkResult, RowCopyIterator};
pub use cutover::CutOverCoordinator;
pub use event::{BinlogDmlEvent, DmlKind};
pub use lifecycle::{OnPreexisting, TableLifecycleManager};
pub use rollback::rename_tables_rollback;
pub use throttle::{NeverThrottle, ThrottleChecker, ThrottleReason};
pub use translator::{DmlTranslator, Statement};

pub use ghost_errors::{ApplierError, ApplierResult};
