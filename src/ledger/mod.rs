/// Fjall-based persistence layer for schedules, buffers and message history
///
/// The ledger is an embedded LSM key-value store holding:
///
/// - Schedules and their append-only execution log
/// - Buffer configs and the forwarding rules scoped to them
/// - Received webhook messages and one forwarded row per flushed batch per rule
/// - Metadata (id sequences, last prune time)
///
/// ## Consistency
///
/// Ids are allocated from per-kind counters in `metadata` and are never reused.
/// Cascading deletes (schedule -> executions, buffer -> rules -> forwarded rows)
/// are committed as one write batch.
///
/// ## Usage
///
/// ```rust,ignore
/// use hookbox::ledger::Ledger;
///
/// let ledger = Ledger::open("data/hookbox")?;
/// let schedule = ledger.insert_schedule(fields, true)?;
/// ledger.delete_schedule(schedule.id)?;
/// ```

pub mod error;
pub mod partitions;
pub mod pruning;
pub mod records;
pub mod store;

pub use error::{LedgerError, Result};
pub use pruning::{PruneStats, RetentionPolicy};
pub use records::*;
pub use store::{Ledger, LedgerStats};
