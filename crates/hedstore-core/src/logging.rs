//! Structured logging conventions for hedstore.
//!
//! Both crates emit `tracing` events with the same field names so that log
//! aggregation can query merges, count updates and store lifecycle events
//! uniformly.
//!
//! ## Fields
//!
//! | Field | Meaning |
//! |-------|---------|
//! | `subsystem` | Originating subsystem: `tree`, `merge`, `store`, `db`, `counts`, `schema` |
//! | `component` | Part of a subsystem, e.g. `pool`, `lifecycle`, `tags` |
//! | `op` | Logical operation, e.g. `insert tag`, `create_store` |
//! | `pathname` | Tag pathname being operated on |
//! | `tag_id` | Tag UUID being operated on |
//! | `store` | Store (database) name |
//! | `event_code` | Code of a tagging batch event |
//! | `duration_ms` | Wall-clock duration in milliseconds |
//! | `result_count` | Rows returned or statements run |
//! | `node_count` | Nodes in a tree |
//! | `change_count` | Changes produced by a merge |
//! | `rows_updated` | Rows touched by an update |
//! | `error` | Error message of a failed operation |
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Store left partially updated, requires a re-run |
//! | WARN  | Recoverable issue (e.g. count increment matched no tag) |
//! | INFO  | Lifecycle events (create, delete, connect), merge completions |
//! | DEBUG | Decision points, per-event count updates |
//! | TRACE | Per-node iteration (tree walk, write-through) |
