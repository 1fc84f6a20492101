//! Compliance state: verdict storage and aggregation, suppression matching
//! and the alert dedup gate.

pub mod backend;
pub mod cache;
pub mod debounce;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod query;
pub mod ranking;
pub mod store;
pub mod summary;
pub mod suppression;
pub mod table;

pub use backend::Backends;
pub use debounce::{AlertConfig, AlertDebounceGate, DebounceStore};
pub use error::ComplianceError;
pub use memory::{MemoryComplianceTable, MemoryDebounceStore};
pub use query::{
    DeleteStatus, EntireOrg, ItemSummary, OrgOverview, PageParams, Paging, PolicyResourceDetail, UpdateMetadata,
    DEFAULT_TOP_FAILING,
};
pub use ranking::{PolicySummary, ResourceSummary};
pub use store::ComplianceStore;
pub use summary::{ActiveSuppressedCount, StatusCount, StatusCountBySeverity};
pub use suppression::{is_suppressed, SuppressionSet};
pub use table::ComplianceTable;
