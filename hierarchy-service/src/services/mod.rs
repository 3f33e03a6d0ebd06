pub mod audit;
pub mod cache;
pub mod cascade;
pub mod cycle;
pub mod database;
pub mod deletion;
pub mod error;
pub mod manager;
pub mod memory;
pub mod metrics;
pub mod path;
pub mod policy;
pub mod retry;
pub mod store;
pub mod tree;

pub use audit::{AuditAction, AuditRecord, AuditSink, PgAuditSink, RecordingAuditSink, TracingAuditSink};
pub use cache::{
    CacheInvalidator, CacheKey, CacheScope, NoopCacheInvalidator, RecordingCacheInvalidator,
    RedisCacheInvalidator,
};
pub use cascade::CascadeRewriter;
pub use cycle::{CycleGuard, ReparentDecision};
pub use database::{PgHierarchyStore, SqlReferenceCounter};
pub use deletion::{DeletionBlocker, DeletionCheck, DeletionGuard};
pub use error::HierarchyError;
pub use manager::{
    BatchDeleteOutcome, BatchFailure, Hierarchies, HierarchyManager, IntegrityIssue,
    IntegrityProblem, IntegrityReport, ManagerSettings, MoveOutcome, ReorderOutcome,
};
pub use memory::MemoryHierarchyStore;
pub use path::PathCodec;
pub use policy::{
    InMemoryReferences, NoReferences, NoUniqueness, ReferenceCounter, UniqueAttribute,
    UniquenessPolicy,
};
pub use retry::RetryPolicy;
pub use store::{HierarchyStore, StoreTx};
pub use tree::TreeAssembler;
