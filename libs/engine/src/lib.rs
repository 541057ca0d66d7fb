//! Stream balancer allocation engine.
//!
//! Allocates a fungible pool of weight units across named streams, grouped
//! by a configurable tag, under an overall ceiling and a per-group ceiling.
//! Every call recomputes the whole namespace from scratch:
//!
//! 1. **Ingest** validates the batch and merges it with committed state.
//! 2. **Aggregate** buckets candidates by grouping-tag value.
//! 3. **Solve** splits the overall capacity across groups, max-min fair.
//! 4. **Allocate** admits streams within each group quota by priority and
//!    water-fills the surplus.
//! 5. **Respond** reports per-stream weights and commits the new state.
//!
//! # Invariants
//!
//! After every committed call:
//!
//! - The namespace's total weight is at most `overall_capacity`.
//! - A group's total weight is at most `min(per_group_capacity, overall_capacity)`.
//! - Every active stream has `min_weight <= current_weight <= max_weight`.
//!
//! A failed call (validation or internal) commits nothing.
//!
//! # Example
//!
//! ```rust
//! use streambal_engine::{GlobalConfig, GuardConfigs, Namespace, StreamBalancer, StreamRequest};
//!
//! let balancer = StreamBalancer::new(GuardConfigs::new(GlobalConfig::new(50, 15, "customer_id")))
//!     .expect("valid config");
//! let ns = Namespace::new("my-guard", "prod");
//!
//! let resp = balancer
//!     .update_streams(
//!         &ns,
//!         &[StreamRequest::new("s1", 1, 20).with_tag("customer_id", "c1")],
//!         &[],
//!     )
//!     .expect("valid request");
//!
//! assert_eq!(resp.weight_of("s1"), 15);
//! ```

pub mod allocator;
pub mod config;
pub mod engine;
pub mod error;
pub mod group;
pub mod ingest;
pub mod response;
pub mod solver;
pub mod store;
pub mod types;

pub use config::{GlobalConfig, GuardConfigs};
pub use engine::StreamBalancer;
pub use error::{EngineError, EngineResult, FieldViolation};
pub use response::UpdateStreamsResponse;
pub use store::{Allocation, AllocationStore};
pub use types::{
    ActiveStream, AllocationStatus, GroupKey, Namespace, StreamAllocation, StreamRequest, Tag,
};
