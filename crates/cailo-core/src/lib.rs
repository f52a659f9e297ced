//! cailo-core: quota engine for Cai Lo Detox.
//!
//! Each restricted domain gets a daily allowance that shrinks every day
//! until it reaches a floor. This crate computes those allowances, tracks
//! focused browsing time against them, decides when a page is blocked and
//! keeps a coordinator and its replicas in sync.
//!
//! - [`quota`]: decay curve and calendar-day rollover
//! - [`tracker`]: per-tab sessions and usage flushes
//! - [`block`]: block predicate
//! - [`sync`]: message protocol, coordinator, page monitor, control panel
//! - [`storage`]: persisted key-value store and configuration

pub mod block;
pub mod error;
pub mod host;
pub mod model;
pub mod quota;
pub mod storage;
pub mod sync;
pub mod tracker;

pub use block::{evaluate, matching_rule, resolve_host, BlockReason, Verdict};
pub use error::{
    ConfigError, CoreError, DeliveryError, EditError, HostError, StoreError, ValidationError,
};
pub use host::{BlockView, Host, MemoryHost, MessageBus, Notice, Notifier, TabHost, TabId, TabInfo};
pub use model::{BlockMode, BlockRule, Category, Domain, GlobalState, QuotaMap, QuotaRecord};
pub use quota::{DecayPolicy, QuotaScheduler};
pub use storage::{data_dir, Config, Database, KvStore, MemoryStore};
pub use sync::{
    Coordinator, CoordinatorHandle, Edit, EditRequest, Push, Request, Response, StateReplica,
    TabEvent, Tick,
};
pub use tracker::{ActiveSession, FlushReport, UsageTracker};
