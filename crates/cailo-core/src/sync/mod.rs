//! Cross-context synchronization.
//!
//! The coordinator holds the only canonical copy of state. Page monitors and
//! the control surface hold replicas and talk to it exclusively through the
//! messages in [`protocol`].

pub mod coordinator;
pub mod monitor;
pub mod panel;
pub mod protocol;
pub mod runtime;

pub use coordinator::Coordinator;
pub use monitor::{LockoutView, PageMonitor, PageView};
pub use panel::{ControlPanel, PanelNotice, RemainingInfo, Summary, Urgency};
pub use protocol::{
    Edit, EditRequest, Push, QuotaInfo, Request, Response, StateReplica, TabEvent, Tick,
};
pub use runtime::{spawn, spawn_with_clock, ChannelBus, ChannelHost, CoordinatorHandle, Timers};
