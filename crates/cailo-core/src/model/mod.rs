//! Data model shared by every context: rules, quota records and the
//! coordinator's canonical state.

mod domain;
mod record;
mod rule;
mod state;

pub use domain::Domain;
pub use record::QuotaRecord;
pub use rule::{BlockMode, BlockRule, Category};
pub use state::{GlobalState, QuotaMap, RepairReport};
