//! Host platform capabilities consumed by the coordinator.
//!
//! The coordinator never talks to a browser directly. It is generic over
//! something that can enumerate and redirect tabs, show a notification and
//! deliver messages to other contexts. Tests substitute recording fakes.

use std::fmt;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::block::BlockReason;
use crate::error::{DeliveryError, HostError};
use crate::model::Domain;
use crate::sync::protocol::Push;

/// Opaque identifier of a browsing context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(pub u32);

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TabInfo {
    pub id: TabId,
    pub url: String,
}

impl TabInfo {
    pub fn new(id: u32, url: impl Into<String>) -> Self {
        Self {
            id: TabId(id),
            url: url.into(),
        }
    }
}

/// Where a blocked tab is sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockView {
    pub domain: Domain,
    /// The URL the user was trying to reach.
    pub url: String,
    pub reason: BlockReason,
}

impl BlockView {
    /// Internal URL of the block page, carrying the view as query pairs.
    pub fn page_url(&self) -> String {
        let reason = match self.reason {
            BlockReason::Hard => "blocked",
            BlockReason::QuotaExhausted => "timeout",
        };
        let mut page = match Url::parse("cailo://blocked/") {
            Ok(url) => url,
            Err(_) => return format!("cailo://blocked/?domain={}", self.domain),
        };
        page.query_pairs_mut()
            .append_pair("domain", self.domain.as_str())
            .append_pair("url", &self.url)
            .append_pair("reason", reason);
        page.into()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notice {
    pub title: String,
    pub message: String,
}

impl Notice {
    pub fn lockout(domain: &Domain, daily_limit: f64) -> Self {
        Self {
            title: "Time's up".to_string(),
            message: format!(
                "You have used all {daily_limit:.0} minutes for {domain} today. \
                 Access is blocked until tomorrow."
            ),
        }
    }
}

pub trait TabHost {
    fn open_tabs(&self) -> Vec<TabInfo>;

    /// The tab currently holding user focus, if any.
    fn focused_tab(&self) -> Option<TabInfo>;

    fn redirect(&mut self, tab: TabId, view: &BlockView) -> Result<(), HostError>;
}

pub trait Notifier {
    fn notify(&mut self, notice: &Notice);
}

/// Fire-and-forget delivery to other contexts. Errors mean the receiver is
/// not alive and are expected.
pub trait MessageBus {
    fn broadcast(&mut self, push: &Push) -> Result<(), DeliveryError>;

    fn send_to_tab(&mut self, tab: TabId, push: &Push) -> Result<(), DeliveryError>;
}

/// Everything the coordinator needs from its platform.
pub trait Host: TabHost + Notifier + MessageBus {}

impl<T: TabHost + Notifier + MessageBus> Host for T {}

/// In-memory host that records everything the coordinator asks of it.
///
/// Used by tests and by the CLI, which has no real tabs.
#[derive(Debug, Default, Clone)]
pub struct MemoryHost {
    tabs: Vec<TabInfo>,
    focused: Option<TabId>,
    pub redirects: Vec<(TabId, BlockView)>,
    pub notices: Vec<Notice>,
    pub broadcasts: Vec<Push>,
    pub sent: Vec<(TabId, Push)>,
}

impl MemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open (or replace) a tab and give it focus.
    pub fn open_tab(&mut self, id: u32, url: &str) -> TabId {
        let tab = TabId(id);
        self.tabs.retain(|t| t.id != tab);
        self.tabs.push(TabInfo::new(id, url));
        self.focused = Some(tab);
        tab
    }

    pub fn navigate(&mut self, tab: TabId, url: &str) {
        if let Some(info) = self.tabs.iter_mut().find(|t| t.id == tab) {
            info.url = url.to_string();
        }
    }

    pub fn close_tab(&mut self, tab: TabId) {
        self.tabs.retain(|t| t.id != tab);
        if self.focused == Some(tab) {
            self.focused = None;
        }
    }

    pub fn focus(&mut self, tab: Option<TabId>) {
        self.focused = tab;
    }

    pub fn tab(&self, tab: TabId) -> Option<&TabInfo> {
        self.tabs.iter().find(|t| t.id == tab)
    }

    /// Pushes delivered to `tab`, oldest first.
    pub fn sent_to(&self, tab: TabId) -> impl Iterator<Item = &Push> {
        self.sent.iter().filter(move |(t, _)| *t == tab).map(|(_, p)| p)
    }
}

impl TabHost for MemoryHost {
    fn open_tabs(&self) -> Vec<TabInfo> {
        self.tabs.clone()
    }

    fn focused_tab(&self) -> Option<TabInfo> {
        self.focused.and_then(|id| self.tab(id).cloned())
    }

    fn redirect(&mut self, tab: TabId, view: &BlockView) -> Result<(), HostError> {
        let info = self
            .tabs
            .iter_mut()
            .find(|t| t.id == tab)
            .ok_or(HostError::TabGone(tab))?;
        info.url = view.page_url();
        self.redirects.push((tab, view.clone()));
        Ok(())
    }
}

impl Notifier for MemoryHost {
    fn notify(&mut self, notice: &Notice) {
        self.notices.push(notice.clone());
    }
}

impl MessageBus for MemoryHost {
    fn broadcast(&mut self, push: &Push) -> Result<(), DeliveryError> {
        self.broadcasts.push(push.clone());
        Ok(())
    }

    fn send_to_tab(&mut self, tab: TabId, push: &Push) -> Result<(), DeliveryError> {
        if self.tab(tab).is_none() {
            return Err(DeliveryError::UnknownTab(tab));
        }
        self.sent.push((tab, push.clone()));
        Ok(())
    }
}
