//! Line-delimited JSON bridge to a running coordinator.
//!
//! Each stdin line is one of `{"request": ...}`, `{"event": ...}` or
//! `{"tick": "timeTracking" | "dailyReset"}`. Every response, push,
//! redirect and notice is written to stdout as one line.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};

use cailo_core::sync::{spawn, ChannelBus, ChannelHost, Timers};
use cailo_core::{
    BlockView, Config, Coordinator, Database, HostError, Notice, Notifier, Push, Request,
    Response, TabEvent, TabHost, TabId, TabInfo, Tick,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{broadcast, mpsc};

use super::CliResult;

const BROADCAST_CAPACITY: usize = 64;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "lowercase")]
enum Input {
    Request(Request),
    Event(TabEvent),
    Tick(Tick),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
enum Output {
    Response(Response),
    Push(Push),
    TabPush { tab: TabId, push: Push },
    Redirect { tab: TabId, url: String },
    Notice(Notice),
    Error(String),
}

#[derive(Debug, Default)]
struct TabTable {
    urls: BTreeMap<TabId, String>,
    focused: Option<TabId>,
}

/// Tab table mirrored from incoming events. Redirects and notices are
/// written out for the embedding process to carry out.
#[derive(Debug, Clone)]
struct StdioTabs {
    table: Arc<Mutex<TabTable>>,
    out: mpsc::UnboundedSender<Output>,
}

impl StdioTabs {
    fn new(out: mpsc::UnboundedSender<Output>) -> Self {
        Self {
            table: Arc::new(Mutex::new(TabTable::default())),
            out,
        }
    }

    fn apply(&self, event: &TabEvent) {
        let Ok(mut table) = self.table.lock() else {
            return;
        };
        match event {
            TabEvent::Activated { tab, url } | TabEvent::WindowFocused { tab, url } => {
                table.urls.insert(*tab, url.clone());
                table.focused = Some(*tab);
            }
            TabEvent::Updated { tab, url } => {
                table.urls.insert(*tab, url.clone());
                if table.focused.is_none() {
                    table.focused = Some(*tab);
                }
            }
            TabEvent::Removed { tab } => {
                table.urls.remove(tab);
                if table.focused == Some(*tab) {
                    table.focused = None;
                }
            }
            TabEvent::BeforeNavigate { .. } => {}
        }
    }

    fn emit(&self, output: Output) {
        if self.out.send(output).is_err() {
            tracing::debug!("stdout writer closed");
        }
    }
}

impl TabHost for StdioTabs {
    fn open_tabs(&self) -> Vec<TabInfo> {
        self.table
            .lock()
            .map(|table| {
                table
                    .urls
                    .iter()
                    .map(|(id, url)| TabInfo { id: *id, url: url.clone() })
                    .collect()
            })
            .unwrap_or_default()
    }

    fn focused_tab(&self) -> Option<TabInfo> {
        let table = self.table.lock().ok()?;
        let id = table.focused?;
        table.urls.get(&id).map(|url| TabInfo { id, url: url.clone() })
    }

    fn redirect(&mut self, tab: TabId, view: &BlockView) -> Result<(), HostError> {
        let url = view.page_url();
        {
            let mut table = self
                .table
                .lock()
                .map_err(|e| HostError::Unavailable(e.to_string()))?;
            let current = table.urls.get_mut(&tab).ok_or(HostError::TabGone(tab))?;
            *current = url.clone();
        }
        self.emit(Output::Redirect { tab, url });
        Ok(())
    }
}

impl Notifier for StdioTabs {
    fn notify(&mut self, notice: &Notice) {
        self.emit(Output::Notice(notice.clone()));
    }
}

pub fn run() -> CliResult {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(serve())
}

async fn serve() -> CliResult {
    let config = Config::load()?;
    let db = Database::open()?;

    let (out, mut out_rx) = mpsc::unbounded_channel::<Output>();
    let tabs = StdioTabs::new(out.clone());
    let bus = ChannelBus::new(BROADCAST_CAPACITY);
    let host = ChannelHost::new(tabs.clone(), bus.clone());
    let coordinator = Coordinator::from_config(&config, db, host, Utc::now());

    let writer = tokio::spawn(async move {
        let mut stdout = tokio::io::stdout();
        while let Some(output) = out_rx.recv().await {
            let line = match serde_json::to_string(&output) {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode output");
                    continue;
                }
            };
            if let Err(e) = stdout.write_all(format!("{line}\n").as_bytes()).await {
                tracing::warn!(error = %e, "stdout write failed");
                break;
            }
            if let Err(e) = stdout.flush().await {
                tracing::warn!(error = %e, "stdout flush failed");
                break;
            }
        }
    });

    let mut pushes = bus.subscribe();
    let broadcast_out = out.clone();
    let forwarder = tokio::spawn(async move {
        loop {
            match pushes.recv().await {
                Ok(push) => {
                    if broadcast_out.send(Output::Push(push)).is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    tracing::warn!(missed, "push subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let (handle, task) = spawn(coordinator, Timers::new(config.tick_interval()));
    tracing::info!("serving on stdio");

    let mut attached = HashSet::new();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let input: Input = match serde_json::from_str(line) {
            Ok(input) => input,
            Err(e) => {
                tabs.emit(Output::Error(e.to_string()));
                continue;
            }
        };
        match input {
            Input::Request(request) => {
                let response = handle.request(request).await?;
                tabs.emit(Output::Response(response));
            }
            Input::Event(event) => {
                tabs.apply(&event);
                match &event {
                    TabEvent::Removed { tab } => {
                        bus.detach(*tab);
                        attached.remove(tab);
                    }
                    TabEvent::Activated { tab, .. }
                    | TabEvent::Updated { tab, .. }
                    | TabEvent::WindowFocused { tab, .. }
                    | TabEvent::BeforeNavigate { tab, .. } => {
                        if attached.insert(*tab) {
                            forward_tab(*tab, bus.attach(*tab), out.clone());
                        }
                    }
                }
                handle.tab_event(event).await?;
            }
            Input::Tick(tick) => handle.tick(tick).await?,
        }
    }

    handle.shutdown().await?;
    let coordinator = task.await?;
    drop(coordinator);
    drop(handle);
    drop(bus);
    drop(tabs);
    drop(out);
    forwarder.await?;
    writer.await?;
    Ok(())
}

fn forward_tab(tab: TabId, mut rx: mpsc::UnboundedReceiver<Push>, out: mpsc::UnboundedSender<Output>) {
    tokio::spawn(async move {
        while let Some(push) = rx.recv().await {
            if out.send(Output::TabPush { tab, push }).is_err() {
                break;
            }
        }
    });
}
