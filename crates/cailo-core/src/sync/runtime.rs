//! Runs a [`Coordinator`] as a single tokio task.
//!
//! All inputs arrive through one mpsc mailbox and are handled in order.
//! The task also owns the two timers: `timeTracking` on a fixed interval
//! and `dailyReset` at the next local midnight, re-armed after each firing.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

use super::coordinator::Coordinator;
use super::protocol::{Push, Request, Response, TabEvent, Tick};
use crate::error::{CoreError, DeliveryError, HostError};
use crate::host::{BlockView, Host, MessageBus, Notice, Notifier, TabHost, TabId, TabInfo};
use crate::storage::KvStore;

const MAILBOX_CAPACITY: usize = 256;

#[derive(Debug)]
pub enum Envelope {
    Request {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    TabEvent(TabEvent),
    Tick(Tick),
    Shutdown,
}

/// Cloneable sender side of the coordinator mailbox.
#[derive(Debug, Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::Sender<Envelope>,
}

impl CoordinatorHandle {
    pub async fn request(&self, request: Request) -> Result<Response, CoreError> {
        let (reply, rx) = oneshot::channel();
        self.send(Envelope::Request { request, reply }).await?;
        rx.await.map_err(|_| CoreError::CoordinatorGone)
    }

    pub async fn tab_event(&self, event: TabEvent) -> Result<(), CoreError> {
        self.send(Envelope::TabEvent(event)).await
    }

    pub async fn tick(&self, tick: Tick) -> Result<(), CoreError> {
        self.send(Envelope::Tick(tick)).await
    }

    pub async fn shutdown(&self) -> Result<(), CoreError> {
        self.send(Envelope::Shutdown).await
    }

    async fn send(&self, envelope: Envelope) -> Result<(), CoreError> {
        self.tx
            .send(envelope)
            .await
            .map_err(|_| CoreError::CoordinatorGone)
    }
}

/// Timer configuration for [`spawn`].
#[derive(Debug, Clone, Copy)]
pub struct Timers {
    pub tracking_interval: Duration,
    /// Fire `dailyReset` at each local midnight.
    pub daily_reset: bool,
}

impl Timers {
    pub fn new(tracking_interval: Duration) -> Self {
        Self {
            tracking_interval,
            daily_reset: true,
        }
    }
}

/// Spawn the coordinator with the wall clock.
pub fn spawn<S, H>(coordinator: Coordinator<S, H>, timers: Timers) -> (CoordinatorHandle, JoinHandle<Coordinator<S, H>>)
where
    S: KvStore + Send + 'static,
    H: Host + Send + 'static,
{
    spawn_with_clock(coordinator, timers, Utc::now)
}

/// Spawn the coordinator reading time from `clock`.
///
/// The join handle yields the coordinator back once the mailbox closes or
/// a shutdown message arrives.
pub fn spawn_with_clock<S, H, C>(
    mut coordinator: Coordinator<S, H>,
    timers: Timers,
    clock: C,
) -> (CoordinatorHandle, JoinHandle<Coordinator<S, H>>)
where
    S: KvStore + Send + 'static,
    H: Host + Send + 'static,
    C: Fn() -> DateTime<Utc> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel(MAILBOX_CAPACITY);
    let task = tokio::spawn(async move {
        let mut tracking = time::interval(timers.tracking_interval);
        tracking.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        tracking.tick().await;

        loop {
            let until_reset = {
                let now = clock();
                (coordinator.scheduler().next_midnight(now) - now)
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            };
            let daily = time::sleep(until_reset);
            tokio::pin!(daily);

            tokio::select! {
                envelope = rx.recv() => match envelope {
                    Some(Envelope::Request { request, reply }) => {
                        let response = coordinator.handle_request(request, clock());
                        // Caller may have given up waiting.
                        let _ = reply.send(response);
                    }
                    Some(Envelope::TabEvent(event)) => coordinator.handle_tab_event(event, clock()),
                    Some(Envelope::Tick(tick)) => coordinator.handle_tick(tick, clock()),
                    Some(Envelope::Shutdown) | None => break,
                },
                _ = tracking.tick() => coordinator.handle_tick(Tick::UsageTracking, clock()),
                _ = &mut daily, if timers.daily_reset => coordinator.handle_tick(Tick::DailyReset, clock()),
            }
        }
        tracing::info!("coordinator stopped");
        coordinator
    });
    (CoordinatorHandle { tx }, task)
}

/// In-process [`MessageBus`] built on tokio channels.
///
/// Broadcasts fan out to every subscriber; tab pushes go to the receiver
/// attached for that tab. Clones share the same channels.
#[derive(Debug, Clone)]
pub struct ChannelBus {
    broadcast: broadcast::Sender<Push>,
    tabs: Arc<Mutex<HashMap<TabId, mpsc::UnboundedSender<Push>>>>,
}

impl ChannelBus {
    pub fn new(capacity: usize) -> Self {
        let (broadcast, _) = broadcast::channel(capacity.max(1));
        Self {
            broadcast,
            tabs: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Push> {
        self.broadcast.subscribe()
    }

    /// Attach a page monitor for `tab`, replacing any previous one.
    pub fn attach(&self, tab: TabId) -> mpsc::UnboundedReceiver<Push> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.insert(tab, tx);
        }
        rx
    }

    pub fn detach(&self, tab: TabId) {
        if let Ok(mut tabs) = self.tabs.lock() {
            tabs.remove(&tab);
        }
    }
}

impl MessageBus for ChannelBus {
    fn broadcast(&mut self, push: &Push) -> Result<(), DeliveryError> {
        self.broadcast
            .send(push.clone())
            .map(|_| ())
            .map_err(|_| DeliveryError::NoReceiver)
    }

    fn send_to_tab(&mut self, tab: TabId, push: &Push) -> Result<(), DeliveryError> {
        let tabs = self.tabs.lock().map_err(|_| DeliveryError::Closed)?;
        let sender = tabs.get(&tab).ok_or(DeliveryError::UnknownTab(tab))?;
        sender.send(push.clone()).map_err(|_| DeliveryError::Closed)
    }
}

/// Tab and notification capabilities of `T` with delivery over a
/// [`ChannelBus`].
#[derive(Debug, Clone)]
pub struct ChannelHost<T> {
    inner: T,
    bus: ChannelBus,
}

impl<T> ChannelHost<T> {
    pub fn new(inner: T, bus: ChannelBus) -> Self {
        Self { inner, bus }
    }

    pub fn inner(&self) -> &T {
        &self.inner
    }

    pub fn bus(&self) -> &ChannelBus {
        &self.bus
    }
}

impl<T: TabHost> TabHost for ChannelHost<T> {
    fn open_tabs(&self) -> Vec<TabInfo> {
        self.inner.open_tabs()
    }

    fn focused_tab(&self) -> Option<TabInfo> {
        self.inner.focused_tab()
    }

    fn redirect(&mut self, tab: TabId, view: &BlockView) -> Result<(), HostError> {
        self.inner.redirect(tab, view)
    }
}

impl<T: Notifier> Notifier for ChannelHost<T> {
    fn notify(&mut self, notice: &Notice) {
        self.inner.notify(notice);
    }
}

impl<T> MessageBus for ChannelHost<T> {
    fn broadcast(&mut self, push: &Push) -> Result<(), DeliveryError> {
        self.bus.broadcast(push)
    }

    fn send_to_tab(&mut self, tab: TabId, push: &Push) -> Result<(), DeliveryError> {
        self.bus.send_to_tab(tab, push)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_bus_routes_by_tab() {
        let mut bus = ChannelBus::new(8);
        let mut sub = bus.subscribe();
        let mut tab_rx = bus.attach(TabId(1));

        bus.broadcast(&Push::DetoxReset { count: 2 }).unwrap();
        bus.send_to_tab(TabId(1), &Push::DetoxReset { count: 3 }).unwrap();
        assert_eq!(
            bus.send_to_tab(TabId(2), &Push::DetoxReset { count: 4 }),
            Err(DeliveryError::UnknownTab(TabId(2)))
        );

        assert_eq!(sub.try_recv().unwrap(), Push::DetoxReset { count: 2 });
        assert_eq!(tab_rx.try_recv().unwrap(), Push::DetoxReset { count: 3 });

        bus.detach(TabId(1));
        assert!(bus.send_to_tab(TabId(1), &Push::DetoxReset { count: 5 }).is_err());
    }

    #[test]
    fn broadcast_without_subscribers_is_dropped() {
        let mut bus = ChannelBus::new(4);
        assert_eq!(
            bus.broadcast(&Push::DetoxReset { count: 0 }),
            Err(DeliveryError::NoReceiver)
        );
    }
}
