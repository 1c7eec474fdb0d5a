//! The host's in-process event sources.
//!
//! Every event kind keeps its listeners sorted by descending priority, ties in
//! registration order. One occurrence visits its listeners one at a time, so a
//! listener always sees the effects of the listeners before it. Independent
//! occurrences can be emitted concurrently.

use bridge_core::{
    Broadcast, ChatEvent, CommandSpec, FrameExitEvent, PacketEvent, PlayerEvent, Priority,
};
use serde_json::Value;
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// A listener for events of type `E` producing `R`.
pub type Listener<E, R> = Arc<dyn Fn(E) -> BoxFuture<R> + Send + Sync>;

/// Result of a console command. `Err` carries the text shown to the user.
pub type CommandResult = Result<(), String>;

/// Cancel marks for lines nobody emitted are dropped beyond this many.
const MAX_PENDING_CANCELS: usize = 64;

fn boxed<E, R, F, Fut>(listener: F) -> Listener<E, R>
where
    E: 'static,
    R: 'static,
    F: Fn(E) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    Arc::new(move |event: E| -> BoxFuture<R> { Box::pin(listener(event)) })
}

/// Handle for one hub subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

struct Entry<E, R> {
    id: SubscriptionId,
    priority: Priority,
    listener: Listener<E, R>,
}

struct ListenerList<E, R> {
    entries: Vec<Entry<E, R>>,
}

impl<E, R> ListenerList<E, R> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    /// Insert after every entry of greater or equal priority.
    fn insert(&mut self, entry: Entry<E, R>) {
        let position = self
            .entries
            .iter()
            .position(|existing| existing.priority < entry.priority)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, entry);
    }

    fn snapshot(&self) -> Vec<Listener<E, R>> {
        self.entries
            .iter()
            .map(|entry| Arc::clone(&entry.listener))
            .collect()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

struct ConsoleEntry {
    id: SubscriptionId,
    spec: CommandSpec,
    handler: Listener<Vec<String>, CommandResult>,
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(PoisonError::into_inner)
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(PoisonError::into_inner)
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The host's local event bus.
pub struct EventHub {
    next_id: AtomicU64,
    preload: RwLock<ListenerList<(), ()>>,
    active: RwLock<ListenerList<(), ()>>,
    player_join: RwLock<ListenerList<PlayerEvent, ()>>,
    player_leave: RwLock<ListenerList<PlayerEvent, ()>>,
    chat: RwLock<ListenerList<ChatEvent, ChatEvent>>,
    frame_exit: RwLock<ListenerList<FrameExitEvent, ()>>,
    packets: RwLock<ListenerList<PacketEvent, ()>>,
    broadcasts: RwLock<HashMap<String, ListenerList<Broadcast, Option<Value>>>>,
    commands: RwLock<Vec<ConsoleEntry>>,
    input_waiters: Mutex<HashMap<String, Vec<oneshot::Sender<String>>>>,
    packet_waiters: Mutex<HashMap<u32, Vec<oneshot::Sender<PacketEvent>>>>,
    pending_cancels: Mutex<VecDeque<(String, String)>>,
}

impl EventHub {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            preload: RwLock::new(ListenerList::new()),
            active: RwLock::new(ListenerList::new()),
            player_join: RwLock::new(ListenerList::new()),
            player_leave: RwLock::new(ListenerList::new()),
            chat: RwLock::new(ListenerList::new()),
            frame_exit: RwLock::new(ListenerList::new()),
            packets: RwLock::new(ListenerList::new()),
            broadcasts: RwLock::new(HashMap::new()),
            commands: RwLock::new(Vec::new()),
            input_waiters: Mutex::new(HashMap::new()),
            packet_waiters: Mutex::new(HashMap::new()),
            pending_cancels: Mutex::new(VecDeque::new()),
        }
    }

    fn entry<E, R>(&self, priority: Priority, listener: Listener<E, R>) -> Entry<E, R> {
        Entry {
            id: SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed)),
            priority,
            listener,
        }
    }

    fn subscribe<E, R>(
        &self,
        list: &RwLock<ListenerList<E, R>>,
        priority: Priority,
        listener: Listener<E, R>,
    ) -> SubscriptionId {
        let entry = self.entry(priority, listener);
        let id = entry.id;
        write(list).insert(entry);
        id
    }

    // ========================================================================
    // Subscriptions
    // ========================================================================

    pub fn on_preload<F, Fut>(&self, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(()) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(&self.preload, priority, boxed(listener))
    }

    pub fn on_active<F, Fut>(&self, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(()) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(&self.active, priority, boxed(listener))
    }

    pub fn on_player_join<F, Fut>(&self, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(PlayerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(&self.player_join, priority, boxed(listener))
    }

    pub fn on_player_leave<F, Fut>(&self, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(PlayerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(&self.player_leave, priority, boxed(listener))
    }

    /// The listener returns the event, possibly cancelled.
    pub fn on_chat<F, Fut>(&self, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(ChatEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChatEvent> + Send + 'static,
    {
        self.subscribe(&self.chat, priority, boxed(listener))
    }

    pub fn on_frame_exit<F, Fut>(&self, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(FrameExitEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(&self.frame_exit, priority, boxed(listener))
    }

    /// Packets whose id is in `ids`.
    pub fn on_packet<F, Fut>(&self, ids: Vec<u32>, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(PacketEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let filtered = move |packet: PacketEvent| -> BoxFuture<()> {
            if ids.contains(&packet.id) {
                Box::pin(listener(packet))
            } else {
                Box::pin(async {})
            }
        };
        self.subscribe(&self.packets, priority, Arc::new(filtered))
    }

    pub fn on_packet_any<F, Fut>(&self, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(PacketEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.subscribe(&self.packets, priority, boxed(listener))
    }

    /// `None` from the listener contributes nothing to the broadcast result.
    pub fn on_broadcast<F, Fut>(&self, name: &str, priority: Priority, listener: F) -> SubscriptionId
    where
        F: Fn(Broadcast) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Option<Value>> + Send + 'static,
    {
        let entry = self.entry(priority, boxed(listener));
        let id = entry.id;
        write(&self.broadcasts)
            .entry(name.to_string())
            .or_insert_with(ListenerList::new)
            .insert(entry);
        id
    }

    /// Add a console command. Fails if any trigger is already taken.
    pub fn add_console_command<F, Fut>(
        &self,
        spec: CommandSpec,
        handler: F,
    ) -> Result<SubscriptionId, String>
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = CommandResult> + Send + 'static,
    {
        let mut commands = write(&self.commands);
        if let Some(taken) = find_conflict(&commands, &spec.triggers) {
            return Err(format!("console trigger '{}' is already in use", taken));
        }
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        commands.push(ConsoleEntry {
            id,
            spec,
            handler: boxed(handler),
        });
        Ok(id)
    }

    /// The first of `triggers` that an existing command already answers to.
    pub fn trigger_conflict(&self, triggers: &[String]) -> Option<String> {
        find_conflict(&read(&self.commands), triggers)
    }

    pub fn console_commands(&self) -> Vec<CommandSpec> {
        read(&self.commands)
            .iter()
            .map(|entry| entry.spec.clone())
            .collect()
    }

    /// Number of listeners for chat, a common health check.
    pub fn chat_listener_count(&self) -> usize {
        read(&self.chat).len()
    }

    pub fn broadcast_listener_count(&self, name: &str) -> usize {
        read(&self.broadcasts).get(name).map_or(0, ListenerList::len)
    }

    // ========================================================================
    // Emission
    // ========================================================================

    async fn emit_all<E: Clone>(&self, list: &RwLock<ListenerList<E, ()>>, event: E) {
        let listeners = read(list).snapshot();
        for listener in listeners {
            listener(event.clone()).await;
        }
    }

    pub async fn emit_preload(&self) {
        self.emit_all(&self.preload, ()).await
    }

    pub async fn emit_active(&self) {
        self.emit_all(&self.active, ()).await
    }

    pub async fn emit_player_join(&self, event: PlayerEvent) {
        self.emit_all(&self.player_join, event).await
    }

    pub async fn emit_player_leave(&self, event: PlayerEvent) {
        self.emit_all(&self.player_leave, event).await
    }

    pub async fn emit_frame_exit(&self, event: FrameExitEvent) {
        self.emit_all(&self.frame_exit, event).await
    }

    /// Run a chat line through every listener and return it as the host
    /// should treat it.
    ///
    /// Anyone waiting on the sender's input receives the line first; the line
    /// still propagates. A cancelled line stops at the listener that
    /// cancelled it.
    pub async fn emit_chat(&self, mut event: ChatEvent) -> ChatEvent {
        self.resolve_input_waiters(&event);

        let listeners = read(&self.chat).snapshot();
        for listener in listeners {
            let returned = listener(event.clone()).await;
            if returned.cancelled {
                event.cancel();
            }
            if self.take_pending_cancel(&event) {
                event.cancel();
            }
            if event.cancelled {
                debug!(sender = %event.sender, "Chat line cancelled");
                break;
            }
        }

        if !event.cancelled && self.take_pending_cancel(&event) {
            event.cancel();
        }
        event
    }

    pub async fn emit_packet(&self, packet: PacketEvent) {
        self.resolve_packet_waiters(&packet);
        self.emit_all(&self.packets, packet).await
    }

    /// Fan a broadcast out to its listeners, collecting their answers in
    /// listener order.
    pub async fn broadcast(&self, event: Broadcast) -> Vec<Value> {
        let listeners = read(&self.broadcasts)
            .get(&event.name)
            .map(ListenerList::snapshot)
            .unwrap_or_default();

        let mut results = Vec::with_capacity(listeners.len());
        for listener in listeners {
            if let Some(value) = listener(event.clone()).await {
                results.push(value);
            }
        }
        results
    }

    /// Run one console line. The longest matching trigger wins; the words after
    /// it are the arguments.
    pub async fn run_console_command(&self, line: &str) -> CommandResult {
        let line = line.trim();
        let matched = {
            let commands = read(&self.commands);
            commands
                .iter()
                .flat_map(|entry| entry.spec.triggers.iter().map(move |t| (t, entry)))
                .filter(|(trigger, _)| {
                    line == trigger.as_str()
                        || line
                            .strip_prefix(trigger.as_str())
                            .is_some_and(|rest| rest.starts_with(char::is_whitespace))
                })
                .max_by_key(|(trigger, _)| trigger.len())
                .map(|(trigger, entry)| (trigger.len(), entry.id, Arc::clone(&entry.handler)))
        };

        let Some((trigger_len, id, handler)) = matched else {
            let word = line.split_whitespace().next().unwrap_or_default();
            return Err(format!("unknown command: {}", word));
        };

        let args = line[trigger_len..]
            .split_whitespace()
            .map(str::to_string)
            .collect();
        debug!(subscription = ?id, "Running console command");
        handler(args).await
    }

    // ========================================================================
    // Waiting
    // ========================================================================

    /// Next chat line from `player`, or `None` after `timeout`.
    pub async fn wait_message(&self, player: &str, timeout: Duration) -> Option<String> {
        let (tx, rx) = oneshot::channel();
        lock(&self.input_waiters)
            .entry(player.to_string())
            .or_default()
            .push(tx);

        let received = tokio::time::timeout(timeout, rx).await.ok().and_then(Result::ok);
        if received.is_none() {
            prune(&self.input_waiters, &player.to_string());
        }
        received
    }

    /// Next packet with type id `packet_id`, or `None` after `timeout`.
    pub async fn wait_packet(&self, packet_id: u32, timeout: Duration) -> Option<PacketEvent> {
        let (tx, rx) = oneshot::channel();
        lock(&self.packet_waiters)
            .entry(packet_id)
            .or_default()
            .push(tx);

        let received = tokio::time::timeout(timeout, rx).await.ok().and_then(Result::ok);
        if received.is_none() {
            prune(&self.packet_waiters, &packet_id);
        }
        received
    }

    fn resolve_input_waiters(&self, event: &ChatEvent) {
        let waiters = lock(&self.input_waiters).remove(&event.sender);
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(event.message.clone());
        }
    }

    fn resolve_packet_waiters(&self, packet: &PacketEvent) {
        let waiters = lock(&self.packet_waiters).remove(&packet.id);
        for waiter in waiters.into_iter().flatten() {
            let _ = waiter.send(packet.clone());
        }
    }

    // ========================================================================
    // Cancellation
    // ========================================================================

    /// Mark the line `message` from `sender` as cancelled. Applies to the
    /// matching line currently in flight, or the next one emitted.
    pub fn cancel_message(&self, sender: &str, message: &str) {
        let mut pending = lock(&self.pending_cancels);
        if pending.len() >= MAX_PENDING_CANCELS {
            warn!("Dropping stale cancel marks");
            pending.pop_front();
        }
        pending.push_back((sender.to_string(), message.to_string()));
    }

    fn take_pending_cancel(&self, event: &ChatEvent) -> bool {
        let mut pending = lock(&self.pending_cancels);
        match pending
            .iter()
            .position(|(sender, message)| *sender == event.sender && *message == event.message)
        {
            Some(index) => {
                pending.remove(index);
                true
            }
            None => false,
        }
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

fn find_conflict(commands: &[ConsoleEntry], triggers: &[String]) -> Option<String> {
    triggers
        .iter()
        .find(|trigger| {
            commands
                .iter()
                .any(|entry| entry.spec.triggers.iter().any(|taken| taken == *trigger))
        })
        .cloned()
}

fn prune<K, T>(waiters: &Mutex<HashMap<K, Vec<oneshot::Sender<T>>>>, key: &K)
where
    K: std::hash::Hash + Eq,
{
    let mut waiters = lock(waiters);
    if let Some(senders) = waiters.get_mut(key) {
        senders.retain(|sender| !sender.is_closed());
        if senders.is_empty() {
            waiters.remove(key);
        }
    }
}
