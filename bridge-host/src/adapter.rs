//! Turns an extension's registrations into real subscriptions on the hub.
//!
//! Each accepted registration becomes a forwarding closure on the
//! [`EventHub`]. When the hub fires it, the closure encodes the event, calls
//! the extension's callback registry under the kind's time budget, and applies
//! whatever came back to the local event. A failed or late call is logged and
//! the event continues as if the extension had not been there.

use async_trait::async_trait;
use bridge_core::{
    with_timeout, Broadcast, BridgeError, BridgeResult, BridgeTimeouts, CallbackId,
    CancelMessageRequest, ChatEvent, ContextService, DispatchResponse, EventEnvelope,
    FrameExitEvent, HandlerFilter, HandlerKind, LogRequest, PacketEvent, PlayerEvent, Priority,
    QueryKind, RegisterHandlerRequest, RegisterHandlerResponse, SayToRequest,
    TriggerBroadcastRequest, WaitForInputRequest, WaitForPacketRequest, WaitResponse,
};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::deferred::{DeferredRegistrationQueue, Enqueued, FlushReport, Link};
use crate::hub::{EventHub, SubscriptionId};
use crate::services::HostServices;

/// Where a registration is in its life.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// Accepted; waiting for the reverse link.
    Registered,
    /// Subscribed on the hub.
    Active,
}

#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub kind: HandlerKind,
    pub priority: Priority,
    pub filter: HandlerFilter,
    pub state: SubscriptionState,
    pub subscription: Option<SubscriptionId>,
}

type Records = Arc<RwLock<HashMap<CallbackId, SubscriptionRecord>>>;

/// Host-side end of the bridge for one extension.
pub struct HostEventAdapter {
    plugin_name: String,
    hub: Arc<EventHub>,
    services: Arc<dyn HostServices>,
    queue: DeferredRegistrationQueue,
    records: Records,
    timeouts: BridgeTimeouts,
}

impl HostEventAdapter {
    pub fn new(
        plugin_name: impl Into<String>,
        hub: Arc<EventHub>,
        services: Arc<dyn HostServices>,
        timeouts: BridgeTimeouts,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            hub,
            services,
            queue: DeferredRegistrationQueue::new(),
            records: Arc::new(RwLock::new(HashMap::new())),
            timeouts,
        }
    }

    pub fn hub(&self) -> &Arc<EventHub> {
        &self.hub
    }

    /// Set the reverse link and activate every queued registration.
    pub async fn establish_link(&self, link: Link) -> BridgeResult<FlushReport> {
        let report = self.queue.establish(link).await?;
        for (callback_id, _) in &report.failed {
            self.records
                .write()
                .unwrap_or_else(PoisonError::into_inner)
                .remove(callback_id);
        }
        info!(
            plugin = %self.plugin_name,
            "{} handlers active, {} dropped",
            report.applied.len(),
            report.failed.len()
        );
        Ok(report)
    }

    pub async fn is_linked(&self) -> bool {
        self.queue.is_live().await
    }

    pub fn subscription_state(&self, callback_id: CallbackId) -> Option<SubscriptionState> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&callback_id)
            .map(|record| record.state)
    }

    pub fn subscriptions(&self) -> Vec<(CallbackId, SubscriptionRecord)> {
        let mut records: Vec<_> = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, record)| (*id, record.clone()))
            .collect();
        records.sort_by_key(|(id, _)| *id);
        records
    }

    /// Checks that need no link: id reuse, filter shape, trigger clashes.
    /// Callers hold the write guard on `records` until the record is stored.
    fn validate(
        &self,
        records: &HashMap<CallbackId, SubscriptionRecord>,
        request: &RegisterHandlerRequest,
    ) -> Result<(), String> {
        if records.contains_key(&request.callback_id) {
            return Err(format!(
                "callback id {} is already registered",
                request.callback_id
            ));
        }

        match (&request.kind, &request.filter) {
            (HandlerKind::Packet, HandlerFilter::Packets { ids }) => {
                if ids.is_empty() {
                    return Err("packet registration needs at least one packet id".to_string());
                }
            }
            (HandlerKind::Packet, _) => {
                return Err("packet registration needs a packet id filter".to_string());
            }
            (HandlerKind::ConsoleCommand, HandlerFilter::Command(spec)) => {
                if spec.name.trim().is_empty() {
                    return Err("console command needs a name".to_string());
                }
                if spec.triggers.is_empty() || spec.triggers.iter().any(|t| t.trim().is_empty()) {
                    return Err(format!("console command '{}' needs triggers", spec.name));
                }
                if let Some(taken) = self.hub.trigger_conflict(&spec.triggers) {
                    return Err(format!("console trigger '{}' is already in use", taken));
                }
                let queued_clash = records.values().find_map(|record| match &record.filter {
                    HandlerFilter::Command(other) => spec
                        .triggers
                        .iter()
                        .find(|t| other.triggers.contains(t))
                        .cloned(),
                    _ => None,
                });
                if let Some(taken) = queued_clash {
                    return Err(format!("console trigger '{}' is already in use", taken));
                }
            }
            (HandlerKind::ConsoleCommand, _) => {
                return Err("console command registration needs command metadata".to_string());
            }
            (HandlerKind::Broadcast { name }, HandlerFilter::None) => {
                if name.trim().is_empty() {
                    return Err("broadcast registration needs a name".to_string());
                }
            }
            (kind, HandlerFilter::None) => {
                debug!(kind = %kind, "Registration has no filter");
            }
            (kind, _) => {
                return Err(format!("{} registrations take no filter", kind));
            }
        }
        Ok(())
    }

    fn mark_active(records: &Records, callback_id: CallbackId, subscription: SubscriptionId) {
        if let Some(record) = records
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .get_mut(&callback_id)
        {
            record.state = SubscriptionState::Active;
            record.subscription = Some(subscription);
        }
    }
}

// ============================================================================
// Forwarding
// ============================================================================

/// Everything a forwarding closure needs, cloned into each one.
#[derive(Clone)]
struct Forwarder {
    plugin: Arc<str>,
    link: Link,
    kind: HandlerKind,
    callback_id: CallbackId,
    budget: Duration,
}

impl Forwarder {
    /// Dispatch one occurrence. `None` means the extension could not be
    /// reached or did not answer in time; the cause is already logged.
    async fn call<T: Serialize>(&self, event: &T) -> Option<DispatchResponse> {
        let envelope = match EventEnvelope::new(self.kind.clone(), self.callback_id, event) {
            Ok(envelope) => envelope,
            Err(e) => {
                warn!(plugin = %self.plugin, kind = %self.kind, callback_id = %self.callback_id, "Failed to encode event: {}", e);
                return None;
            }
        };

        match with_timeout(self.budget, self.kind.label(), self.link.dispatch(envelope)).await {
            Ok(response) => {
                if !response.success {
                    debug!(
                        plugin = %self.plugin,
                        kind = %self.kind,
                        callback_id = %self.callback_id,
                        "Handler reported failure: {}",
                        response.error.as_deref().unwrap_or("unknown")
                    );
                }
                Some(response)
            }
            Err(e) => {
                warn!(plugin = %self.plugin, kind = %self.kind, callback_id = %self.callback_id, "Dispatch failed: {}", e);
                None
            }
        }
    }

    async fn notify<T: Serialize>(&self, event: &T) {
        self.call(event).await;
    }

    async fn chat(&self, mut event: ChatEvent) -> ChatEvent {
        if let Some(response) = self.call(&event).await {
            match response.decode::<ChatEvent>() {
                Ok(Some(returned)) if returned.cancelled => event.cancel(),
                Ok(_) => {}
                Err(e) => {
                    warn!(plugin = %self.plugin, callback_id = %self.callback_id, "Malformed chat response: {}", e)
                }
            }
        }
        event
    }

    async fn broadcast(&self, event: Broadcast) -> Option<Value> {
        let response = self.call(&event).await?;
        if response.success {
            Some(response.payload.unwrap_or(Value::Null))
        } else {
            None
        }
    }

    async fn console(&self, args: Vec<String>) -> Result<(), String> {
        match self.call(&args).await {
            Some(response) if response.success => Ok(()),
            Some(response) => Err(response
                .error
                .unwrap_or_else(|| "command failed".to_string())),
            None => Err(format!("{} did not respond", self.plugin)),
        }
    }
}

/// Subscribe one forwarding closure for `request` on `hub`.
fn subscribe(
    hub: &EventHub,
    request: &RegisterHandlerRequest,
    forwarder: Forwarder,
) -> BridgeResult<SubscriptionId> {
    let priority = request.priority;
    let id = match (&request.kind, &request.filter) {
        (HandlerKind::PreLoad, _) => hub.on_preload(priority, move |()| {
            let f = forwarder.clone();
            async move { f.notify(&()).await }
        }),
        (HandlerKind::Active, _) => hub.on_active(priority, move |()| {
            let f = forwarder.clone();
            async move { f.notify(&()).await }
        }),
        (HandlerKind::PlayerJoin, _) => hub.on_player_join(priority, move |event: PlayerEvent| {
            let f = forwarder.clone();
            async move { f.notify(&event).await }
        }),
        (HandlerKind::PlayerLeave, _) => hub.on_player_leave(priority, move |event: PlayerEvent| {
            let f = forwarder.clone();
            async move { f.notify(&event).await }
        }),
        (HandlerKind::Chat, _) => hub.on_chat(priority, move |event: ChatEvent| {
            let f = forwarder.clone();
            async move { f.chat(event).await }
        }),
        (HandlerKind::FrameExit, _) => hub.on_frame_exit(priority, move |event: FrameExitEvent| {
            let f = forwarder.clone();
            async move { f.notify(&event).await }
        }),
        (HandlerKind::Packet, HandlerFilter::Packets { ids }) => {
            hub.on_packet(ids.clone(), priority, move |packet: PacketEvent| {
                let f = forwarder.clone();
                async move { f.notify(&packet).await }
            })
        }
        (HandlerKind::PacketAny, _) => hub.on_packet_any(priority, move |packet: PacketEvent| {
            let f = forwarder.clone();
            async move { f.notify(&packet).await }
        }),
        (HandlerKind::Broadcast { name }, _) => {
            hub.on_broadcast(name, priority, move |event: Broadcast| {
                let f = forwarder.clone();
                async move { f.broadcast(event).await }
            })
        }
        (HandlerKind::ConsoleCommand, HandlerFilter::Command(spec)) => hub
            .add_console_command(spec.clone(), move |args: Vec<String>| {
                let f = forwarder.clone();
                async move { f.console(args).await }
            })
            .map_err(BridgeError::Registration)?,
        (kind, _) => {
            return Err(BridgeError::Registration(format!(
                "{} registration is missing its filter",
                kind
            )))
        }
    };
    Ok(id)
}

// ============================================================================
// Context service
// ============================================================================

#[async_trait]
impl ContextService for HostEventAdapter {
    async fn log(&self, request: LogRequest) -> BridgeResult<()> {
        self.services
            .log(&self.plugin_name, request.level, &request.message);
        Ok(())
    }

    async fn query(&self, kind: QueryKind) -> BridgeResult<Value> {
        let value = match kind {
            QueryKind::PluginName => Value::String(self.plugin_name.clone()),
            QueryKind::BotInfo => serde_json::to_value(self.services.bot_info())?,
            QueryKind::ServerInfo => serde_json::to_value(self.services.server_info())?,
            QueryKind::QqInfo => serde_json::to_value(self.services.qq_info())?,
            QueryKind::InterworkInfo => serde_json::to_value(self.services.interwork_info())?,
        };
        Ok(value)
    }

    async fn register_handler(
        &self,
        request: RegisterHandlerRequest,
    ) -> BridgeResult<RegisterHandlerResponse> {
        let callback_id = request.callback_id;
        let admitted = {
            let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
            let admitted = self.validate(&records, &request);
            if admitted.is_ok() {
                records.insert(
                    callback_id,
                    SubscriptionRecord {
                        kind: request.kind.clone(),
                        priority: request.priority,
                        filter: request.filter.clone(),
                        state: SubscriptionState::Registered,
                        subscription: None,
                    },
                );
            }
            admitted
        };
        if let Err(reason) = admitted {
            warn!(
                plugin = %self.plugin_name,
                kind = %request.kind,
                callback_id = %request.callback_id,
                "Rejected registration: {}",
                reason
            );
            return Ok(RegisterHandlerResponse::rejected(reason));
        }

        let hub = Arc::clone(&self.hub);
        let records = Arc::clone(&self.records);
        let plugin: Arc<str> = Arc::from(self.plugin_name.as_str());
        let budget = self.timeouts.for_kind(&request.kind);
        let kind = request.kind.clone();

        let register = Box::new(move |link: &Link| -> BridgeResult<()> {
            let forwarder = Forwarder {
                plugin,
                link: Arc::clone(link),
                kind: request.kind.clone(),
                callback_id,
                budget,
            };
            let subscription = subscribe(&hub, &request, forwarder)?;
            Self::mark_active(&records, callback_id, subscription);
            Ok(())
        });

        match self.queue.enqueue_or_run(callback_id, register).await {
            Ok(Enqueued::Ran) => {
                debug!(plugin = %self.plugin_name, kind = %kind, callback_id = %callback_id, "Subscribed");
                Ok(RegisterHandlerResponse::accepted())
            }
            Ok(Enqueued::Deferred { position }) => {
                debug!(plugin = %self.plugin_name, kind = %kind, callback_id = %callback_id, position, "Queued until the reverse link is up");
                Ok(RegisterHandlerResponse::accepted())
            }
            Err(e) => {
                self.records
                    .write()
                    .unwrap_or_else(PoisonError::into_inner)
                    .remove(&callback_id);
                Ok(RegisterHandlerResponse::rejected(e.to_string()))
            }
        }
    }

    async fn cancel_message(&self, request: CancelMessageRequest) -> BridgeResult<()> {
        self.hub.cancel_message(&request.sender, &request.message);
        Ok(())
    }

    async fn wait_for_input(
        &self,
        request: WaitForInputRequest,
    ) -> BridgeResult<WaitResponse<String>> {
        let timeout = Duration::from_millis(request.timeout_ms);
        Ok(match self.hub.wait_message(&request.player, timeout).await {
            Some(message) => WaitResponse::received(message),
            None => WaitResponse::timed_out(format!(
                "no input from {} within {}ms",
                request.player, request.timeout_ms
            )),
        })
    }

    async fn wait_for_packet(
        &self,
        request: WaitForPacketRequest,
    ) -> BridgeResult<WaitResponse<PacketEvent>> {
        let timeout = Duration::from_millis(request.timeout_ms);
        Ok(match self.hub.wait_packet(request.packet_id, timeout).await {
            Some(packet) => WaitResponse::received(packet),
            None => WaitResponse::timed_out(format!(
                "no packet {} within {}ms",
                request.packet_id, request.timeout_ms
            )),
        })
    }

    async fn trigger_broadcast(
        &self,
        request: TriggerBroadcastRequest,
    ) -> BridgeResult<Vec<Value>> {
        Ok(self
            .hub
            .broadcast(Broadcast::new(request.name, request.data))
            .await)
    }

    async fn say_to(&self, request: SayToRequest) -> BridgeResult<()> {
        self.services
            .say_to(&request.player, &request.message)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::IdentityConfig;
    use crate::services::StaticHostServices;
    use bridge_core::{CallbackService, CommandSpec};
    use mockall::mock;
    use serde_json::json;

    mock! {
        pub Link {}

        #[async_trait]
        impl CallbackService for Link {
            async fn dispatch(&self, envelope: EventEnvelope) -> BridgeResult<DispatchResponse>;
        }
    }

    fn adapter() -> HostEventAdapter {
        let mut timeouts = BridgeTimeouts::default();
        timeouts.chat_ms = 100;
        HostEventAdapter::new(
            "test",
            Arc::new(EventHub::new()),
            Arc::new(StaticHostServices::from_config(&IdentityConfig::default())),
            timeouts,
        )
    }

    fn request(kind: HandlerKind, id: u64, filter: HandlerFilter) -> RegisterHandlerRequest {
        RegisterHandlerRequest {
            kind,
            callback_id: CallbackId(id),
            priority: Priority::DEFAULT,
            filter,
        }
    }

    #[tokio::test]
    async fn test_registration_activates_on_link() {
        let adapter = adapter();
        let response = adapter
            .register_handler(request(HandlerKind::Chat, 1, HandlerFilter::None))
            .await
            .unwrap();
        assert!(response.success);
        assert_eq!(
            adapter.subscription_state(CallbackId(1)),
            Some(SubscriptionState::Registered)
        );
        assert_eq!(adapter.hub().chat_listener_count(), 0);

        let report = adapter
            .establish_link(Arc::new(MockLink::new()))
            .await
            .unwrap();
        assert_eq!(report.applied, vec![CallbackId(1)]);
        assert_eq!(
            adapter.subscription_state(CallbackId(1)),
            Some(SubscriptionState::Active)
        );
        assert_eq!(adapter.hub().chat_listener_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_duplicate_ids_admit_one() {
        let adapter = Arc::new(adapter());

        for id in 1..=50 {
            let tasks: Vec<_> = (0..4)
                .map(|_| {
                    let adapter = Arc::clone(&adapter);
                    tokio::spawn(async move {
                        adapter
                            .register_handler(request(HandlerKind::Chat, id, HandlerFilter::None))
                            .await
                            .unwrap()
                            .success
                    })
                })
                .collect();

            let mut accepted = 0;
            for task in tasks {
                if task.await.unwrap() {
                    accepted += 1;
                }
            }
            assert_eq!(accepted, 1, "callback id {} admitted {} times", id, accepted);
        }
        assert_eq!(adapter.subscriptions().len(), 50);

        let report = adapter
            .establish_link(Arc::new(MockLink::new()))
            .await
            .unwrap();
        assert_eq!(report.applied.len(), 50);
        assert_eq!(adapter.hub().chat_listener_count(), 50);
    }

    #[tokio::test]
    async fn test_validation_rejects_bad_registrations() {
        let adapter = adapter();
        adapter
            .register_handler(request(HandlerKind::Chat, 1, HandlerFilter::None))
            .await
            .unwrap();

        let cases = vec![
            request(HandlerKind::Chat, 1, HandlerFilter::None),
            request(HandlerKind::Packet, 2, HandlerFilter::Packets { ids: vec![] }),
            request(HandlerKind::Packet, 3, HandlerFilter::None),
            request(
                HandlerKind::ConsoleCommand,
                4,
                HandlerFilter::Command(CommandSpec::new("")),
            ),
            request(
                HandlerKind::ConsoleCommand,
                5,
                HandlerFilter::Command(CommandSpec::new("x").with_triggers(Vec::<String>::new())),
            ),
            request(HandlerKind::broadcast(""), 6, HandlerFilter::None),
            request(
                HandlerKind::Chat,
                7,
                HandlerFilter::Packets { ids: vec![1] },
            ),
        ];

        for case in cases {
            let id = case.callback_id;
            let response = adapter.register_handler(case).await.unwrap();
            assert!(!response.success, "registration {} should be rejected", id);
        }
        assert_eq!(adapter.subscriptions().len(), 1);
    }

    #[tokio::test]
    async fn test_queued_trigger_clash_is_rejected() {
        let adapter = adapter();
        let info = HandlerFilter::Command(CommandSpec::new("info"));
        assert!(
            adapter
                .register_handler(request(HandlerKind::ConsoleCommand, 1, info.clone()))
                .await
                .unwrap()
                .success
        );
        assert!(
            !adapter
                .register_handler(request(HandlerKind::ConsoleCommand, 2, info))
                .await
                .unwrap()
                .success
        );
    }

    #[tokio::test]
    async fn test_chat_cancel_applied_from_response() {
        let adapter = adapter();
        let mut link = MockLink::new();
        link.expect_dispatch().times(1).returning(|envelope| {
            let mut event: ChatEvent = envelope.decode()?;
            event.cancel();
            Ok(DispatchResponse::with_payload(serde_json::to_value(event)?))
        });
        adapter.establish_link(Arc::new(link)).await.unwrap();
        adapter
            .register_handler(request(HandlerKind::Chat, 1, HandlerFilter::None))
            .await
            .unwrap();

        let event = adapter
            .hub()
            .emit_chat(ChatEvent::new("Alice", "bad word"))
            .await;
        assert!(event.cancelled);
    }

    #[tokio::test]
    async fn test_chat_transport_failure_leaves_event_alone() {
        let adapter = adapter();
        let mut link = MockLink::new();
        link.expect_dispatch()
            .returning(|_| Err(BridgeError::Transport("connection reset".to_string())));
        adapter.establish_link(Arc::new(link)).await.unwrap();
        adapter
            .register_handler(request(HandlerKind::Chat, 1, HandlerFilter::None))
            .await
            .unwrap();

        let event = adapter.hub().emit_chat(ChatEvent::new("Alice", "hi")).await;
        assert!(!event.cancelled);
    }

    #[tokio::test]
    async fn test_broadcast_collects_successes_only() {
        let adapter = adapter();
        let mut link = MockLink::new();
        link.expect_dispatch().returning(|envelope| {
            if envelope.callback_id == CallbackId(2) {
                Ok(DispatchResponse::failure("no stock"))
            } else {
                Ok(DispatchResponse::with_payload(json!(envelope.callback_id.0)))
            }
        });
        adapter.establish_link(Arc::new(link)).await.unwrap();

        for (id, priority) in [(1, 1), (2, 10), (3, 5)] {
            let mut req = request(HandlerKind::broadcast("shop"), id, HandlerFilter::None);
            req.priority = Priority(priority);
            adapter.register_handler(req).await.unwrap();
        }

        let results = adapter
            .trigger_broadcast(TriggerBroadcastRequest {
                name: "shop".to_string(),
                data: Default::default(),
            })
            .await
            .unwrap();
        assert_eq!(results, vec![json!(3), json!(1)]);
    }

    #[tokio::test]
    async fn test_console_failure_string_is_shown() {
        let adapter = adapter();
        let mut link = MockLink::new();
        link.expect_dispatch()
            .returning(|_| Ok(DispatchResponse::failure("usage: info [player]")));
        adapter.establish_link(Arc::new(link)).await.unwrap();
        adapter
            .register_handler(request(
                HandlerKind::ConsoleCommand,
                1,
                HandlerFilter::Command(CommandSpec::new("info")),
            ))
            .await
            .unwrap();

        assert_eq!(
            adapter.hub().run_console_command("info a b").await,
            Err("usage: info [player]".to_string())
        );
    }

    #[tokio::test]
    async fn test_query_snapshots() {
        let adapter = adapter();
        assert_eq!(
            adapter.query(QueryKind::PluginName).await.unwrap(),
            json!("test")
        );
        let bot = adapter.query(QueryKind::BotInfo).await.unwrap();
        assert_eq!(bot["name"], json!(""));
    }
}
