//! The remote context facade an extension programs against.

use bridge_core::{
    with_timeout, BotInfo, Broadcast, BridgeError, BridgeResult, BridgeTimeouts,
    CancelMessageRequest, CallbackId, ChatEvent, CommandSpec, ContextService, FrameExitEvent,
    HandlerFilter, HandlerKind, InterworkInfo, LogLevel, LogRequest, PacketEvent, PlayerEvent,
    Priority, QqInfo, QueryKind, RegisterHandlerRequest, SayToRequest, ServerInfo,
    TriggerBroadcastRequest, WaitForInputRequest, WaitForPacketRequest, WaitResponse,
};
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::ids::CallbackIdAllocator;
use crate::registry::{
    fallible_handler, notify_handler, request_handler, CallbackRegistry, ErasedHandler,
};

/// Host capabilities as seen from inside an extension.
///
/// Registration methods allocate a [`CallbackId`], store the handler in the
/// local [`CallbackRegistry`], then ask the host to subscribe. If the host
/// refuses, the error is returned and the local handler is simply never
/// dispatched.
///
/// Snapshot queries never fail: on any error they log and return the type's
/// default value.
pub struct RemoteContext {
    plugin_name: String,
    host: Arc<dyn ContextService>,
    registry: Arc<CallbackRegistry>,
    ids: Arc<CallbackIdAllocator>,
    timeouts: BridgeTimeouts,
}

impl RemoteContext {
    pub fn new(
        plugin_name: impl Into<String>,
        host: Arc<dyn ContextService>,
        registry: Arc<CallbackRegistry>,
        ids: Arc<CallbackIdAllocator>,
        timeouts: BridgeTimeouts,
    ) -> Self {
        Self {
            plugin_name: plugin_name.into(),
            host,
            registry,
            ids,
            timeouts,
        }
    }

    pub fn registry(&self) -> &Arc<CallbackRegistry> {
        &self.registry
    }

    // ========================================================================
    // Logging
    // ========================================================================

    /// Forward a log line to the host. Delivery failures are logged locally.
    pub async fn log(&self, level: LogLevel, message: impl Into<String>) {
        let request = LogRequest {
            level,
            message: message.into(),
        };
        if let Err(e) = with_timeout(self.timeouts.rpc(), "log", self.host.log(request)).await {
            warn!(plugin = %self.plugin_name, "Failed to forward log line: {}", e);
        }
    }

    pub async fn log_info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message).await
    }

    pub async fn log_success(&self, message: impl Into<String>) {
        self.log(LogLevel::Success, message).await
    }

    pub async fn log_warning(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message).await
    }

    pub async fn log_error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message).await
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    async fn query<T: DeserializeOwned + Default>(&self, kind: QueryKind) -> T {
        let result = with_timeout(self.timeouts.rpc(), "query", self.host.query(kind))
            .await
            .and_then(|value| serde_json::from_value(value).map_err(BridgeError::from));

        match result {
            Ok(value) => value,
            Err(e) => {
                warn!(plugin = %self.plugin_name, query = ?kind, "Query failed, using default: {}", e);
                T::default()
            }
        }
    }

    /// Name the host knows this extension by. Falls back to the local name.
    pub async fn plugin_name(&self) -> String {
        let name: String = self.query(QueryKind::PluginName).await;
        if name.is_empty() {
            self.plugin_name.clone()
        } else {
            name
        }
    }

    pub async fn bot_info(&self) -> BotInfo {
        self.query(QueryKind::BotInfo).await
    }

    pub async fn server_info(&self) -> ServerInfo {
        self.query(QueryKind::ServerInfo).await
    }

    pub async fn qq_info(&self) -> QqInfo {
        self.query(QueryKind::QqInfo).await
    }

    pub async fn interwork_info(&self) -> InterworkInfo {
        self.query(QueryKind::InterworkInfo).await
    }

    // ========================================================================
    // Registration
    // ========================================================================

    async fn register(
        &self,
        kind: HandlerKind,
        priority: Priority,
        filter: HandlerFilter,
        handler: ErasedHandler,
    ) -> BridgeResult<CallbackId> {
        let callback_id = self.ids.next();
        self.registry
            .register(kind.clone(), callback_id, handler)
            .await;

        let request = RegisterHandlerRequest {
            kind: kind.clone(),
            callback_id,
            priority,
            filter,
        };
        let response = with_timeout(
            self.timeouts.rpc(),
            "register_handler",
            self.host.register_handler(request),
        )
        .await?;

        if !response.success {
            let reason = response
                .error
                .unwrap_or_else(|| "host refused registration".to_string());
            warn!(plugin = %self.plugin_name, kind = %kind, callback_id = %callback_id, "Registration rejected: {}", reason);
            return Err(BridgeError::Registration(reason));
        }

        debug!(plugin = %self.plugin_name, kind = %kind, callback_id = %callback_id, "Registered with host");
        Ok(callback_id)
    }

    /// Runs once the host has loaded every extension.
    pub async fn on_preload<F, Fut>(&self, priority: Priority, handler: F) -> BridgeResult<CallbackId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            HandlerKind::PreLoad,
            priority,
            HandlerFilter::None,
            notify_handler(move |_: Value| handler()),
        )
        .await
    }

    /// Runs once the host is connected and ready.
    pub async fn on_active<F, Fut>(&self, priority: Priority, handler: F) -> BridgeResult<CallbackId>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            HandlerKind::Active,
            priority,
            HandlerFilter::None,
            notify_handler(move |_: Value| handler()),
        )
        .await
    }

    pub async fn on_player_join<F, Fut>(
        &self,
        priority: Priority,
        handler: F,
    ) -> BridgeResult<CallbackId>
    where
        F: Fn(PlayerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            HandlerKind::PlayerJoin,
            priority,
            HandlerFilter::None,
            notify_handler(handler),
        )
        .await
    }

    pub async fn on_player_leave<F, Fut>(
        &self,
        priority: Priority,
        handler: F,
    ) -> BridgeResult<CallbackId>
    where
        F: Fn(PlayerEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            HandlerKind::PlayerLeave,
            priority,
            HandlerFilter::None,
            notify_handler(handler),
        )
        .await
    }

    /// The handler returns the event; returning it cancelled suppresses the
    /// message on the host.
    pub async fn on_chat<F, Fut>(&self, priority: Priority, handler: F) -> BridgeResult<CallbackId>
    where
        F: Fn(ChatEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ChatEvent> + Send + 'static,
    {
        self.register(
            HandlerKind::Chat,
            priority,
            HandlerFilter::None,
            request_handler(handler),
        )
        .await
    }

    pub async fn on_frame_exit<F, Fut>(
        &self,
        priority: Priority,
        handler: F,
    ) -> BridgeResult<CallbackId>
    where
        F: Fn(FrameExitEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            HandlerKind::FrameExit,
            priority,
            HandlerFilter::None,
            notify_handler(handler),
        )
        .await
    }

    /// Packets whose type id is in `ids`. An empty list is rejected by the host.
    pub async fn on_packet<F, Fut>(
        &self,
        ids: Vec<u32>,
        priority: Priority,
        handler: F,
    ) -> BridgeResult<CallbackId>
    where
        F: Fn(PacketEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            HandlerKind::Packet,
            priority,
            HandlerFilter::Packets { ids },
            notify_handler(handler),
        )
        .await
    }

    pub async fn on_packet_any<F, Fut>(
        &self,
        priority: Priority,
        handler: F,
    ) -> BridgeResult<CallbackId>
    where
        F: Fn(PacketEvent) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.register(
            HandlerKind::PacketAny,
            priority,
            HandlerFilter::None,
            notify_handler(handler),
        )
        .await
    }

    /// Answer broadcasts named `name`. The returned value becomes this
    /// handler's entry in the broadcaster's result list.
    pub async fn on_broadcast<F, Fut>(
        &self,
        name: impl Into<String>,
        priority: Priority,
        handler: F,
    ) -> BridgeResult<CallbackId>
    where
        F: Fn(Broadcast) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Value> + Send + 'static,
    {
        self.register(
            HandlerKind::broadcast(name),
            priority,
            HandlerFilter::None,
            request_handler(handler),
        )
        .await
    }

    /// Add a console command. The handler receives the arguments after the
    /// trigger; an error is shown to the console user.
    pub async fn register_console_command<F, Fut>(
        &self,
        command: CommandSpec,
        handler: F,
    ) -> BridgeResult<CallbackId>
    where
        F: Fn(Vec<String>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.register(
            HandlerKind::ConsoleCommand,
            Priority::DEFAULT,
            HandlerFilter::Command(command),
            fallible_handler(handler),
        )
        .await
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// Suppress the chat line currently being processed.
    ///
    /// Fire-and-forget: failures are logged, never returned.
    pub async fn cancel_message(&self, event: &ChatEvent) {
        let request = CancelMessageRequest {
            sender: event.sender.clone(),
            message: event.message.clone(),
        };
        if let Err(e) = with_timeout(
            self.timeouts.rpc(),
            "cancel_message",
            self.host.cancel_message(request),
        )
        .await
        {
            warn!(plugin = %self.plugin_name, "Failed to cancel message: {}", e);
        }
    }

    /// Wait for the next chat line from `player`.
    ///
    /// Returns [`BridgeError::Timeout`] if nothing arrives within `timeout`.
    pub async fn wait_message(&self, player: &str, timeout: Duration) -> BridgeResult<String> {
        let request = WaitForInputRequest {
            player: player.to_string(),
            timeout_ms: duration_ms(timeout),
        };
        let response = with_timeout(
            self.timeouts.wait_budget(timeout),
            "wait_for_input",
            self.host.wait_for_input(request),
        )
        .await?;
        into_waited(response, "wait_message")
    }

    /// Wait for the next packet with type id `packet_id`.
    pub async fn wait_packet(&self, packet_id: u32, timeout: Duration) -> BridgeResult<PacketEvent> {
        let request = WaitForPacketRequest {
            packet_id,
            timeout_ms: duration_ms(timeout),
        };
        let response = with_timeout(
            self.timeouts.wait_budget(timeout),
            "wait_for_packet",
            self.host.wait_for_packet(request),
        )
        .await?;
        into_waited(response, "wait_packet")
    }

    /// Fan `data` out to every listener of `name`, host-side and remote.
    ///
    /// Results are in the order the host ran its listeners. Any failure yields
    /// an empty list. The whole fan-out shares one budget of `broadcast_ms`
    /// plus `wait_grace_ms`, so several slow remote listeners can exhaust it.
    pub async fn broadcast(&self, name: impl Into<String>, data: Map<String, Value>) -> Vec<Value> {
        let request = TriggerBroadcastRequest {
            name: name.into(),
            data,
        };
        let budget = self.timeouts.broadcast_budget();
        match with_timeout(budget, "trigger_broadcast", self.host.trigger_broadcast(request)).await {
            Ok(results) => results,
            Err(e) => {
                warn!(plugin = %self.plugin_name, "Broadcast failed: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn say_to(&self, player: &str, message: impl Into<String>) -> BridgeResult<()> {
        let request = SayToRequest {
            player: player.to_string(),
            message: message.into(),
        };
        with_timeout(self.timeouts.rpc(), "say_to", self.host.say_to(request)).await
    }
}

fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn into_waited<T>(response: WaitResponse<T>, operation: &str) -> BridgeResult<T> {
    if response.timed_out {
        return Err(BridgeError::Timeout(
            response
                .error
                .unwrap_or_else(|| format!("{} timed out", operation)),
        ));
    }
    match (response.success, response.value) {
        (true, Some(value)) => Ok(value),
        _ => Err(BridgeError::Remote(
            response
                .error
                .unwrap_or_else(|| format!("{} returned nothing", operation)),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_core::{RegisterHandlerResponse, PlayerSnapshot};
    use serde_json::json;
    use std::sync::Mutex;

    /// Records registrations and answers queries from canned values.
    #[derive(Default)]
    struct FakeHost {
        registrations: Mutex<Vec<RegisterHandlerRequest>>,
        reject_kind: Option<HandlerKind>,
        fail_queries: bool,
        broadcast_results: Vec<Value>,
        broadcast_delay: Duration,
    }

    #[async_trait]
    impl ContextService for FakeHost {
        async fn log(&self, _request: LogRequest) -> BridgeResult<()> {
            Ok(())
        }

        async fn query(&self, kind: QueryKind) -> BridgeResult<Value> {
            if self.fail_queries {
                return Err(BridgeError::Transport("host gone".to_string()));
            }
            Ok(match kind {
                QueryKind::PluginName => json!("info"),
                QueryKind::BotInfo => json!({
                    "name": "bot",
                    "xuid": "2535",
                    "entity_unique_id": -12,
                    "entity_runtime_id": 7
                }),
                _ => json!({}),
            })
        }

        async fn register_handler(
            &self,
            request: RegisterHandlerRequest,
        ) -> BridgeResult<RegisterHandlerResponse> {
            if self.reject_kind.as_ref() == Some(&request.kind) {
                return Ok(RegisterHandlerResponse::rejected("not supported"));
            }
            self.registrations.lock().unwrap().push(request);
            Ok(RegisterHandlerResponse::accepted())
        }

        async fn cancel_message(&self, _request: CancelMessageRequest) -> BridgeResult<()> {
            Ok(())
        }

        async fn wait_for_input(
            &self,
            request: WaitForInputRequest,
        ) -> BridgeResult<WaitResponse<String>> {
            tokio::time::sleep(Duration::from_millis(request.timeout_ms)).await;
            Ok(WaitResponse::timed_out(format!(
                "no input from {}",
                request.player
            )))
        }

        async fn wait_for_packet(
            &self,
            request: WaitForPacketRequest,
        ) -> BridgeResult<WaitResponse<PacketEvent>> {
            Ok(WaitResponse::received(PacketEvent {
                id: request.packet_id,
                raw: json!({"ok": true}),
            }))
        }

        async fn trigger_broadcast(
            &self,
            _request: TriggerBroadcastRequest,
        ) -> BridgeResult<Vec<Value>> {
            tokio::time::sleep(self.broadcast_delay).await;
            Ok(self.broadcast_results.clone())
        }

        async fn say_to(&self, _request: SayToRequest) -> BridgeResult<()> {
            Ok(())
        }
    }

    fn context(host: FakeHost) -> (RemoteContext, Arc<FakeHost>) {
        context_with(host, BridgeTimeouts::default())
    }

    fn context_with(host: FakeHost, timeouts: BridgeTimeouts) -> (RemoteContext, Arc<FakeHost>) {
        let host = Arc::new(host);
        let ctx = RemoteContext::new(
            "info",
            host.clone(),
            Arc::new(CallbackRegistry::new()),
            Arc::new(CallbackIdAllocator::new()),
            timeouts,
        );
        (ctx, host)
    }

    #[tokio::test]
    async fn test_registration_allocates_increasing_ids() {
        let (ctx, host) = context(FakeHost::default());

        let a = ctx
            .on_chat(Priority(5), |event| async move { event })
            .await
            .unwrap();
        let b = ctx
            .on_packet(vec![9], Priority::DEFAULT, |_p| async {})
            .await
            .unwrap();
        let c = ctx
            .on_player_join(Priority(-1), |_e: PlayerEvent| async {})
            .await
            .unwrap();

        assert_eq!((a, b, c), (CallbackId(1), CallbackId(2), CallbackId(3)));

        let registrations = host.registrations.lock().unwrap();
        assert_eq!(registrations.len(), 3);
        assert_eq!(registrations[0].priority, Priority(5));
        assert_eq!(
            registrations[1].filter,
            HandlerFilter::Packets { ids: vec![9] }
        );
        assert!(ctx.registry().contains(&HandlerKind::Chat, a).await);
    }

    #[tokio::test]
    async fn test_rejected_registration_surfaces_error() {
        let (ctx, _host) = context(FakeHost {
            reject_kind: Some(HandlerKind::FrameExit),
            ..Default::default()
        });

        let err = ctx
            .on_frame_exit(Priority::DEFAULT, |_e| async {})
            .await
            .unwrap_err();
        assert_eq!(err, BridgeError::Registration("not supported".to_string()));

        // The orphaned local handler does not disturb later ids.
        let next = ctx.on_active(Priority::DEFAULT, || async {}).await.unwrap();
        assert_eq!(next, CallbackId(2));
    }

    #[tokio::test]
    async fn test_snapshot_queries_decode() {
        let (ctx, _host) = context(FakeHost::default());
        let bot = ctx.bot_info().await;
        assert_eq!(bot.name, "bot");
        assert_eq!(bot.entity_unique_id, -12);
        assert_eq!(ctx.plugin_name().await, "info");
    }

    #[tokio::test]
    async fn test_failed_queries_fall_back_to_default() {
        let (ctx, _host) = context(FakeHost {
            fail_queries: true,
            ..Default::default()
        });
        assert_eq!(ctx.bot_info().await, BotInfo::default());
        assert_eq!(ctx.interwork_info().await, InterworkInfo::default());
        assert_eq!(ctx.plugin_name().await, "info");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_message_timeout_is_distinguished() {
        let (ctx, _host) = context(FakeHost::default());
        let err = ctx
            .wait_message("Alice", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(err.to_string().contains("no input from Alice"));
    }

    #[tokio::test]
    async fn test_wait_packet_returns_value() {
        let (ctx, _host) = context(FakeHost::default());
        let packet = ctx.wait_packet(77, Duration::from_secs(1)).await.unwrap();
        assert_eq!(packet.id, 77);
    }

    #[tokio::test]
    async fn test_broadcast_preserves_host_order() {
        let (ctx, _host) = context(FakeHost {
            broadcast_results: vec![json!(10), json!(5), json!("five"), json!(1)],
            ..Default::default()
        });
        let results = ctx.broadcast("rank", Map::new()).await;
        assert_eq!(results, vec![json!(10), json!(5), json!("five"), json!(1)]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_broadcast_outlasting_one_listener_budget_still_returns() {
        // The host bounds each listener at `broadcast_ms`; the fan-out as a
        // whole may take longer than that.
        let timeouts = BridgeTimeouts {
            broadcast_ms: 100,
            wait_grace_ms: 100,
            ..Default::default()
        };
        let (ctx, _host) = context_with(
            FakeHost {
                broadcast_results: vec![json!("a"), json!("b")],
                broadcast_delay: Duration::from_millis(150),
                ..Default::default()
            },
            timeouts,
        );
        assert_eq!(
            ctx.broadcast("rank", Map::new()).await,
            vec![json!("a"), json!("b")]
        );

        let (ctx, _host) = context_with(
            FakeHost {
                broadcast_results: vec![json!("a")],
                broadcast_delay: Duration::from_millis(250),
                ..Default::default()
            },
            timeouts,
        );
        assert!(ctx.broadcast("rank", Map::new()).await.is_empty());
    }

    #[tokio::test]
    async fn test_unbounded_wait_does_not_overflow() {
        let (ctx, _host) = context(FakeHost::default());
        let packet = ctx.wait_packet(5, Duration::MAX).await.unwrap();
        assert_eq!(packet.id, 5);
    }

    #[test]
    fn test_into_waited_shapes() {
        assert_eq!(
            into_waited(WaitResponse::received(PlayerSnapshot::named("a")), "w")
                .unwrap()
                .name,
            "a"
        );
        assert!(matches!(
            into_waited::<String>(WaitResponse::failed("closed"), "w"),
            Err(BridgeError::Remote(_))
        ));
    }
}
