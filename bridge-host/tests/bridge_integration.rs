//! End-to-end tests: a real host adapter and a real extension talking over
//! loopback JSON-RPC.

use async_trait::async_trait;
use bridge_core::rpc::RemoteCallbackService;
use bridge_core::{
    BridgeError, BridgeTimeouts, CallbackId, CallbackService, ChannelBroker, ChatEvent,
    CommandSpec, EventEnvelope, HandlerKind, PlayerEvent, PlayerSnapshot, PluginInfo, Priority,
    ServedEndpoint, TcpBroker,
};
use bridge_host::adapter::{HostEventAdapter, SubscriptionState};
use bridge_host::client::PluginClient;
use bridge_host::config::IdentityConfig;
use bridge_host::deferred::FlushReport;
use bridge_host::hub::EventHub;
use bridge_host::services::{HostServices, StaticHostServices};
use bridge_plugin_sdk::{Plugin, PluginServer, RemoteContext};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Registers one handler of most kinds and keeps its context for the test.
#[derive(Default)]
struct TestPlugin {
    context: Mutex<Option<Arc<RemoteContext>>>,
    ids: Mutex<Vec<CallbackId>>,
}

impl TestPlugin {
    fn context(&self) -> Arc<RemoteContext> {
        self.context.lock().unwrap().clone().expect("init has run")
    }

    fn record(&self, id: CallbackId) {
        self.ids.lock().unwrap().push(id);
    }
}

#[async_trait]
impl Plugin for TestPlugin {
    fn info(&self) -> PluginInfo {
        PluginInfo {
            name: "test-plugin".to_string(),
            version: "0.0.1".to_string(),
            ..Default::default()
        }
    }

    async fn init(&self, ctx: Arc<RemoteContext>) -> anyhow::Result<()> {
        *self.context.lock().unwrap() = Some(Arc::clone(&ctx));

        self.record(
            ctx.on_chat(Priority(5), |mut event: ChatEvent| async move {
                if event.message.contains("slow") {
                    tokio::time::sleep(Duration::from_millis(500)).await;
                }
                if event.message.contains("blocked") {
                    event.cancel();
                }
                event
            })
            .await?,
        );

        for (priority, tag) in [(5, "5a"), (1, "1"), (10, "10"), (5, "5b")] {
            self.record(
                ctx.on_broadcast("order", Priority(priority), move |_| async move {
                    json!(tag)
                })
                .await?,
            );
        }

        self.record(
            ctx.register_console_command(CommandSpec::new("fail"), |_args| async {
                Err::<(), _>(anyhow::anyhow!("boom"))
            })
            .await?,
        );

        let greeter = Arc::clone(&ctx);
        self.record(
            ctx.on_player_join(Priority::DEFAULT, move |event: PlayerEvent| {
                let ctx = Arc::clone(&greeter);
                async move {
                    let name = event.player.name;
                    let _ = ctx.say_to(&name, format!("welcome {}", name)).await;
                }
            })
            .await?,
        );

        Ok(())
    }
}

struct Fixture {
    hub: Arc<EventHub>,
    adapter: Arc<HostEventAdapter>,
    services: Arc<StaticHostServices>,
    plugin: Arc<TestPlugin>,
    client: PluginClient,
    broker: Arc<TcpBroker>,
    report: FlushReport,
    _endpoint: ServedEndpoint,
}

/// Every field set, so a dropped or swapped field shows up in a snapshot.
fn identity() -> IdentityConfig {
    IdentityConfig {
        bot_name: "relay".to_string(),
        bot_xuid: "2535416409772041".to_string(),
        bot_entity_unique_id: -4294967295,
        bot_entity_runtime_id: 1_234_567,
        server_code: "48285363".to_string(),
        server_passcode_set: true,
        qq_adapter: "onebot-v11".to_string(),
        qq_ws_url: "ws://127.0.0.1:3001".to_string(),
        qq_has_access_token: true,
        linked_groups: HashMap::from([
            ("builders".to_string(), 114514),
            ("admins".to_string(), 1919810),
        ]),
    }
}

async fn start(timeouts: BridgeTimeouts) -> Fixture {
    let broker = Arc::new(TcpBroker::default());
    let plugin = Arc::new(TestPlugin::default());
    let endpoint = PluginServer::new(plugin.clone(), broker.clone())
        .serve()
        .await
        .unwrap();

    let identity = identity();
    let hub = Arc::new(EventHub::new());
    let services = Arc::new(StaticHostServices::from_config(&identity));
    let adapter = Arc::new(HostEventAdapter::new(
        "ext",
        Arc::clone(&hub),
        services.clone(),
        timeouts,
    ));

    let mut client = PluginClient::connect(&endpoint.location, broker.clone(), timeouts).unwrap();
    let report = client.init(Arc::clone(&adapter)).await.unwrap();

    Fixture {
        hub,
        adapter,
        services,
        plugin,
        client,
        broker,
        report,
        _endpoint: endpoint,
    }
}

#[tokio::test]
async fn test_registrations_made_during_init_activate_in_order() {
    let fx = start(BridgeTimeouts::default()).await;

    let ids = fx.plugin.ids.lock().unwrap().clone();
    assert_eq!(ids.len(), 7);
    assert!(ids.windows(2).all(|pair| pair[0] < pair[1]));
    assert_eq!(fx.report.applied, ids);
    assert!(fx.report.failed.is_empty());

    for id in &ids {
        assert_eq!(
            fx.adapter.subscription_state(*id),
            Some(SubscriptionState::Active)
        );
    }
    assert_eq!(fx.hub.chat_listener_count(), 1);
    assert_eq!(fx.hub.broadcast_listener_count("order"), 4);
    assert!(fx.adapter.is_linked().await);
}

#[tokio::test]
async fn test_chat_cancel_crosses_the_bridge() {
    let fx = start(BridgeTimeouts::default()).await;

    let event = fx.hub.emit_chat(ChatEvent::new("alice", "this is blocked")).await;
    assert!(event.cancelled);

    let event = fx.hub.emit_chat(ChatEvent::new("alice", "hello")).await;
    assert!(!event.cancelled);
}

#[tokio::test]
async fn test_broadcast_results_follow_priority() {
    let fx = start(BridgeTimeouts::default()).await;
    let expected = vec![json!("10"), json!("5a"), json!("5b"), json!("1")];

    let local = fx
        .hub
        .broadcast(bridge_core::Broadcast::new("order", Map::new()))
        .await;
    assert_eq!(local, expected);

    // Triggered from the extension, fanned out by the host, answered by the
    // extension again.
    let remote = fx.plugin.context().broadcast("order", Map::new()).await;
    assert_eq!(remote, expected);

    assert!(fx
        .plugin
        .context()
        .broadcast("nobody-listens", Map::new())
        .await
        .is_empty());
}

#[tokio::test]
async fn test_wait_message_times_out() {
    let fx = start(BridgeTimeouts::default()).await;
    let ctx = fx.plugin.context();

    let started = Instant::now();
    let err = ctx
        .wait_message("alice", Duration::from_millis(100))
        .await
        .unwrap_err();
    let elapsed = started.elapsed();

    assert!(matches!(err, BridgeError::Timeout(_)), "got {:?}", err);
    assert!(elapsed >= Duration::from_millis(100));
    assert!(elapsed < Duration::from_secs(2));
}

#[tokio::test]
async fn test_wait_message_receives_next_line() {
    let fx = start(BridgeTimeouts::default()).await;
    let ctx = fx.plugin.context();

    let waiter = tokio::spawn(async move { ctx.wait_message("bob", Duration::from_secs(5)).await });

    // The wait reaches the host asynchronously; keep talking until it lands.
    for _ in 0..100 {
        if waiter.is_finished() {
            break;
        }
        fx.hub.emit_chat(ChatEvent::new("alice", "not me")).await;
        fx.hub.emit_chat(ChatEvent::new("bob", "yes")).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert_eq!(waiter.await.unwrap().unwrap(), "yes");
}

#[tokio::test]
async fn test_queries_return_host_identity() {
    let fx = start(BridgeTimeouts::default()).await;
    let ctx = fx.plugin.context();

    let expected = StaticHostServices::from_config(&identity());

    assert_eq!(ctx.plugin_name().await, "ext");
    assert_eq!(ctx.bot_info().await, expected.bot_info());
    assert_eq!(ctx.server_info().await, expected.server_info());
    assert_eq!(ctx.qq_info().await, expected.qq_info());

    let interwork = ctx.interwork_info().await;
    assert_eq!(interwork, expected.interwork_info());
    assert_eq!(interwork.linked_groups.len(), 2);
    assert_eq!(interwork.linked_groups["admins"], 1919810);
}

#[tokio::test]
async fn test_console_failure_is_reported_to_the_operator() {
    let fx = start(BridgeTimeouts::default()).await;
    assert_eq!(
        fx.hub.run_console_command("fail now").await,
        Err("boom".to_string())
    );
}

#[tokio::test]
async fn test_player_join_reaches_back_into_the_host() {
    let fx = start(BridgeTimeouts::default()).await;
    fx.hub
        .emit_player_join(PlayerEvent {
            player: PlayerSnapshot::named("carol"),
        })
        .await;
    assert_eq!(
        fx.services.sent(),
        vec![("carol".to_string(), "welcome carol".to_string())]
    );
}

#[tokio::test]
async fn test_unknown_callback_id_is_reported() {
    let fx = start(BridgeTimeouts::default()).await;
    let location = fx.client.callback_endpoint().unwrap().to_string();
    let callbacks = RemoteCallbackService::new(fx.broker.dial(&location).unwrap());

    let envelope = EventEnvelope::new(HandlerKind::Chat, CallbackId(9999), &Value::Null).unwrap();
    let err = callbacks.dispatch(envelope).await.unwrap_err();
    match err {
        BridgeError::HandlerNotFound { id, .. } => assert_eq!(id, CallbackId(9999)),
        other => panic!("expected HandlerNotFound, got {:?}", other),
    }
}

#[tokio::test]
async fn test_slow_chat_handler_leaves_event_untouched() {
    let timeouts = BridgeTimeouts {
        chat_ms: 100,
        ..Default::default()
    };
    let fx = start(timeouts).await;

    let started = Instant::now();
    let event = fx
        .hub
        .emit_chat(ChatEvent::new("alice", "slow and blocked"))
        .await;
    assert!(!event.cancelled);
    assert!(started.elapsed() < Duration::from_millis(450));

    // The bridge is still usable afterwards.
    let event = fx.hub.emit_chat(ChatEvent::new("alice", "blocked")).await;
    assert!(event.cancelled);
}

#[tokio::test]
async fn test_stop_shuts_the_extension_down() {
    let mut fx = start(BridgeTimeouts::default()).await;
    fx.client.start().await.unwrap();
    fx.client.stop().await.unwrap();

    // Without a callback endpoint the extension can no longer be reached; the
    // host carries on with the event unchanged.
    let event = fx.hub.emit_chat(ChatEvent::new("alice", "blocked")).await;
    assert!(!event.cancelled);
}
