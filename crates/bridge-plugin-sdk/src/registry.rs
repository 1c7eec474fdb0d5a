//! Callback registry: where an inbound dispatch becomes a local function call.

use async_trait::async_trait;
use bridge_core::{
    BridgeError, BridgeResult, CallbackId, CallbackService, DispatchMode, DispatchResponse,
    EventEnvelope, HandlerKind,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};

pub type HandlerFuture = Pin<Box<dyn Future<Output = BridgeResult<Option<Value>>> + Send>>;

/// A handler with its payload and result types erased to JSON.
pub type ErasedHandler = Arc<dyn Fn(Value) -> HandlerFuture + Send + Sync>;

/// Wrap a handler whose result is discarded.
pub fn notify_handler<T, F, Fut>(handler: F) -> ErasedHandler
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |payload: Value| -> HandlerFuture {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let event: T = serde_json::from_value(payload)?;
            handler(event).await;
            Ok::<Option<Value>, BridgeError>(None)
        })
    })
}

/// Wrap a handler whose result flows back to the host.
pub fn request_handler<T, R, F, Fut>(handler: F) -> ErasedHandler
where
    T: DeserializeOwned + Send + 'static,
    R: Serialize + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |payload: Value| -> HandlerFuture {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let event: T = serde_json::from_value(payload)?;
            let result = handler(event).await;
            Ok::<Option<Value>, BridgeError>(Some(serde_json::to_value(result)?))
        })
    })
}

/// Wrap a handler that can fail; its error text is reported to the host.
pub fn fallible_handler<T, F, Fut>(handler: F) -> ErasedHandler
where
    T: DeserializeOwned + Send + 'static,
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    let handler = Arc::new(handler);
    Arc::new(move |payload: Value| -> HandlerFuture {
        let handler = Arc::clone(&handler);
        Box::pin(async move {
            let event: T = serde_json::from_value(payload)?;
            handler(event)
                .await
                .map_err(|e| BridgeError::Handler(format!("{:#}", e)))?;
            Ok::<Option<Value>, BridgeError>(None)
        })
    })
}

/// Handlers of one extension process, keyed by kind and callback id.
pub struct CallbackRegistry {
    handlers: RwLock<HashMap<(HandlerKind, CallbackId), ErasedHandler>>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Store `handler` under `(kind, id)`.
    ///
    /// Ids come from a [`CallbackIdAllocator`](crate::CallbackIdAllocator), so a
    /// collision means a caller minted its own id.
    pub async fn register(&self, kind: HandlerKind, id: CallbackId, handler: ErasedHandler) {
        let mut handlers = self.handlers.write().await;
        if handlers.insert((kind.clone(), id), handler).is_some() {
            warn!(kind = %kind, callback_id = %id, "Replaced an existing handler");
        }
        debug!(kind = %kind, callback_id = %id, "Registered handler");
    }

    /// Run the handler the envelope names.
    ///
    /// A handler error or panic becomes a failed response; an unknown id
    /// becomes [`BridgeError::HandlerNotFound`]. Neither affects other handlers.
    pub async fn dispatch(&self, envelope: EventEnvelope) -> BridgeResult<DispatchResponse> {
        let handler = {
            let handlers = self.handlers.read().await;
            handlers
                .get(&(envelope.kind.clone(), envelope.callback_id))
                .cloned()
        };

        let Some(handler) = handler else {
            warn!(
                kind = %envelope.kind,
                callback_id = %envelope.callback_id,
                "Dispatch for unknown callback"
            );
            return Err(BridgeError::HandlerNotFound {
                kind: envelope.kind.label().to_string(),
                id: envelope.callback_id,
            });
        };

        let kind = envelope.kind;
        let callback_id = envelope.callback_id;

        // Run on its own task so a panicking handler cannot take the
        // dispatch endpoint down with it.
        let outcome = match tokio::spawn(handler(envelope.payload)).await {
            Ok(outcome) => outcome,
            Err(join_error) => {
                warn!(kind = %kind, callback_id = %callback_id, "Handler panicked: {}", join_error);
                return Ok(DispatchResponse::failure("handler panicked"));
            }
        };

        match outcome {
            Ok(result) => Ok(match kind.mode() {
                DispatchMode::Notify => DispatchResponse::ack(),
                DispatchMode::RequestResponse => {
                    DispatchResponse::with_payload(result.unwrap_or(Value::Null))
                }
            }),
            Err(BridgeError::Handler(message)) => {
                debug!(kind = %kind, callback_id = %callback_id, "Handler failed: {}", message);
                Ok(DispatchResponse::failure(message))
            }
            Err(e) => Err(e),
        }
    }

    pub async fn len(&self) -> usize {
        self.handlers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.handlers.read().await.is_empty()
    }

    pub async fn contains(&self, kind: &HandlerKind, id: CallbackId) -> bool {
        self.handlers
            .read()
            .await
            .contains_key(&(kind.clone(), id))
    }
}

impl Default for CallbackRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CallbackService for CallbackRegistry {
    async fn dispatch(&self, envelope: EventEnvelope) -> BridgeResult<DispatchResponse> {
        CallbackRegistry::dispatch(self, envelope).await
    }
}
