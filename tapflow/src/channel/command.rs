//! Correlated request/response over the pub/sub transport

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use tokio::sync::{broadcast, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::channel::discovery::{self, DiscoveryOptions, HttpStreamProber, StreamProber, StreamStatus};
use crate::channel::protocol::{
    AppList, CommandKind, CommandRequest, CommandResponse, InspectResult, VisualInspectResult,
};
use crate::channel::topics::Topics;
use crate::channel::transport::{publish_json, Message, Transport};
use crate::errors::FlowError;
use crate::utils::generate_uuid;

/// Command channel options
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    pub inspect_timeout: Duration,
    pub visual_inspect_timeout: Duration,
    pub list_apps_timeout: Duration,
    pub start_stream_timeout: Duration,

    /// Age after which a remembered inspection is no longer served
    pub inspection_cache_ttl: Duration,

    pub discovery: DiscoveryOptions,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            inspect_timeout: Duration::from_secs(10),
            visual_inspect_timeout: Duration::from_secs(20),
            list_apps_timeout: Duration::from_secs(10),
            start_stream_timeout: Duration::from_secs(10),
            inspection_cache_ttl: Duration::from_secs(5),
            discovery: DiscoveryOptions::default(),
        }
    }
}

impl ChannelOptions {
    /// Watchdog window for a request kind
    pub fn timeout_for(&self, kind: CommandKind) -> Duration {
        match kind {
            CommandKind::Inspect => self.inspect_timeout,
            CommandKind::VisualInspect => self.visual_inspect_timeout,
            CommandKind::ListApps => self.list_apps_timeout,
            CommandKind::StartStream => self.start_stream_timeout,
        }
    }
}

type RequestKey = (String, CommandKind);
type Reply = Result<CommandResponse, FlowError>;

struct Pending {
    correlation_id: String,
    responder: oneshot::Sender<Reply>,
}

/// Response subscription bookkeeping.
///
/// Once opened it stays live until the caller releases it and no request is
/// outstanding.
#[derive(Default)]
struct Subscription {
    active: bool,
    /// Explicit holds taken with `acquire`
    holders: usize,
    in_flight: usize,
    /// Kept open by a plain `send` until the caller releases it
    retained: bool,
}

impl Subscription {
    fn idle(&self) -> bool {
        self.holders == 0 && self.in_flight == 0 && !self.retained
    }
}

struct CachedInspection {
    taken_at: Instant,
    result: InspectResult,
}

struct Inner {
    user_id: String,
    response_topic: String,
    transport: Arc<dyn Transport>,
    prober: Arc<dyn StreamProber>,
    options: ChannelOptions,
    pending: Mutex<HashMap<RequestKey, Pending>>,
    subscription: tokio::sync::Mutex<Subscription>,
    inspections: Mutex<HashMap<String, CachedInspection>>,
    streams: Mutex<HashMap<String, StreamStatus>>,
    closed: CancellationToken,
    dispatcher: Mutex<Option<JoinHandle<()>>>,
}

/// Request/response channel to device agents on behalf of one user.
///
/// At most one request per `(device, kind)` is in flight; responses arrive
/// on the user's response topic and are matched back to that slot.
#[derive(Clone)]
pub struct CommandChannel {
    inner: Arc<Inner>,
}

impl CommandChannel {
    /// Open a channel for `user_id` and start dispatching responses
    pub fn open(user_id: &str, transport: Arc<dyn Transport>, options: ChannelOptions) -> Self {
        let prober = Arc::new(HttpStreamProber::new(options.discovery.frame_path.clone()));
        Self::open_with_prober(user_id, transport, prober, options)
    }

    pub fn open_with_prober(
        user_id: &str,
        transport: Arc<dyn Transport>,
        prober: Arc<dyn StreamProber>,
        options: ChannelOptions,
    ) -> Self {
        // subscribe to the bus before any topic subscription exists so no response is missed
        let messages = transport.messages();

        let inner = Arc::new(Inner {
            user_id: user_id.to_string(),
            response_topic: Topics::user_responses(user_id),
            transport,
            prober,
            options,
            pending: Mutex::new(HashMap::new()),
            subscription: tokio::sync::Mutex::new(Subscription::default()),
            inspections: Mutex::new(HashMap::new()),
            streams: Mutex::new(HashMap::new()),
            closed: CancellationToken::new(),
            dispatcher: Mutex::new(None),
        });

        let handle = tokio::spawn(dispatch(inner.clone(), messages));
        if let Ok(mut dispatcher) = inner.dispatcher.lock() {
            *dispatcher = Some(handle);
        }

        info!("Command channel opened for user {}", user_id);
        Self { inner }
    }

    pub fn user_id(&self) -> &str {
        &self.inner.user_id
    }

    pub fn options(&self) -> &ChannelOptions {
        &self.inner.options
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.is_cancelled()
    }

    /// Reject everything in flight, drop the response subscription and stop dispatching
    pub async fn close(&self) {
        if self.inner.closed.is_cancelled() {
            return;
        }
        self.inner.closed.cancel();

        let drained: Vec<(RequestKey, Pending)> = match self.inner.pending.lock() {
            Ok(mut pending) => pending.drain().collect(),
            Err(_) => Vec::new(),
        };
        for ((device_id, kind), slot) in drained {
            let _ = slot.responder.send(Err(FlowError::Cancelled(format!(
                "channel closed while {} for {} was in flight",
                kind, device_id
            ))));
        }

        {
            let mut subscription = self.inner.subscription.lock().await;
            if subscription.active {
                if let Err(e) = self.inner.transport.unsubscribe(&self.inner.response_topic).await {
                    warn!("Failed to unsubscribe from {}: {}", self.inner.response_topic, e);
                }
                subscription.active = false;
            }
            subscription.holders = 0;
            subscription.in_flight = 0;
            subscription.retained = false;
        }

        let handle = self.inner.dispatcher.lock().ok().and_then(|mut d| d.take());
        if let Some(handle) = handle {
            let _ = handle.await;
        }

        info!("Command channel closed for user {}", self.inner.user_id);
    }

    // =============================== SUBSCRIPTION ================================== //

    /// Hold the response subscription open across requests
    pub async fn acquire(&self) -> Result<(), FlowError> {
        acquire(&self.inner).await
    }

    /// Unsubscribe from responses.
    ///
    /// Drops a hold taken with [`CommandChannel::acquire`] and the retention left
    /// by earlier requests. The topic is torn down once the last hold is gone and
    /// every outstanding request has finished.
    pub async fn release(&self) -> Result<(), FlowError> {
        release(&self.inner).await
    }

    /// Whether the response subscription is currently live
    pub async fn is_subscribed(&self) -> bool {
        self.inner.subscription.lock().await.active
    }

    // =============================== REQUESTS ================================== //

    /// Send a request and await its correlated response
    pub async fn send(
        &self,
        kind: CommandKind,
        device_id: &str,
        params: Value,
    ) -> Result<CommandResponse, FlowError> {
        self.request(kind, device_id, params, None, &CancellationToken::new())
            .await
    }

    /// Send a request that aborts as soon as `cancel` fires
    pub async fn send_cancellable(
        &self,
        kind: CommandKind,
        device_id: &str,
        params: Value,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, FlowError> {
        self.request(kind, device_id, params, None, cancel).await
    }

    /// Send a request with an optional watchdog override
    pub async fn request(
        &self,
        kind: CommandKind,
        device_id: &str,
        params: Value,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, FlowError> {
        let Reservation { slot, reply } = self.reserve(kind, device_id)?;
        let result = self
            .perform(&slot, reply, kind, device_id, params, timeout, cancel)
            .await;
        drop(slot);
        result
    }

    /// Claim the `(device, kind)` slot or fail with `Busy`
    fn reserve(&self, kind: CommandKind, device_id: &str) -> Result<Reservation<'_>, FlowError> {
        if self.is_closed() {
            return Err(FlowError::Cancelled("command channel is closed".to_string()));
        }

        let key = (device_id.to_string(), kind);
        let correlation_id = generate_uuid();
        let (responder, reply) = oneshot::channel();

        let mut pending = self
            .inner
            .pending
            .lock()
            .map_err(|e| FlowError::Internal(e.to_string()))?;
        if pending.contains_key(&key) {
            return Err(FlowError::Busy {
                device_id: device_id.to_string(),
                kind,
            });
        }
        pending.insert(
            key.clone(),
            Pending {
                correlation_id: correlation_id.clone(),
                responder,
            },
        );

        Ok(Reservation {
            slot: SlotGuard {
                inner: &self.inner,
                key,
                correlation_id,
            },
            reply,
        })
    }

    /// Publish a reserved request and await its response
    #[allow(clippy::too_many_arguments)]
    async fn perform(
        &self,
        slot: &SlotGuard<'_>,
        reply: oneshot::Receiver<Reply>,
        kind: CommandKind,
        device_id: &str,
        params: Value,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<CommandResponse, FlowError> {
        begin_request(&self.inner).await?;
        let hold = HoldGuard {
            inner: Some(self.inner.clone()),
        };

        let timeout = timeout.unwrap_or_else(|| self.inner.options.timeout_for(kind));
        let result = self
            .exchange(
                kind,
                device_id,
                params,
                slot.correlation_id.clone(),
                reply,
                timeout,
                cancel,
            )
            .await;

        hold.finish().await;

        let response = result?;
        if !response.success {
            let message = response
                .message
                .clone()
                .unwrap_or_else(|| format!("device {} failed {}", device_id, kind));
            return Err(FlowError::RemoteError(message));
        }
        Ok(response)
    }

    #[allow(clippy::too_many_arguments)]
    async fn exchange(
        &self,
        kind: CommandKind,
        device_id: &str,
        params: Value,
        correlation_id: String,
        reply: oneshot::Receiver<Reply>,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Reply {
        let request = CommandRequest {
            correlation_id,
            device_id: device_id.to_string(),
            kind,
            params,
            reply_to: self.inner.response_topic.clone(),
        };
        publish_json(
            self.inner.transport.as_ref(),
            &Topics::device_command(device_id),
            &request,
        )
        .await?;
        debug!("Sent {} request {} to device {}", kind, request.correlation_id, device_id);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                Err(FlowError::Cancelled(format!("{} for device {} cancelled", kind, device_id)))
            }
            _ = self.inner.closed.cancelled() => {
                Err(FlowError::Cancelled("command channel is closed".to_string()))
            }
            outcome = tokio::time::timeout(timeout, reply) => match outcome {
                Ok(Ok(reply)) => reply,
                Ok(Err(_)) => Err(FlowError::Cancelled(format!(
                    "{} for device {} was abandoned",
                    kind, device_id
                ))),
                Err(_) => {
                    warn!("{} for device {} timed out after {:?}", kind, device_id, timeout);
                    Err(FlowError::Timeout(format!(
                        "no {} response from device {} within {}ms",
                        kind,
                        device_id,
                        timeout.as_millis()
                    )))
                }
            }
        }
    }

    /// Reject every in-flight request for `device_id` with `Cancelled`
    pub fn cancel_device(&self, device_id: &str) -> usize {
        let cancelled: Vec<(RequestKey, Pending)> = match self.inner.pending.lock() {
            Ok(mut pending) => {
                let keys: Vec<RequestKey> = pending
                    .keys()
                    .filter(|(device, _)| device == device_id)
                    .cloned()
                    .collect();
                keys.into_iter()
                    .filter_map(|k| pending.remove(&k).map(|p| (k, p)))
                    .collect()
            }
            Err(_) => Vec::new(),
        };

        let count = cancelled.len();
        for ((device, kind), slot) in cancelled {
            let _ = slot.responder.send(Err(FlowError::Cancelled(format!(
                "{} for device {} cancelled by caller",
                kind, device
            ))));
        }
        if count > 0 {
            info!("Cancelled {} in-flight request(s) for device {}", count, device_id);
        }
        count
    }

    /// Number of requests currently awaiting a response
    pub fn in_flight(&self) -> usize {
        self.inner.pending.lock().map(|p| p.len()).unwrap_or(0)
    }

    // =============================== TYPED HELPERS ================================== //

    pub async fn inspect(
        &self,
        device_id: &str,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<InspectResult, FlowError> {
        let response = self
            .request(CommandKind::Inspect, device_id, json!({}), timeout, cancel)
            .await?;
        let result: InspectResult = response.payload()?;

        if let Ok(mut inspections) = self.inner.inspections.lock() {
            inspections.insert(
                device_id.to_string(),
                CachedInspection {
                    taken_at: Instant::now(),
                    result: result.clone(),
                },
            );
        }
        Ok(result)
    }

    /// Latest inspection of `device_id` if it is younger than the cache TTL
    pub fn cached_inspection(&self, device_id: &str) -> Option<InspectResult> {
        let inspections = self.inner.inspections.lock().ok()?;
        let cached = inspections.get(device_id)?;
        if cached.taken_at.elapsed() <= self.inner.options.inspection_cache_ttl {
            Some(cached.result.clone())
        } else {
            None
        }
    }

    pub async fn visual_inspect(
        &self,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> Result<VisualInspectResult, FlowError> {
        let response = self
            .request(CommandKind::VisualInspect, device_id, json!({}), None, cancel)
            .await?;
        response.payload()
    }

    pub async fn list_apps(
        &self,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> Result<AppList, FlowError> {
        let response = self
            .request(CommandKind::ListApps, device_id, json!({}), None, cancel)
            .await?;
        response.payload()
    }

    /// Ask the device to start its stream server, then discover the endpoint
    pub async fn start_stream(
        &self,
        device_id: &str,
        cancel: &CancellationToken,
    ) -> Result<String, FlowError> {
        let Reservation { slot, reply } = self.reserve(CommandKind::StartStream, device_id)?;
        self.begin_discovery(device_id)?;

        let started = self
            .perform(
                &slot,
                reply,
                CommandKind::StartStream,
                device_id,
                json!({}),
                None,
                cancel,
            )
            .await;
        drop(slot);
        if let Err(e) = started {
            self.set_stream_status(device_id, StreamStatus::Idle);
            return Err(e);
        }

        let discovery = &self.inner.options.discovery;
        let candidates = discovery.candidate_urls(device_id);
        match discovery::discover(
            self.inner.prober.as_ref(),
            &candidates,
            discovery.probe_timeout,
            cancel,
        )
        .await
        {
            Ok(base_url) => {
                self.set_stream_status(
                    device_id,
                    StreamStatus::Active {
                        base_url: base_url.clone(),
                    },
                );
                Ok(base_url)
            }
            Err(e @ FlowError::NotFound(_)) => {
                warn!("No stream endpoint found for device {}", device_id);
                self.set_stream_status(device_id, StreamStatus::NotFound);
                Err(e)
            }
            Err(e) => {
                self.set_stream_status(device_id, StreamStatus::Idle);
                Err(e)
            }
        }
    }

    pub fn stream_status(&self, device_id: &str) -> StreamStatus {
        self.inner
            .streams
            .lock()
            .ok()
            .and_then(|s| s.get(device_id).cloned())
            .unwrap_or_default()
    }

    /// Mark discovery as running unless another caller already started it
    fn begin_discovery(&self, device_id: &str) -> Result<(), FlowError> {
        let mut streams = self
            .inner
            .streams
            .lock()
            .map_err(|e| FlowError::Internal(e.to_string()))?;
        if streams.get(device_id) == Some(&StreamStatus::Discovering) {
            return Err(FlowError::Busy {
                device_id: device_id.to_string(),
                kind: CommandKind::StartStream,
            });
        }
        streams.insert(device_id.to_string(), StreamStatus::Discovering);
        Ok(())
    }

    fn set_stream_status(&self, device_id: &str, status: StreamStatus) {
        if let Ok(mut streams) = self.inner.streams.lock() {
            streams.insert(device_id.to_string(), status);
        }
    }
}

// =============================== INTERNALS ================================== //

async fn ensure_subscribed(inner: &Inner, subscription: &mut Subscription) -> Result<(), FlowError> {
    if !subscription.active {
        inner.transport.subscribe(&inner.response_topic).await?;
        subscription.active = true;
        debug!("Subscribed to {}", inner.response_topic);
    }
    Ok(())
}

async fn teardown_if_idle(inner: &Inner, subscription: &mut Subscription) -> Result<(), FlowError> {
    if subscription.active && subscription.idle() {
        inner.transport.unsubscribe(&inner.response_topic).await?;
        subscription.active = false;
        debug!("Unsubscribed from {}", inner.response_topic);
    }
    Ok(())
}

async fn acquire(inner: &Inner) -> Result<(), FlowError> {
    let mut subscription = inner.subscription.lock().await;
    ensure_subscribed(inner, &mut subscription).await?;
    subscription.holders += 1;
    Ok(())
}

async fn release(inner: &Inner) -> Result<(), FlowError> {
    let mut subscription = inner.subscription.lock().await;
    subscription.holders = subscription.holders.saturating_sub(1);
    if subscription.holders == 0 {
        subscription.retained = false;
    }
    teardown_if_idle(inner, &mut subscription).await
}

async fn begin_request(inner: &Inner) -> Result<(), FlowError> {
    let mut subscription = inner.subscription.lock().await;
    ensure_subscribed(inner, &mut subscription).await?;
    subscription.in_flight += 1;
    subscription.retained = true;
    Ok(())
}

async fn end_request(inner: &Inner) -> Result<(), FlowError> {
    let mut subscription = inner.subscription.lock().await;
    subscription.in_flight = subscription.in_flight.saturating_sub(1);
    teardown_if_idle(inner, &mut subscription).await
}

struct Reservation<'a> {
    slot: SlotGuard<'a>,
    reply: oneshot::Receiver<Reply>,
}

/// Frees the request slot even if the request future is dropped
struct SlotGuard<'a> {
    inner: &'a Inner,
    key: RequestKey,
    correlation_id: String,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        if let Ok(mut pending) = self.inner.pending.lock() {
            if pending
                .get(&self.key)
                .is_some_and(|p| p.correlation_id == self.correlation_id)
            {
                pending.remove(&self.key);
            }
        }
    }
}

/// Marks a request outstanding on the response subscription
struct HoldGuard {
    inner: Option<Arc<Inner>>,
}

impl HoldGuard {
    async fn finish(mut self) {
        if let Some(inner) = self.inner.take() {
            if let Err(e) = end_request(&inner).await {
                warn!("Failed to settle response subscription: {}", e);
            }
        }
    }
}

impl Drop for HoldGuard {
    fn drop(&mut self) {
        // request future dropped mid-flight
        if let Some(inner) = self.inner.take() {
            if let Ok(handle) = tokio::runtime::Handle::try_current() {
                handle.spawn(async move {
                    if let Err(e) = end_request(&inner).await {
                        warn!("Failed to settle response subscription: {}", e);
                    }
                });
            }
        }
    }
}

async fn dispatch(inner: Arc<Inner>, mut messages: broadcast::Receiver<Message>) {
    loop {
        let message = tokio::select! {
            _ = inner.closed.cancelled() => break,
            message = messages.recv() => message,
        };

        match message {
            Ok(message) if message.topic == inner.response_topic => route(&inner, &message),
            Ok(_) => {}
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("Command channel lagged, {} message(s) dropped", skipped);
            }
            Err(broadcast::error::RecvError::Closed) => {
                error!("Transport closed, command channel dispatcher stopping");
                break;
            }
        }
    }
    debug!("Command channel dispatcher for {} stopped", inner.user_id);
}

fn route(inner: &Inner, message: &Message) {
    let response: CommandResponse = match message.parse_json() {
        Ok(response) => response,
        Err(e) => {
            warn!("Ignoring malformed response on {}: {}", message.topic, e);
            return;
        }
    };

    let key = (response.device_id.clone(), response.kind);
    let slot = match inner.pending.lock() {
        Ok(mut pending) => {
            let matches = pending.get(&key).is_some_and(|p| {
                response
                    .correlation_id
                    .as_ref()
                    .is_none_or(|id| *id == p.correlation_id)
            });
            if matches {
                pending.remove(&key)
            } else {
                None
            }
        }
        Err(_) => None,
    };

    match slot {
        Some(slot) => {
            debug!("Matched {} response from device {}", response.kind, response.device_id);
            let _ = slot.responder.send(Ok(response));
        }
        None => {
            debug!(
                "Dropping unmatched {} response from device {}",
                response.kind, response.device_id
            );
        }
    }
}
