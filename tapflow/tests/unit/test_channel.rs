use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use tapflow::channel::discovery::{DiscoveryOptions, StreamProber};
use tapflow::channel::protocol::{CommandRequest, InspectResult, UiElement};
use tapflow::channel::topics::Topics;
use tapflow::channel::{
    ChannelOptions, CommandChannel, CommandKind, CommandResponse, MemoryTransport, StreamStatus,
};
use tapflow::errors::FlowError;

const USER: &str = "user-1";
const DEVICE: &str = "dev-1";

fn open(transport: &Arc<MemoryTransport>, options: ChannelOptions) -> CommandChannel {
    CommandChannel::open_with_prober(USER, transport.clone(), Arc::new(DeadProber), options)
}

/// Next command the device would receive
async fn next_request(outbound: &mut tokio::sync::broadcast::Receiver<tapflow::channel::Message>) -> CommandRequest {
    loop {
        let message = outbound.recv().await.unwrap();
        if message.topic == Topics::device_command(DEVICE) {
            return message.parse_json().unwrap();
        }
    }
}

fn answer_inspect(transport: &MemoryTransport, request: &CommandRequest, ids: &[&str]) {
    let result = InspectResult {
        elements: ids
            .iter()
            .map(|id| UiElement {
                resource_id: Some(id.to_string()),
                ..Default::default()
            })
            .collect(),
        package_name: "com.example".to_string(),
        ..Default::default()
    };
    let response = CommandResponse::ok(
        DEVICE,
        CommandKind::Inspect,
        serde_json::to_value(&result).unwrap(),
    )
    .with_correlation_id(request.correlation_id.clone());
    transport
        .inject_json(&Topics::user_responses(USER), &response)
        .unwrap();
}

struct DeadProber;

#[async_trait]
impl StreamProber for DeadProber {
    async fn probe(&self, base_url: &str, _timeout: Duration) -> Result<(), FlowError> {
        Err(FlowError::NotFound(format!("{} refused", base_url)))
    }
}

#[tokio::test]
async fn test_inspect_round_trip() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(&transport, ChannelOptions::default());
    let mut outbound = transport.outbound();

    let agent = {
        let transport = transport.clone();
        tokio::spawn(async move {
            let request = next_request(&mut outbound).await;
            assert_eq!(request.kind, CommandKind::Inspect);
            assert_eq!(request.reply_to, Topics::user_responses(USER));
            answer_inspect(&transport, &request, &["btn_ok"]);
        })
    };

    let result = channel
        .inspect(DEVICE, None, &CancellationToken::new())
        .await
        .unwrap();
    agent.await.unwrap();

    assert_eq!(result.elements[0].resource_id.as_deref(), Some("btn_ok"));
    assert_eq!(channel.in_flight(), 0);
    assert!(channel.cached_inspection(DEVICE).is_some());
}

#[tokio::test]
async fn test_second_inspect_is_busy_until_first_resolves() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(&transport, ChannelOptions::default());
    let mut outbound = transport.outbound();

    let first = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.inspect(DEVICE, None, &CancellationToken::new()).await })
    };
    let request = next_request(&mut outbound).await;

    let err = channel
        .inspect(DEVICE, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Busy {
            kind: CommandKind::Inspect,
            ..
        }
    ));

    assert_eq!(channel.in_flight(), 1);

    answer_inspect(&transport, &request, &[]);
    assert!(first.await.unwrap().is_ok());

    let agent = {
        let transport = transport.clone();
        tokio::spawn(async move {
            let request = next_request(&mut outbound).await;
            answer_inspect(&transport, &request, &["btn_ok"]);
        })
    };
    let again = channel.inspect(DEVICE, None, &CancellationToken::new()).await;
    agent.await.unwrap();
    assert!(again.is_ok());
}

#[tokio::test]
async fn test_slot_is_released_after_timeout() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(
        &transport,
        ChannelOptions {
            inspect_timeout: Duration::from_millis(30),
            ..Default::default()
        },
    );

    let err = channel
        .inspect(DEVICE, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Timeout(_)));
    assert_eq!(channel.in_flight(), 0);

    // accepted again, and times out again rather than being busy
    let err = channel
        .inspect(DEVICE, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Timeout(_)));
}

#[tokio::test]
async fn test_failed_response_is_remote_error() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(&transport, ChannelOptions::default());
    let mut outbound = transport.outbound();

    let agent = {
        let transport = transport.clone();
        tokio::spawn(async move {
            let request = next_request(&mut outbound).await;
            let response = CommandResponse::failed(DEVICE, CommandKind::ListApps, "no package manager")
                .with_correlation_id(request.correlation_id);
            transport
                .inject_json(&Topics::user_responses(USER), &response)
                .unwrap();
        })
    };

    let err = channel
        .list_apps(DEVICE, &CancellationToken::new())
        .await
        .unwrap_err();
    agent.await.unwrap();
    match err {
        FlowError::RemoteError(message) => assert_eq!(message, "no package manager"),
        other => panic!("unexpected error: {:?}", other),
    }
}

#[tokio::test]
async fn test_cancel_device_rejects_in_flight_request() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(&transport, ChannelOptions::default());
    let mut outbound = transport.outbound();

    let pending = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.inspect(DEVICE, None, &CancellationToken::new()).await })
    };
    next_request(&mut outbound).await;

    assert_eq!(channel.cancel_device(DEVICE), 1);
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, FlowError::Cancelled(_)));
}

#[tokio::test]
async fn test_start_stream_not_found_when_every_probe_fails() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(
        &transport,
        ChannelOptions {
            discovery: DiscoveryOptions {
                candidates: vec![
                    "http://{device_id}.local:8080".to_string(),
                    "http://127.0.0.1:9".to_string(),
                ],
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let mut outbound = transport.outbound();

    let agent = {
        let transport = transport.clone();
        tokio::spawn(async move {
            let request = next_request(&mut outbound).await;
            assert_eq!(request.kind, CommandKind::StartStream);
            let response = CommandResponse::ok(DEVICE, CommandKind::StartStream, serde_json::json!({}))
                .with_correlation_id(request.correlation_id);
            transport
                .inject_json(&Topics::user_responses(USER), &response)
                .unwrap();
        })
    };

    let err = channel
        .start_stream(DEVICE, &CancellationToken::new())
        .await
        .unwrap_err();
    agent.await.unwrap();

    assert!(matches!(err, FlowError::NotFound(_)));
    assert_eq!(channel.stream_status(DEVICE), StreamStatus::NotFound);
}

#[tokio::test]
async fn test_close_drops_response_subscription() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(&transport, ChannelOptions::default());

    channel.acquire().await.unwrap();
    assert!(transport.is_subscribed(&Topics::user_responses(USER)));

    channel.close().await;
    assert!(channel.is_closed());
    assert!(!transport.is_subscribed(&Topics::user_responses(USER)));

    let err = channel
        .inspect(DEVICE, None, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(err, FlowError::Cancelled(_)));
}

#[tokio::test]
async fn test_subscription_stays_open_between_requests() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(&transport, ChannelOptions::default());
    let mut outbound = transport.outbound();

    let agent = {
        let transport = transport.clone();
        tokio::spawn(async move {
            for _ in 0..2 {
                let request = next_request(&mut outbound).await;
                answer_inspect(&transport, &request, &[]);
            }
        })
    };

    for _ in 0..2 {
        channel
            .inspect(DEVICE, None, &CancellationToken::new())
            .await
            .unwrap();
    }
    agent.await.unwrap();

    assert!(transport.is_subscribed(&Topics::user_responses(USER)));
    assert_eq!(transport.subscribe_calls(), 1);
    assert_eq!(transport.unsubscribe_calls(), 0);

    channel.release().await.unwrap();
    assert!(!transport.is_subscribed(&Topics::user_responses(USER)));
    assert_eq!(transport.unsubscribe_calls(), 1);
}

#[tokio::test]
async fn test_busy_start_stream_keeps_discovery_status() {
    let transport = Arc::new(MemoryTransport::new());
    let channel = open(
        &transport,
        ChannelOptions {
            discovery: DiscoveryOptions {
                candidates: vec!["http://127.0.0.1:9".to_string()],
                ..Default::default()
            },
            ..Default::default()
        },
    );
    let mut outbound = transport.outbound();

    let first = {
        let channel = channel.clone();
        tokio::spawn(async move { channel.start_stream(DEVICE, &CancellationToken::new()).await })
    };
    let request = next_request(&mut outbound).await;
    assert_eq!(channel.stream_status(DEVICE), StreamStatus::Discovering);

    let err = channel
        .start_stream(DEVICE, &CancellationToken::new())
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        FlowError::Busy {
            kind: CommandKind::StartStream,
            ..
        }
    ));
    assert_eq!(channel.stream_status(DEVICE), StreamStatus::Discovering);

    let response = CommandResponse::ok(DEVICE, CommandKind::StartStream, serde_json::json!({}))
        .with_correlation_id(request.correlation_id);
    transport
        .inject_json(&Topics::user_responses(USER), &response)
        .unwrap();

    assert!(matches!(first.await.unwrap(), Err(FlowError::NotFound(_))));
    assert_eq!(channel.stream_status(DEVICE), StreamStatus::NotFound);
}
