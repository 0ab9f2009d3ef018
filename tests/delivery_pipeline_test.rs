//! End-to-end tests of the submission → fan-out → viewer pipeline.
//!
//! Every test runs a real server on `127.0.0.1:0` and connects real
//! WebSocket sessions to it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use formcast::auth::{ChannelAuthBroker, HttpCredentialSource};
use formcast::channel::{
    BackoffPolicy, ChannelError, ClientFrame, ConnectionState, PubSubSession, ServerFrame,
    Submission,
};
use formcast::client::SubmissionClient;
use formcast::notifications::{
    Alert, Delivery, DeliveryAgent, DeliveryError, NotificationBackend, PermissionState,
    PermissionStore,
};
use formcast::server::{self, AppState, D1Store, SubmissionStore};
use formcast::ws::{self, WsMessage};
use formcast::Viewer;
use tokio::net::TcpListener;
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

const WAIT: Duration = Duration::from_secs(5);

fn broker(key: Option<&str>) -> ChannelAuthBroker {
    ChannelAuthBroker::new(
        key.map(str::to_string),
        "notifications-client",
        vec!["notifications".to_string()],
        Duration::from_secs(300),
    )
}

async fn start(state: AppState) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let base = format!("http://{}", listener.local_addr().unwrap());
    tokio::spawn(server::serve(listener, state, std::future::pending()));
    base
}

fn session(base: &str, channel: &str, retry: Duration) -> PubSubSession {
    PubSubSession::builder()
        .server_url(base)
        .credentials(Arc::new(HttpCredentialSource::new(base).unwrap()))
        .channel(channel)
        .backoff(BackoffPolicy::fixed(retry))
        .build()
        .unwrap()
}

async fn wait_for_subscribers(state: &AppState, expected: usize) {
    tokio::time::timeout(WAIT, async {
        while state.fabric.subscriber_count("notifications") != expected {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| {
        panic!(
            "expected {expected} subscriber(s), have {}",
            state.fabric.subscriber_count("notifications")
        )
    });
}

fn ann() -> Submission {
    Submission {
        name: "Ann".into(),
        email: "a@x.com".into(),
        message: "hi".into(),
    }
}

#[derive(Debug, Default)]
struct RecordingBackend {
    prompts: AtomicUsize,
    shown: Mutex<Vec<Alert>>,
}

#[async_trait]
impl NotificationBackend for RecordingBackend {
    fn is_supported(&self) -> bool {
        true
    }

    fn permission(&self) -> PermissionState {
        PermissionState::Default
    }

    async fn request_permission(&self) -> PermissionState {
        self.prompts.fetch_add(1, Ordering::SeqCst);
        PermissionState::Granted
    }

    async fn show(&self, alert: &Alert) -> Result<(), DeliveryError> {
        self.shown.lock().unwrap().push(alert.clone());
        Ok(())
    }

    async fn dismiss(&self, _tag: &str) -> Result<(), DeliveryError> {
        Ok(())
    }
}

#[tokio::test]
async fn test_submission_fans_out_to_every_session() {
    let state = AppState::new(broker(Some("secret")), "notifications", None);
    let base = start(state.clone()).await;

    let mut first = session(&base, "notifications", Duration::from_millis(50));
    let mut second = session(&base, "notifications", Duration::from_millis(50));
    first.open().unwrap();
    second.open().unwrap();
    first.wait_connected(WAIT).await.unwrap();
    second.wait_connected(WAIT).await.unwrap();
    wait_for_subscribers(&state, 2).await;

    let before = formcast::now_millis();
    let answer = SubmissionClient::new(&base).unwrap().submit(&ann()).await.unwrap();
    assert_eq!(answer, "Form submitted successfully");

    for session in [&mut first, &mut second] {
        let event = tokio::time::timeout(WAIT, session.recv()).await.unwrap().unwrap();
        assert_eq!(event.event_name(), "form-submission");
        let payload = event.payload();
        assert_eq!(payload.message, "New form submission from Ann (a@x.com): hi");
        assert_eq!(payload.name, "Ann");
        assert_eq!(payload.email, "a@x.com");
        assert_eq!(payload.user_message, "hi");
        assert!(payload.timestamp >= before);
    }

    first.close().await;
    second.close().await;
}

#[tokio::test]
async fn test_missing_secret_fails_session_without_subscribing() {
    let state = AppState::new(broker(None), "notifications", None);
    let base = start(state.clone()).await;

    let response = reqwest::get(format!("{base}/api/channel-auth")).await.unwrap();
    assert_eq!(response.status().as_u16(), 500);
    let body: serde_json::Value = response.json().await.unwrap();
    assert!(body.get("error").is_some());
    assert!(body.get("token").is_none());

    let mut session = session(&base, "notifications", Duration::from_millis(50));
    session.open().unwrap();
    let result = session.wait_connected(WAIT).await;
    assert!(matches!(result, Err(ChannelError::Failed(_))));
    assert_eq!(state.fabric.subscriber_count("notifications"), 0);

    session.close().await;
    assert!(matches!(session.state(), ConnectionState::Failed(_)));
}

#[tokio::test]
async fn test_reconnect_leaves_exactly_one_subscription() {
    let state = AppState::new(broker(Some("secret")), "notifications", None);
    let base = start(state.clone()).await;

    let mut session = session(&base, "notifications", Duration::from_millis(300));
    session.open().unwrap();
    session.wait_connected(WAIT).await.unwrap();
    wait_for_subscribers(&state, 1).await;

    let mut states = session.watch_state();
    state.fabric.disconnect_all();
    tokio::time::timeout(
        WAIT,
        states.wait_for(|s| matches!(s, ConnectionState::Disconnected { .. })),
    )
    .await
    .unwrap()
    .unwrap();

    session.wait_connected(WAIT).await.unwrap();
    wait_for_subscribers(&state, 1).await;

    SubmissionClient::new(&base).unwrap().submit(&ann()).await.unwrap();
    let event = tokio::time::timeout(WAIT, session.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload().name, "Ann");

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(session.try_recv().is_none());

    session.close().await;
}

#[tokio::test]
async fn test_close_unsubscribes_and_stops_delivery() {
    let state = AppState::new(broker(Some("secret")), "notifications", None);
    let base = start(state.clone()).await;

    let mut session = session(&base, "notifications", Duration::from_millis(50));
    session.open().unwrap();
    session.wait_connected(WAIT).await.unwrap();
    wait_for_subscribers(&state, 1).await;

    session.close().await;
    assert_eq!(session.state(), ConnectionState::Closed);
    wait_for_subscribers(&state, 0).await;

    SubmissionClient::new(&base).unwrap().submit(&ann()).await.unwrap();
    assert!(session.recv().await.is_none());
}

#[tokio::test]
async fn test_subscription_outside_capability_is_rejected() {
    let state = AppState::new(broker(Some("secret")), "notifications", None);
    let base = start(state.clone()).await;

    let mut session = session(&base, "admin", Duration::from_millis(50));
    session.open().unwrap();
    let result = session.wait_connected(WAIT).await;
    assert!(matches!(result, Err(ChannelError::Failed(ref r)) if r.contains("rejected")));
    assert_eq!(state.fabric.subscriber_count("admin"), 0);
    session.close().await;
}

#[tokio::test]
async fn test_resubscribe_on_same_socket_replaces_subscription() {
    let state = AppState::new(broker(Some("secret")), "notifications", None);
    let base = start(state.clone()).await;
    let credential = state.broker.issue_credential("notifications-client").unwrap();

    let url = format!("{}/realtime", ws::http_to_ws_scheme(&base));
    let (mut writer, mut reader) = ws::connect(&url, &credential.token).await.unwrap();

    let subscribe = ClientFrame::Subscribe {
        channel: "notifications".into(),
        event: "form-submission".into(),
    };
    writer.send_json(&subscribe).await.unwrap();
    writer.send_json(&subscribe).await.unwrap();

    let mut confirmations = 0;
    while confirmations < 2 {
        let msg = tokio::time::timeout(WAIT, reader.recv()).await.unwrap().unwrap().unwrap();
        if let WsMessage::Text(text) = msg {
            if let Ok(ServerFrame::ConfirmSubscription { .. }) = serde_json::from_str(&text) {
                confirmations += 1;
            }
        }
    }
    assert_eq!(state.fabric.subscriber_count("notifications"), 1);

    writer.close().await.unwrap();
    wait_for_subscribers(&state, 0).await;
}

#[tokio::test]
async fn test_persistence_failure_does_not_block_publish() {
    let d1 = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500).set_body_string("database unavailable"))
        .expect(1)
        .mount(&d1)
        .await;

    let store = D1Store::new(&formcast::config::D1Settings {
        account_id: "acct".into(),
        database_id: "db".into(),
        api_base: d1.uri(),
        api_token: "tok".into(),
    })
    .unwrap();
    let store: Arc<dyn SubmissionStore> = Arc::new(store);
    let state = AppState::new(broker(Some("secret")), "notifications", Some(store));
    let base = start(state.clone()).await;

    let mut session = session(&base, "notifications", Duration::from_millis(50));
    session.open().unwrap();
    session.wait_connected(WAIT).await.unwrap();
    wait_for_subscribers(&state, 1).await;

    let answer = SubmissionClient::new(&base).unwrap().submit(&ann()).await.unwrap();
    assert_eq!(answer, "Form submitted successfully");
    let event = tokio::time::timeout(WAIT, session.recv()).await.unwrap().unwrap();
    assert_eq!(event.payload().email, "a@x.com");

    session.close().await;
}

#[tokio::test]
async fn test_viewer_records_and_alerts_in_receipt_order() {
    let state = AppState::new(broker(Some("secret")), "notifications", None);
    let base = start(state.clone()).await;

    let backend = Arc::new(RecordingBackend::default());
    let permissions = Arc::new(PermissionStore::new(backend.clone()));
    assert_eq!(permissions.request_consent().await, PermissionState::Granted);
    assert_eq!(permissions.request_consent().await, PermissionState::Granted);
    assert_eq!(backend.prompts.load(Ordering::SeqCst), 1);

    let mut viewer = Viewer::new(DeliveryAgent::new(permissions, backend.clone()));
    let mut session = session(&base, "notifications", Duration::from_millis(50));
    session.open().unwrap();
    session.wait_connected(WAIT).await.unwrap();
    wait_for_subscribers(&state, 1).await;

    let client = SubmissionClient::new(&base).unwrap();
    for message in ["one", "two", "three"] {
        client
            .submit(&Submission {
                message: message.into(),
                ..ann()
            })
            .await
            .unwrap();
    }

    for _ in 0..3 {
        let event = tokio::time::timeout(WAIT, session.recv()).await.unwrap().unwrap();
        let (_, delivery) = viewer.handle_event(&event).await;
        assert_eq!(delivery, Delivery::Direct);
    }
    session.close().await;

    let messages: Vec<String> = viewer.feed().iter().map(|r| r.message.clone()).collect();
    assert_eq!(
        messages,
        vec![
            "New form submission from Ann (a@x.com): three",
            "New form submission from Ann (a@x.com): two",
            "New form submission from Ann (a@x.com): one",
        ]
    );

    let shown = backend.shown.lock().unwrap();
    assert_eq!(shown.len(), 3);
    assert!(shown.iter().all(|a| a.tag == "form-submission" && a.title == "New Form Submission"));
}
