//! Transport tests against a loopback websocket host.

use std::time::Duration;

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{WebSocketStream, accept_async};
use yeedeck_daemon::{
    DaemonError, Dispatcher, Handler, HostSender, RunningTransport, Transport,
};
use yeedeck_types::{InboundEvent, Registration};

const WAIT: Duration = Duration::from_secs(5);

/// Handler that forwards every event and answers `keyUp` with a state change.
/// Events for the `stuck` context never finish.
struct Echo {
    seen: mpsc::UnboundedSender<InboundEvent>,
    host: HostSender,
}

const STUCK: &str = "stuck";

impl Handler for Echo {
    fn handle<'a>(&'a self, event: &'a InboundEvent) -> BoxFuture<'a, yeedeck_daemon::Result<()>> {
        Box::pin(async move {
            let _ = self.seen.send(event.clone());
            if event.context == STUCK {
                std::future::pending::<()>().await;
            }
            if event.event == "keyUp" {
                self.host.set_state(&event.context, true).await?;
            }
            Ok(())
        })
    }
}

struct Harness {
    host: WebSocketStream<TcpStream>,
    registration: Value,
    running: RunningTransport,
    seen: mpsc::UnboundedReceiver<InboundEvent>,
}

impl Harness {
    async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("ws://{}", listener.local_addr().unwrap());

        let accept = tokio::spawn(async move {
            let (socket, _) = listener.accept().await.unwrap();
            accept_async(socket).await.unwrap()
        });

        let transport = Transport::connect(&url, &Registration::new("registerPlugin", "plugin-1"))
            .await
            .unwrap();
        let mut host = accept.await.unwrap();
        let registration = next_json(&mut host).await;

        let (tx, seen) = mpsc::unbounded_channel();
        let mut dispatcher = Dispatcher::new(transport.host());
        dispatcher.register(Echo {
            seen: tx,
            host: transport.host(),
        });
        let running = transport.start(dispatcher);

        Self {
            host,
            registration,
            running,
            seen,
        }
    }

    async fn push(&mut self, text: &str) {
        self.host.send(Message::Text(text.to_string())).await.unwrap();
    }

    async fn next_seen(&mut self) -> InboundEvent {
        tokio::time::timeout(WAIT, self.seen.recv())
            .await
            .expect("handler was not called")
            .unwrap()
    }
}

async fn next_json(host: &mut WebSocketStream<TcpStream>) -> Value {
    loop {
        let message = tokio::time::timeout(WAIT, host.next())
            .await
            .expect("no frame from daemon")
            .unwrap()
            .unwrap();
        if let Message::Text(text) = message {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn key_up(context: &str) -> String {
    json!({
        "action": "com.skynewz.yeelight.toggle",
        "event": "keyUp",
        "context": context,
        "payload": {"settings": {"address": "192.0.2.10"}, "state": 0}
    })
    .to_string()
}

#[tokio::test]
async fn test_registration_is_first_frame() {
    let harness = Harness::start().await;

    assert_eq!(
        harness.registration,
        json!({"event": "registerPlugin", "uuid": "plugin-1"})
    );
}

#[tokio::test]
async fn test_events_reach_handlers() {
    let mut harness = Harness::start().await;

    harness
        .push(r#"{"action":"com.skynewz.yeelight.color","event":"willAppear","context":"k1","payload":{"settings":{}}}"#)
        .await;

    let event = harness.next_seen().await;
    assert_eq!(event.event, "willAppear");
    assert_eq!(event.context, "k1");
    assert_eq!(event.action.as_deref(), Some("com.skynewz.yeelight.color"));
}

#[tokio::test]
async fn test_outbound_events_reach_host() {
    let mut harness = Harness::start().await;

    harness.push(&key_up("k1")).await;

    assert_eq!(
        next_json(&mut harness.host).await,
        json!({"event": "setState", "context": "k1", "payload": {"state": 1}})
    );
}

#[tokio::test]
async fn test_malformed_message_is_dropped() {
    let mut harness = Harness::start().await;

    harness.push("this is not json").await;
    harness.push(r#"{"context": "no event name"}"#).await;
    harness.push(&key_up("k2")).await;

    assert_eq!(harness.next_seen().await.context, "k2");
    assert!(harness.seen.try_recv().is_err());
}

#[tokio::test]
async fn test_stalled_handler_does_not_block_later_events() {
    let mut harness = Harness::start().await;

    harness.push(&key_up(STUCK)).await;
    assert_eq!(harness.next_seen().await.context, STUCK);

    harness.push(&key_up("k4")).await;
    assert_eq!(harness.next_seen().await.context, "k4");
    assert_eq!(
        next_json(&mut harness.host).await,
        json!({"event": "setState", "context": "k4", "payload": {"state": 1}})
    );
}

#[tokio::test]
async fn test_binary_frames_are_ignored() {
    let mut harness = Harness::start().await;

    harness
        .host
        .send(Message::Binary(vec![1, 2, 3]))
        .await
        .unwrap();
    harness.push(&key_up("k3")).await;

    assert_eq!(harness.next_seen().await.context, "k3");
}

#[tokio::test]
async fn test_host_close_ends_transport_cleanly() {
    let mut harness = Harness::start().await;

    harness.host.close(None).await.unwrap();

    let result = tokio::time::timeout(WAIT, harness.running.wait())
        .await
        .expect("transport did not stop");
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_host_disconnect_ends_transport() {
    let harness = Harness::start().await;
    let cancel = harness.running.cancellation_token();

    drop(harness.host);

    tokio::time::timeout(WAIT, cancel.cancelled())
        .await
        .expect("transport did not notice the disconnect");
    let _ = tokio::time::timeout(WAIT, harness.running.wait())
        .await
        .expect("transport did not stop");
}

#[tokio::test]
async fn test_stop_closes_link() {
    let mut harness = Harness::start().await;

    harness.running.stop();
    let result = tokio::time::timeout(WAIT, harness.running.wait())
        .await
        .expect("transport did not stop");
    assert!(result.is_ok());

    // The host sees the socket end
    let end = tokio::time::timeout(WAIT, async {
        loop {
            match harness.host.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(end.is_ok());
}

#[tokio::test]
async fn test_send_after_stop_fails() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    let accept = tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        accept_async(socket).await.unwrap()
    });

    let transport = Transport::connect(&url, &Registration::new("registerPlugin", "plugin-1"))
        .await
        .unwrap();
    let _host = accept.await.unwrap();
    let sender = transport.host();
    let running = transport.start(Dispatcher::new(sender.clone()));

    running.stop();
    running.wait().await.unwrap();

    let err = sender.show_alert("k1").await.unwrap_err();
    assert!(matches!(err, DaemonError::TransportClosed));
}
