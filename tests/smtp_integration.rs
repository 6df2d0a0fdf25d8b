//! End-to-end: a lettre client submits over SMTP, the relay delivers to a
//! mock Graph server.

mod common;

use std::sync::Arc;

use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::{Message, SmtpTransport, Transport};
use secrecy::SecretString;
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::time::timeout;

use graph_relay::auth::{CredentialValidator, StaticCredentials};
use graph_relay::config::SmtpConfig;
use graph_relay::events::EventBus;
use graph_relay::graph::{GraphClient, MailApi};
use graph_relay::pipeline::DeliveryPipeline;
use graph_relay::smtp::SmtpServer;

use common::{MockGraph, TEST_TIMEOUT, start_graph};

struct Relay {
    port: u16,
    bus: EventBus,
    stop: oneshot::Sender<()>,
    running: tokio::task::JoinHandle<graph_relay::error::Result<()>>,
}

async fn start_relay(graph: &MockGraph) -> Relay {
    let smtp = SmtpConfig {
        hostname: "127.0.0.1".into(),
        port: 0,
        auth_user: "relay".into(),
        auth_pass: SecretString::from("s3cret".to_string()),
        allow_any_login: false,
        max_connections: 4,
        max_message_size: 1024 * 1024,
    };
    let bus = EventBus::new();
    let validator: Arc<dyn CredentialValidator> = Arc::new(StaticCredentials::new(
        smtp.auth_user.clone(),
        smtp.auth_pass.clone(),
        bus.clone(),
    ));
    let api: Arc<dyn MailApi> = Arc::new(GraphClient::new(graph.graph_config()).unwrap());
    let pipeline = Arc::new(DeliveryPipeline::new(api, bus.clone()));
    let server = SmtpServer::new(&smtp, pipeline, validator);

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (stop, stop_rx) = oneshot::channel::<()>();
    let running = tokio::spawn(server.serve(listener, async {
        let _ = stop_rx.await;
    }));

    Relay {
        port,
        bus,
        stop,
        running,
    }
}

impl Relay {
    async fn stop(self) {
        self.stop.send(()).unwrap();
        self.running.await.unwrap().unwrap();
        let bus = self.bus;
        tokio::task::spawn_blocking(move || bus.shutdown(std::time::Duration::from_secs(2)))
            .await
            .unwrap();
    }
}

/// lettre's SMTP transport is blocking; run it off the runtime.
async fn submit(port: u16, credentials: Credentials, message: Message) -> Result<(), String> {
    tokio::task::spawn_blocking(move || {
        let transport = SmtpTransport::builder_dangerous("127.0.0.1")
            .port(port)
            .credentials(credentials)
            .authentication(vec![Mechanism::Plain])
            .build();
        transport.send(&message).map(|_| ()).map_err(|e| e.to_string())
    })
    .await
    .unwrap()
}

fn message(body: &str) -> Message {
    Message::builder()
        .from("relay@x.com".parse().unwrap())
        .to("Alice <a@x.com>".parse().unwrap())
        .subject("Status")
        .body(body.to_string())
        .unwrap()
}

#[tokio::test]
async fn auth_plain_submission_is_delivered() {
    timeout(TEST_TIMEOUT, async {
        let graph = start_graph().await;
        let relay = start_relay(&graph).await;

        let result = submit(
            relay.port,
            Credentials::new("relay".into(), "s3cret".into()),
            message("first line\r\n.starts with a dot\r\nlast line\r\n"),
        )
        .await;
        assert_eq!(result, Ok(()));

        assert_eq!(graph.ops(), vec!["token", "draft", "send", "delete"]);
        let draft = graph.only("draft")[0].json();
        assert_eq!(draft["subject"], "Status");
        assert_eq!(draft["body"]["contentType"], "text");
        assert_eq!(draft["toRecipients"][0]["emailAddress"]["address"], "a@x.com");
        let content = draft["body"]["content"].as_str().unwrap();
        assert!(content.lines().any(|l| l == ".starts with a dot"), "{content:?}");
        assert!(!content.contains(".."));

        relay.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn bad_credentials_never_reach_graph() {
    timeout(TEST_TIMEOUT, async {
        let graph = start_graph().await;
        let relay = start_relay(&graph).await;

        let result = submit(
            relay.port,
            Credentials::new("relay".into(), "wrong".into()),
            message("hello\r\n"),
        )
        .await;
        let err = result.unwrap_err();
        assert!(err.contains("535") || err.to_lowercase().contains("credentials"), "{err}");
        assert!(graph.seen().is_empty());

        relay.stop().await;
    })
    .await
    .expect("test timed out");
}

#[tokio::test]
async fn graph_outage_is_reported_as_temporary() {
    timeout(TEST_TIMEOUT, async {
        let graph = start_graph().await;
        graph.fail("send", 503);
        let relay = start_relay(&graph).await;

        let result = submit(
            relay.port,
            Credentials::new("relay".into(), "s3cret".into()),
            message("hello\r\n"),
        )
        .await;
        let err = result.unwrap_err();
        assert!(err.contains("temporarily unavailable"), "{err}");

        relay.stop().await;
    })
    .await
    .expect("test timed out");
}
