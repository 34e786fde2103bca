use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::Router;
use axum::extract::State;
use axum::http::header::USER_AGENT;
use axum::http::{HeaderMap, Method, StatusCode, Uri};

use bosch_gateway::crypto::{Codec, SecretKey};

use futures_util::StreamExt;
use futures_util::future::BoxFuture;

use serde_json::json;

use serial_test::serial;

use tokio::sync::mpsc;

use crate::config::{Credentials, GatewayConfig, XmppAccount};
use crate::error::{Error, ErrorKind, Result};
use crate::gateway::Gateway;
use crate::retry::RetryPolicy;
use crate::session::{ConnectionState, StateHandle};
use crate::transport::xmpp::{LinkEvent, Outbound, Stanza, StanzaConnector, StanzaLink};
use crate::transport::{Request, RequestTimeout, Transport, TransportKind};
use crate::{DataPath, Value};

const ACCESS_KEY: &str = "AbCd-EfGh-IjKl-MnOp";
const PASSWORD: &str = "s3cret-pass";
const SERIAL: &str = "101506113";

const TEMP: &str = "/temp";
const UUID: &str = "/gateway/uuid";
const MODE: &str = "/heatingCircuits/hc1/operationMode";
const SETPOINT: &str = "/heatingCircuits/hc1/temperatureRoomSetpoint";

fn init_tracing() {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
}

fn codec() -> Codec {
    Codec::new(SecretKey::derive(ACCESS_KEY, PASSWORD))
}

fn credentials() -> Credentials {
    Credentials::access_key(ACCESS_KEY, PASSWORD)
}

fn retry() -> RetryPolicy {
    RetryPolicy::new(3).base_delay(Duration::from_millis(10))
}

// The documents served by both simulators, in their decrypted form.
struct Store {
    codec: Codec,
    documents: Mutex<HashMap<String, serde_json::Value>>,
}

impl Store {
    fn new() -> Self {
        let documents = [
            (TEMP, json!({"path": TEMP, "value": 21.5})),
            (
                UUID,
                json!({"id": UUID, "type": "stringValue", "writeable": 0, "value": "123456789"}),
            ),
            (
                "/gateway/versionFirmware",
                json!({
                    "id": "/gateway/versionFirmware",
                    "type": "stringValue",
                    "writeable": 0,
                    "value": "04.08.02"
                }),
            ),
            (
                "/heatingCircuits",
                json!({
                    "id": "/heatingCircuits",
                    "type": "refEnum",
                    "references": [{"id": "/heatingCircuits/hc1"}]
                }),
            ),
            (
                "/heatingCircuits/hc1",
                json!({
                    "id": "/heatingCircuits/hc1",
                    "type": "refEnum",
                    "references": [
                        {"id": MODE},
                        {"id": SETPOINT},
                        {"id": "/heatingCircuits/hc1/missing"}
                    ]
                }),
            ),
            (
                MODE,
                json!({
                    "id": MODE,
                    "type": "stringValue",
                    "writeable": 1,
                    "value": "manual",
                    "allowedValues": ["manual", "auto"]
                }),
            ),
            (
                SETPOINT,
                json!({
                    "id": SETPOINT,
                    "type": "floatValue",
                    "writeable": 1,
                    "value": 20.0,
                    "unitOfMeasure": "C",
                    "minValue": 5.0,
                    "maxValue": 30.0
                }),
            ),
        ];

        Self {
            codec: codec(),
            documents: Mutex::new(
                documents
                    .into_iter()
                    .map(|(path, document)| (path.to_owned(), document))
                    .collect(),
            ),
        }
    }

    fn read(&self, path: &str) -> Option<String> {
        let document = self.documents.lock().unwrap().get(path).cloned()?;
        Some(self.seal(&document))
    }

    fn write(&self, path: &str, body: &str) -> bool {
        let Ok(plaintext) = self.codec.open(body) else {
            return false;
        };
        let Ok(write) = serde_json::from_slice::<serde_json::Value>(&plaintext) else {
            return false;
        };

        let mut documents = self.documents.lock().unwrap();
        match (documents.get_mut(path), write.get("value")) {
            (Some(document), Some(value)) => {
                document["value"] = value.clone();
                true
            }
            _ => false,
        }
    }

    fn value(&self, path: &str) -> serde_json::Value {
        self.documents.lock().unwrap()[path]["value"].clone()
    }

    fn set_value(&self, path: &str, value: serde_json::Value) {
        self.documents.lock().unwrap().get_mut(path).unwrap()["value"] = value;
    }

    fn seal(&self, document: &serde_json::Value) -> String {
        self.codec
            .seal(&serde_json::to_vec(document).unwrap())
            .unwrap()
    }
}

// A gateway answering over HTTP.
struct HttpSimulator {
    store: Store,
    hits: AtomicUsize,
    puts: AtomicUsize,
    stall: AtomicBool,
    reject: AtomicBool,
    user_agents: Mutex<Vec<String>>,
}

impl HttpSimulator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            store: Store::new(),
            hits: AtomicUsize::new(0),
            puts: AtomicUsize::new(0),
            stall: AtomicBool::new(false),
            reject: AtomicBool::new(false),
            user_agents: Mutex::new(Vec::new()),
        })
    }

    async fn start(self: &Arc<Self>) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap();
        let router = Router::new().fallback(serve).with_state(self.clone());
        drop(tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        }));
        address
    }
}

async fn serve(
    State(simulator): State<Arc<HttpSimulator>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: String,
) -> (StatusCode, String) {
    let _ = simulator.hits.fetch_add(1, Ordering::SeqCst);
    if let Some(agent) = headers.get(USER_AGENT).and_then(|agent| agent.to_str().ok()) {
        simulator.user_agents.lock().unwrap().push(agent.to_owned());
    }

    if simulator.reject.load(Ordering::SeqCst) {
        return (StatusCode::UNAUTHORIZED, String::new());
    }
    if simulator.stall.load(Ordering::SeqCst) {
        tokio::time::sleep(Duration::from_secs(2)).await;
    }

    match method {
        Method::GET => match simulator.store.read(uri.path()) {
            Some(body) => (StatusCode::OK, body),
            None => (StatusCode::NOT_FOUND, String::new()),
        },
        Method::PUT => {
            let _ = simulator.puts.fetch_add(1, Ordering::SeqCst);
            if simulator.store.write(uri.path(), &body) {
                (StatusCode::NO_CONTENT, String::new())
            } else {
                (StatusCode::BAD_REQUEST, String::new())
            }
        }
        _ => (StatusCode::METHOD_NOT_ALLOWED, String::new()),
    }
}

fn http_config(address: SocketAddr) -> GatewayConfig {
    GatewayConfig::http(address.to_string(), credentials())
        .timeout(Duration::from_millis(500))
        .retry(retry())
}

async fn http_gateway() -> (Arc<HttpSimulator>, Gateway) {
    init_tracing();
    let simulator = HttpSimulator::new();
    let address = simulator.start().await;
    let gateway = Gateway::new(http_config(address)).unwrap();
    gateway.connect().await.unwrap();
    (simulator, gateway)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Replies {
    Immediate,
    // Replies are held until the batch is complete, then sent in reverse
    // order.
    Reversed(usize),
    Silent,
}

// A gateway answering through an in-memory XMPP link.
struct XmppSimulator {
    store: Store,
    replies: Mutex<Replies>,
    connections: AtomicUsize,
    pings: AtomicUsize,
    pushes: AtomicUsize,
    refuse: AtomicBool,
    accounts: Mutex<Vec<XmppAccount>>,
    link: Mutex<Option<mpsc::Sender<LinkEvent>>>,
}

impl XmppSimulator {
    fn new(replies: Replies) -> Arc<Self> {
        Arc::new(Self {
            store: Store::new(),
            replies: Mutex::new(replies),
            connections: AtomicUsize::new(0),
            pings: AtomicUsize::new(0),
            pushes: AtomicUsize::new(0),
            refuse: AtomicBool::new(false),
            accounts: Mutex::new(Vec::new()),
            link: Mutex::new(None),
        })
    }

    fn set_replies(&self, replies: Replies) {
        *self.replies.lock().unwrap() = replies;
    }

    fn reply(&self, request: &Stanza) -> Stanza {
        let (head, body) = request
            .body
            .split_once("\r\n\r\n")
            .unwrap_or((request.body.as_str(), ""));
        let mut start_line = head.split_whitespace();
        let method = start_line.next().unwrap_or_default();
        let path = start_line.next().unwrap_or_default();

        let frame = match method {
            "GET" => match self.store.read(path) {
                Some(body) => format!("HTTP/1.0 200 OK\r\nContent-Type: application/json\r\n\r\n{body}"),
                None => "HTTP/1.0 404 Not Found\r\n\r\n".to_owned(),
            },
            "PUT" if self.store.write(path, body) => "HTTP/1.0 204 No Content\r\n\r\n".to_owned(),
            _ => "HTTP/1.0 400 Bad Request\r\n\r\n".to_owned(),
        };
        Stanza::new(request.id.clone(), frame)
    }

    fn events(&self) -> mpsc::Sender<LinkEvent> {
        self.link.lock().unwrap().clone().unwrap()
    }

    async fn push_frame(&self, body: String) {
        let id = format!("push{}", self.pushes.fetch_add(1, Ordering::SeqCst));
        let frame = format!("PUT /notifications HTTP/1.0\r\nContent-Type: application/json\r\n\r\n{body}");
        self.events()
            .send(LinkEvent::Stanza(Stanza::new(id, frame)))
            .await
            .unwrap();
    }

    async fn push(&self, document: serde_json::Value) {
        self.push_frame(self.store.seal(&document)).await;
    }

    async fn disconnect(&self) {
        let events = self.link.lock().unwrap().take().unwrap();
        events
            .send(LinkEvent::Disconnected("connection reset by peer".into()))
            .await
            .unwrap();
    }
}

#[derive(Clone)]
struct SimulatorConnector(Arc<XmppSimulator>);

impl StanzaConnector for SimulatorConnector {
    fn connect(&self, account: &XmppAccount) -> BoxFuture<'static, Result<StanzaLink>> {
        let simulator = self.0.clone();
        let account = account.clone();

        Box::pin(async move {
            let (outbound, mut requests) = mpsc::channel(32);
            let (events, inbound) = mpsc::channel(32);

            let _ = simulator.connections.fetch_add(1, Ordering::SeqCst);
            if simulator.refuse.load(Ordering::SeqCst) {
                return Err(Error::transport("Connection refused by the simulator"));
            }
            simulator.accounts.lock().unwrap().push(account);
            *simulator.link.lock().unwrap() = Some(events.clone());

            drop(tokio::spawn(async move {
                let mut held = Vec::new();
                while let Some(outbound) = requests.recv().await {
                    let request = match outbound {
                        Outbound::Ping => {
                            let _ = simulator.pings.fetch_add(1, Ordering::SeqCst);
                            continue;
                        }
                        Outbound::Stanza(request) => request,
                    };

                    let replies = *simulator.replies.lock().unwrap();
                    match replies {
                        Replies::Immediate => {
                            let reply = simulator.reply(&request);
                            if events.send(LinkEvent::Stanza(reply)).await.is_err() {
                                break;
                            }
                        }
                        Replies::Reversed(batch) => {
                            held.push(request);
                            if held.len() == batch {
                                for request in held.drain(..).rev() {
                                    let reply = simulator.reply(&request);
                                    let _ = events.send(LinkEvent::Stanza(reply)).await;
                                }
                            }
                        }
                        Replies::Silent => {}
                    }
                }
            }));

            Ok(StanzaLink { outbound, inbound })
        })
    }
}

fn xmpp_config() -> GatewayConfig {
    GatewayConfig::xmpp(SERIAL, credentials())
        .timeout(Duration::from_secs(2))
        .retry(retry())
}

async fn xmpp_gateway(replies: Replies) -> (Arc<XmppSimulator>, Gateway) {
    init_tracing();
    let simulator = XmppSimulator::new(replies);
    let gateway =
        Gateway::with_connector(xmpp_config(), SimulatorConnector(simulator.clone())).unwrap();
    gateway.connect().await.unwrap();
    (simulator, gateway)
}

async fn eventually(check: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(2), async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
}

async fn wait_for(gateway: &Gateway, state: ConnectionState) {
    let mut changes = gateway.state_changes();
    tokio::time::timeout(Duration::from_secs(2), async {
        while *changes.borrow_and_update() != state {
            changes.changed().await.unwrap();
        }
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn not_connected_before_connect() {
    let gateway = Gateway::new(GatewayConfig::http("127.0.0.1:9", credentials())).unwrap();
    assert_eq!(gateway.state(), ConnectionState::Disconnected);

    let error = gateway.get(TEMP).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);
    assert_eq!(error.path().map(DataPath::as_str), Some(TEMP));

    let error = gateway.set(TEMP, 21.0).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);

    let error = gateway.subscribe().await.err().unwrap();
    assert_eq!(error.kind(), ErrorKind::NotConnected);

    let error = gateway.rawscan().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);

    gateway.set_timeout(Duration::from_millis(250));
    assert_eq!(gateway.timeout(), Duration::from_millis(250));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_get_temperature() {
    let (simulator, gateway) = http_gateway().await;
    assert_eq!(gateway.state(), ConnectionState::Connected);

    let point = gateway.get(TEMP).await.unwrap();
    assert_eq!(point.path().as_str(), TEMP);
    assert_eq!(point.value(), &Value::Number(21.5));
    assert_eq!(
        gateway.cached(TEMP).await.unwrap().value(),
        &Value::Number(21.5)
    );
    assert_eq!(gateway.data_points().await.len(), 1);

    assert!(
        simulator
            .user_agents
            .lock()
            .unwrap()
            .iter()
            .all(|agent| agent == "TeleHeater/2.2.3")
    );

    gateway.close().await;
    assert_eq!(gateway.state(), ConnectionState::Disconnected);
    let error = gateway.get(TEMP).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_retry_budget() {
    init_tracing();
    let simulator = HttpSimulator::new();
    let address = simulator.start().await;
    let gateway =
        Gateway::new(http_config(address).timeout(Duration::from_millis(100))).unwrap();
    gateway.connect().await.unwrap();

    simulator.stall.store(true, Ordering::SeqCst);
    simulator.hits.store(0, Ordering::SeqCst);

    let error = gateway.get(TEMP).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(error.is_timeout());
    assert_eq!(error.transport_kind(), Some(TransportKind::Http));
    assert_eq!(error.path().map(DataPath::as_str), Some(TEMP));
    assert_eq!(simulator.hits.load(Ordering::SeqCst), 3);

    // A timeout fails the session until the next connection.
    assert_eq!(gateway.state(), ConnectionState::Failed);
    let error = gateway.get(TEMP).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);
    assert_eq!(simulator.hits.load(Ordering::SeqCst), 3);

    simulator.stall.store(false, Ordering::SeqCst);
    gateway.connect().await.unwrap();
    assert!(gateway.get(TEMP).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_authentication_rejected() {
    init_tracing();
    let simulator = HttpSimulator::new();
    simulator.reject.store(true, Ordering::SeqCst);
    let address = simulator.start().await;

    let gateway = Gateway::new(http_config(address)).unwrap();
    let error = gateway.connect().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(!error.is_timeout());
    assert_eq!(error.path().map(DataPath::as_str), Some(UUID));

    // Never retried.
    assert_eq!(simulator.hits.load(Ordering::SeqCst), 1);
    assert_eq!(gateway.state(), ConnectionState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_wrong_key() {
    init_tracing();
    let simulator = HttpSimulator::new();
    let address = simulator.start().await;

    let config = GatewayConfig::http(address.to_string(), Credentials::access_key(ACCESS_KEY, "wrong"))
        .retry(retry());
    let gateway = Gateway::new(config).unwrap();
    let error = gateway.connect().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Crypto);
    assert_eq!(simulator.hits.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_set_validates() {
    let (simulator, gateway) = http_gateway().await;

    let point = gateway.set(SETPOINT, 21.5).await.unwrap();
    assert_eq!(point.value(), &Value::Number(21.5));
    assert_eq!(simulator.store.value(SETPOINT), json!(21.5));
    assert_eq!(simulator.puts.load(Ordering::SeqCst), 1);

    for (path, value) in [
        (SETPOINT, Value::Number(35.0)),
        (SETPOINT, Value::Bool(true)),
        (MODE, Value::Enum("party".into())),
        (UUID, Value::Text("987654321".into())),
    ] {
        let error = gateway.set(path, value.clone()).await.unwrap_err();
        assert_eq!(error.kind(), ErrorKind::Validation, "{path} {value:?}");
        assert_eq!(error.path().map(DataPath::as_str), Some(path));
    }
    assert_eq!(simulator.puts.load(Ordering::SeqCst), 1);

    let point = gateway.set(MODE, Value::Enum("auto".into())).await.unwrap();
    assert_eq!(point.value(), &Value::Enum("auto".into()));
    assert_eq!(simulator.store.value(MODE), json!("auto"));
    assert_eq!(
        gateway.cached(MODE).await.unwrap().value(),
        &Value::Enum("auto".into())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_device_errors() {
    let (_simulator, gateway) = http_gateway().await;

    let error = gateway.get("/missing").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Device);
    assert!(error.info().contains("404"));
    assert_eq!(error.transport_kind(), Some(TransportKind::Http));
    assert_eq!(gateway.state(), ConnectionState::Connected);

    let error = gateway.get("relative/path").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);

    assert_eq!(
        gateway.check_connection().await.unwrap().as_deref(),
        Some("123456789")
    );

    let info = gateway.info().await.unwrap();
    assert_eq!(info.uuid.as_deref(), Some("123456789"));
    assert_eq!(info.firmware.as_deref(), Some("04.08.02"));
    assert_eq!(info.date, None);

    let error = gateway.current_date().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Device);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_polling_subscribe() {
    init_tracing();
    let simulator = HttpSimulator::new();
    let address = simulator.start().await;
    let gateway =
        Gateway::new(http_config(address).poll_interval(Duration::from_millis(50))).unwrap();
    gateway.connect().await.unwrap();

    let _ = gateway.get(TEMP).await.unwrap();
    gateway.watch(UUID).await.unwrap();

    let mut updates = gateway.subscribe().await.unwrap();
    let first = updates.next().await.unwrap().unwrap();
    assert_eq!(first.path().as_str(), TEMP);
    let second = updates.next().await.unwrap().unwrap();
    assert_eq!(second.path().as_str(), UUID);

    simulator.store.set_value(TEMP, json!(22.0));
    let third = updates.next().await.unwrap().unwrap();
    assert_eq!(third.path().as_str(), TEMP);
    assert_eq!(third.value(), &Value::Number(22.0));

    gateway.close().await;
    assert!(updates.next().await.is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_scans() {
    let (_simulator, gateway) = http_gateway().await;

    let scans = gateway.smallscan(&["/heatingCircuits"]).await.unwrap();
    assert_eq!(scans.len(), 1);
    assert_eq!(scans[0].root.as_str(), "/heatingCircuits");
    let ids = scans[0]
        .documents
        .iter()
        .map(|document| document["id"].as_str().unwrap())
        .collect::<Vec<_>>();
    assert_eq!(ids, [MODE, SETPOINT]);

    let scans = gateway.rawscan().await.unwrap();
    assert_eq!(scans.len(), 8);
    assert_eq!(scans[2].root.as_str(), "/heatingCircuits");
    assert_eq!(scans[2].documents.len(), 2);
    assert!(scans[0].documents.is_empty());

    let error = gateway.smallscan(&["heatingCircuits"]).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Validation);
}

#[tokio::test]
async fn xmpp_get_and_set() {
    let (simulator, gateway) = xmpp_gateway(Replies::Immediate).await;

    let account = simulator.accounts.lock().unwrap()[0].clone();
    assert_eq!(account.jid, "rrccontact_101506113@wa2-mz36-qrmzh6.bosch.de");
    assert_eq!(account.gateway, "rrcgateway_101506113@wa2-mz36-qrmzh6.bosch.de");
    assert_eq!(account.password.as_str(), "Ct7ZR03b_AbCdEfGhIjKlMnOp");

    let point = gateway.get(TEMP).await.unwrap();
    assert_eq!(point.value(), &Value::Number(21.5));

    let point = gateway.set(SETPOINT, 22.0).await.unwrap();
    assert_eq!(point.value(), &Value::Number(22.0));
    assert_eq!(simulator.store.value(SETPOINT), json!(22.0));

    let error = gateway.get("/missing").await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Device);
    assert_eq!(error.transport_kind(), Some(TransportKind::Xmpp));

    gateway.close().await;
    assert_eq!(gateway.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn xmpp_keep_alive() {
    init_tracing();
    let simulator = XmppSimulator::new(Replies::Immediate);
    let config = xmpp_config().keep_alive(Duration::from_millis(20));
    let gateway = Gateway::with_connector(config, SimulatorConnector(simulator.clone())).unwrap();
    gateway.connect().await.unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert!(simulator.pings.load(Ordering::SeqCst) >= 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn xmpp_concurrent_correlation() {
    let (_simulator, gateway) = xmpp_gateway(Replies::Reversed(2)).await;

    let (temperature, uuid) = tokio::join!(gateway.get(TEMP), gateway.get(UUID));
    let temperature = temperature.unwrap();
    let uuid = uuid.unwrap();

    assert_eq!(temperature.path().as_str(), TEMP);
    assert_eq!(temperature.value(), &Value::Number(21.5));
    assert_eq!(uuid.path().as_str(), UUID);
    assert_eq!(uuid.value(), &Value::Text("123456789".into()));
}

#[tokio::test]
async fn xmpp_push_order() {
    let (simulator, gateway) = xmpp_gateway(Replies::Immediate).await;
    let mut updates = gateway.subscribe().await.unwrap();

    let pushes = [("/system/a", 19.0), ("/system/b", 19.5), ("/system/c", 20.0)];
    for (path, value) in pushes {
        simulator
            .push(json!({"id": path, "type": "floatValue", "value": value}))
            .await;
    }
    simulator.push_frame("not an envelope".into()).await;

    for (path, value) in pushes {
        let point = updates.next().await.unwrap().unwrap();
        assert_eq!(point.path().as_str(), path);
        assert_eq!(point.value(), &Value::Number(value));
    }

    let error = updates.next().await.unwrap().unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Crypto);

    assert_eq!(
        gateway.cached("/system/c").await.unwrap().value(),
        &Value::Number(20.0)
    );
}

#[tokio::test]
async fn xmpp_cancellation_releases_slot() {
    init_tracing();
    let simulator = XmppSimulator::new(Replies::Silent);
    let connector: Arc<dyn StanzaConnector> = Arc::new(SimulatorConnector(simulator));
    let timeout = Arc::new(RequestTimeout::new(Duration::from_secs(5)));

    let transport = Transport::connect(
        &xmpp_config(),
        Arc::new(codec()),
        timeout.clone(),
        Some(connector),
        StateHandle::new(),
    )
    .await
    .unwrap();
    let Transport::Xmpp(xmpp) = &transport else {
        panic!("Expected an XMPP transport");
    };

    let request = Request::get(DataPath::new(TEMP).unwrap());

    // Dropped by the caller while waiting.
    tokio::select! {
        _ = transport.send_request(request.clone()) => panic!("No reply expected"),
        pending = async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            xmpp.pending_requests().await
        } => assert_eq!(pending, 1),
    }
    assert_eq!(xmpp.pending_requests().await, 0);

    // Timed out.
    timeout.set(Duration::from_millis(50));
    let error = transport.send_request(request).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(error.is_timeout());
    assert_eq!(xmpp.pending_requests().await, 0);

    transport.close().await;
    let error = transport
        .send_request(Request::get(DataPath::new(TEMP).unwrap()))
        .await
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);
}

#[tokio::test]
async fn xmpp_timeout_fails_session() {
    init_tracing();
    let simulator = XmppSimulator::new(Replies::Silent);
    let config = xmpp_config().timeout(Duration::from_millis(100));
    let gateway = Gateway::with_connector(config, SimulatorConnector(simulator.clone())).unwrap();
    gateway.connect().await.unwrap();

    let error = gateway.get(TEMP).await.unwrap_err();
    assert!(error.is_timeout());
    assert_eq!(gateway.state(), ConnectionState::Failed);

    let error = gateway.get(TEMP).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);

    simulator.set_replies(Replies::Immediate);
    gateway.connect().await.unwrap();
    assert_eq!(simulator.connections.load(Ordering::SeqCst), 2);
    assert!(gateway.get(TEMP).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn xmpp_reconnects_after_drop() {
    let (simulator, gateway) = xmpp_gateway(Replies::Silent).await;
    let mut updates = gateway.subscribe().await.unwrap();

    // Pending requests fail when the link drops.
    let (result, ()) = tokio::join!(gateway.get(TEMP), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        simulator.set_replies(Replies::Immediate);
        simulator.disconnect().await;
    });
    let error = result.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(!error.is_timeout());

    // Pushes of the lost connection end with it.
    assert!(updates.next().await.is_none());

    eventually(|| simulator.connections.load(Ordering::SeqCst) == 2).await;
    wait_for(&gateway, ConnectionState::Connected).await;
    assert_eq!(
        gateway.get(TEMP).await.unwrap().value(),
        &Value::Number(21.5)
    );
}

#[tokio::test]
async fn xmpp_requires_access_key() {
    let simulator = XmppSimulator::new(Replies::Immediate);
    let config = GatewayConfig::xmpp(SERIAL, Credentials::key("11".repeat(32)));
    let gateway = Gateway::with_connector(config, SimulatorConnector(simulator.clone())).unwrap();

    let error = gateway.connect().await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Config);
    assert_eq!(error.transport_kind(), Some(TransportKind::Xmpp));
    assert_eq!(simulator.connections.load(Ordering::SeqCst), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_stale_timeout_keeps_new_session() {
    init_tracing();
    let simulator = HttpSimulator::new();
    let address = simulator.start().await;
    let config = http_config(address)
        .timeout(Duration::from_millis(300))
        .retry(RetryPolicy::new(1));
    let gateway = Gateway::new(config).unwrap();
    gateway.connect().await.unwrap();

    simulator.stall.store(true, Ordering::SeqCst);

    // The first request stalls, and a new connection replaces the one it
    // was sent on before it times out.
    let (stale, ()) = tokio::join!(gateway.get(TEMP), async {
        tokio::time::sleep(Duration::from_millis(50)).await;
        simulator.stall.store(false, Ordering::SeqCst);
        gateway.connect().await.unwrap();
    });
    assert!(stale.unwrap_err().is_timeout());

    assert_eq!(gateway.state(), ConnectionState::Connected);
    assert_eq!(
        gateway.get(TEMP).await.unwrap().value(),
        &Value::Number(21.5)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_malformed_requests_are_not_retried() {
    init_tracing();
    let retry = RetryPolicy::new(3).base_delay(Duration::from_secs(5));
    let config = GatewayConfig::http("bad host:port", credentials()).retry(retry);
    let gateway = Gateway::new(config).unwrap();

    let error = tokio::time::timeout(Duration::from_secs(1), gateway.connect())
        .await
        .unwrap()
        .unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Transport);
    assert!(!error.is_timeout());
    assert_eq!(gateway.state(), ConnectionState::Failed);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
#[serial]
async fn http_zero_poll_interval() {
    init_tracing();
    let simulator = HttpSimulator::new();
    let address = simulator.start().await;
    let gateway = Gateway::new(http_config(address).poll_interval(Duration::ZERO)).unwrap();
    gateway.connect().await.unwrap();
    gateway.watch(TEMP).await.unwrap();

    let mut updates = gateway.subscribe().await.unwrap();
    for _ in 0..3 {
        let point = updates.next().await.unwrap().unwrap();
        assert_eq!(point.path().as_str(), TEMP);
    }
}

#[tokio::test]
async fn xmpp_zero_keep_alive() {
    init_tracing();
    let simulator = XmppSimulator::new(Replies::Immediate);
    let config = xmpp_config().keep_alive(Duration::ZERO);
    let gateway = Gateway::with_connector(config, SimulatorConnector(simulator.clone())).unwrap();
    gateway.connect().await.unwrap();

    eventually(|| simulator.pings.load(Ordering::SeqCst) >= 2).await;
    assert_eq!(gateway.state(), ConnectionState::Connected);
    assert_eq!(
        gateway.get(TEMP).await.unwrap().value(),
        &Value::Number(21.5)
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn xmpp_reconnect_budget_exhausted() {
    let (simulator, gateway) = xmpp_gateway(Replies::Immediate).await;
    let attempts = gateway.config().retry_policy().attempts() as usize;

    simulator.refuse.store(true, Ordering::SeqCst);
    simulator.disconnect().await;

    eventually(|| simulator.connections.load(Ordering::SeqCst) == 1 + attempts).await;
    wait_for(&gateway, ConnectionState::Failed).await;

    // No further attempt once the budget is spent.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(simulator.connections.load(Ordering::SeqCst), 1 + attempts);
    assert_eq!(gateway.state(), ConnectionState::Failed);

    let error = gateway.get(TEMP).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::NotConnected);
}
