//! End-to-end tests: a real websocket client against a running engine and
//! gateway, with an in-memory ledger.

use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

use crash_round::core::rng::SequenceRng;
use crash_round::game::engine::{EngineConfig, EngineHandle, RoundEngine};
use crash_round::game::settings::Settings;
use crash_round::game::state::RoundPhase;
use crash_round::game::tick::RoundTimings;
use crash_round::network::server::{GatewayConfig, GatewayServer};
use crash_round::settlement::{
    Balance, CancelBetRequest, CashoutRequest, GameId, Ledger, LoseRequest, SettingsSource,
    SettlementError, StartGameRequest, StartGameResponse,
};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);

struct Forced(f64);

impl SettingsSource for Forced {
    async fn fetch(&self) -> Result<Settings, SettlementError> {
        Ok(Settings { next_round_number: Some(self.0), ..Default::default() })
    }
}

#[derive(Default)]
struct StubLedger {
    calls: Mutex<Vec<String>>,
}

impl StubLedger {
    fn record(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

impl Ledger for StubLedger {
    async fn start_game(&self, token: &str, request: StartGameRequest) -> Result<StartGameResponse, SettlementError> {
        self.record(format!("start {} {}", token, request.stake));
        let mut balances = BTreeMap::new();
        balances.insert("balance".to_string(), json!(90));
        Ok(StartGameResponse { game_id: GameId("g1".into()), balances })
    }

    async fn cashout(&self, _token: &str, request: CashoutRequest) -> Result<Value, SettlementError> {
        self.record(format!("cashout {} {}", request.game_id, request.amount));
        Ok(json!({}))
    }

    async fn lose(&self, _token: &str, request: LoseRequest) -> Result<Value, SettlementError> {
        self.record(format!("lose {} {}", request.game_id, request.score));
        Ok(json!({}))
    }

    async fn cancel_bet(&self, _token: &str, request: CancelBetRequest) -> Result<Value, SettlementError> {
        self.record(format!("cancel {}", request.game_id));
        Ok(json!({}))
    }

    async fn balance(&self, _token: &str) -> Result<Balance, SettlementError> {
        Ok(Balance { balance: 90.0, ..Default::default() })
    }

    async fn games(&self, _token: &str) -> Result<Value, SettlementError> {
        Ok(json!([{"game_id": "g0", "score": 1.5}]))
    }
}

struct Harness {
    addr: SocketAddr,
    engine: EngineHandle,
    ledger: Arc<StubLedger>,
    tasks: Vec<JoinHandle<()>>,
}

impl Drop for Harness {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

async fn start(crash_at: f64) -> Harness {
    let config = EngineConfig {
        timings: RoundTimings {
            betting: Duration::from_millis(400),
            lock_bets: Duration::from_millis(50),
            tick: Duration::from_millis(10),
            crashed: Duration::from_millis(100),
        },
        ..Default::default()
    };
    let engine = RoundEngine::new(config, Arc::new(Forced(crash_at)), SequenceRng::new(vec![0.5]));
    let handle = engine.handle();
    let ledger = Arc::new(StubLedger::default());

    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let gateway = GatewayServer::new(GatewayConfig::default(), handle.clone(), ledger.clone());

    let server_task = tokio::spawn(async move {
        let _ = gateway.serve(listener).await;
    });
    let engine_task = engine.spawn();

    Harness { addr, engine: handle, ledger, tasks: vec![server_task, engine_task] }
}

async fn connect(addr: SocketAddr, token: Option<&str>) -> Ws {
    let url = match token {
        Some(token) => format!("ws://{}/?authToken={}", addr, token),
        None => format!("ws://{}/", addr),
    };
    let (ws, _) = connect_async(url).await.expect("connect failed");
    ws
}

async fn recv(ws: &mut Ws) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, ws.next())
            .await
            .expect("timed out waiting for a message")
            .expect("connection closed")
            .expect("websocket error");
        if let Message::Text(text) = frame {
            return serde_json::from_str(&text).expect("server sent invalid JSON");
        }
    }
}

async fn recv_type(ws: &mut Ws, ty: &str) -> Value {
    loop {
        let msg = recv(ws).await;
        if msg["type"] == ty {
            return msg;
        }
    }
}

async fn send(ws: &mut Ws, msg: Value) {
    ws.send(Message::Text(msg.to_string())).await.expect("send failed");
}

async fn wait_for_phase(engine: &EngineHandle, phase: RoundPhase) {
    tokio::time::timeout(WAIT, async {
        while engine.snapshot().await.phase != phase {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .expect("engine never reached phase");
}

#[tokio::test]
async fn test_late_joiner_gets_state_then_history() {
    let harness = start(20.0).await;
    wait_for_phase(&harness.engine, RoundPhase::Driving).await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut ws = connect(harness.addr, None).await;

    let first = recv(&mut ws).await;
    assert_eq!(first["type"], "game_state");
    assert_eq!(first["state"], "driving");

    let second = recv(&mut ws).await;
    assert_eq!(second["type"], "history");
    assert!(second["items"].is_array());

    let current = recv(&mut ws).await;
    assert_eq!(current["type"], "multiplier");
    let snapshot_value = current["value"].as_f64().unwrap();
    assert!(snapshot_value > 1.0);

    let tick = recv(&mut ws).await;
    assert_eq!(tick["type"], "multiplier");
    assert!(tick["value"].as_f64().unwrap() >= snapshot_value);
}

#[tokio::test]
async fn test_watcher_cannot_bet() {
    let harness = start(20.0).await;
    let mut ws = connect(harness.addr, None).await;

    send(&mut ws, json!({"type": "place_bet", "amount": 10})).await;
    let error = recv_type(&mut ws, "error").await;
    assert_eq!(error["code"], "not_authenticated");
    assert!(harness.ledger.calls().is_empty());
}

#[tokio::test]
async fn test_malformed_frame_gets_error() {
    let harness = start(20.0).await;
    let mut ws = connect(harness.addr, Some("tok")).await;

    send(&mut ws, json!({"type": "launch_rocket"})).await;
    let error = recv_type(&mut ws, "error").await;
    assert_eq!(error["code"], "invalid_input");

    send(&mut ws, json!({"type": "ping", "timestamp": 42})).await;
    let pong = recv_type(&mut ws, "pong").await;
    assert_eq!(pong["timestamp"], 42);
    assert!(pong["server_time"].as_u64().unwrap() > 0);
}

#[tokio::test]
async fn test_bet_and_cash_out() {
    let harness = start(20.0).await;
    let mut ws = connect(harness.addr, Some("tok")).await;

    send(&mut ws, json!({"type": "place_bet", "amount": 10, "walletType": "balance"})).await;
    let accepted = recv_type(&mut ws, "bet_accepted").await;
    assert_eq!(accepted["game_id"], "g1");
    assert_eq!(accepted["roundSeq"], 1);
    assert_eq!(accepted["balances"]["balance"], 90);

    send(&mut ws, json!({"type": "get_balance"})).await;
    let balance = recv_type(&mut ws, "balance").await;
    assert_eq!(balance["balance"], 90.0);

    loop {
        let tick = recv_type(&mut ws, "multiplier").await;
        if tick["value"].as_f64().unwrap() >= 1.1 {
            break;
        }
    }
    send(&mut ws, json!({"type": "cash_out", "multiplier": 1.1, "roundSeq": 1})).await;
    let cashed = recv_type(&mut ws, "cashed_out").await;
    assert_eq!(cashed["multiplier"], 1.1);
    assert_eq!(cashed["amount"], 11.0);

    assert_eq!(
        harness.ledger.calls(),
        vec!["start tok 10".to_string(), "cashout g1 11".to_string()]
    );
}

#[tokio::test]
async fn test_crash_reveals_point_and_reports_loss() {
    let harness = start(1.1).await;
    let mut ws = connect(harness.addr, Some("tok")).await;

    send(&mut ws, json!({"type": "place_bet", "amount": 5})).await;

    let mut seen = Vec::new();
    loop {
        let msg = recv(&mut ws).await;
        let done = msg["type"] == "history" && !msg["items"].as_array().unwrap().is_empty();
        seen.push(msg);
        if done {
            break;
        }
    }

    let types: Vec<&str> = seen.iter().map(|m| m["type"].as_str().unwrap()).collect();
    let crashed = seen
        .iter()
        .position(|m| m["type"] == "game_state" && m["state"] == "crashed")
        .expect("no crashed state");
    let reveal = types.iter().position(|t| *t == "crash_point").expect("no crash_point");
    assert!(reveal > crashed, "crash point leaked before the crash: {:?}", types);

    assert_eq!(seen[reveal]["value"], 1.1);
    assert_eq!(types[reveal + 1], "bet_lost");
    assert_eq!(seen[reveal + 1]["multiplier"], 1.1);

    let history = seen.last().unwrap();
    assert_eq!(history["items"][0], json!({"multiplier": "1.10", "result": "crash", "winnings": 0}));

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(harness.ledger.calls().contains(&"lose g1 1.1".to_string()));
}
