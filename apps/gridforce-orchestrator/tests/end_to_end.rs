use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use gridforce_orchestrator::session::SessionStatus;
use gridforce_orchestrator::settlement::{Settlement, SettlementError};
use gridforce_orchestrator::store::{self, MemoryStore, Store};
use gridforce_orchestrator::{build_router, AppState, StaticDirs};
use gridforce_protocol::{AuthPayload, Envelope, ProtocolMessage};
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio_tungstenite::tungstenite::Message;

type TestResult = Result<(), Box<dyn std::error::Error>>;

#[derive(Default)]
struct RecordingSettlement {
    mints: Mutex<Vec<(String, u64)>>,
}

#[async_trait]
impl Settlement for RecordingSettlement {
    async fn mint(&self, wallet: &str, amount: u64) -> Result<String, SettlementError> {
        self.mints.lock().push((wallet.to_string(), amount));
        Ok("0xmint".into())
    }
}

struct Harness {
    addr: SocketAddr,
    state: AppState,
    store: Arc<MemoryStore>,
    settlement: Arc<RecordingSettlement>,
}

async fn start() -> Result<Harness, Box<dyn std::error::Error>> {
    let store = MemoryStore::new();
    store::seed_demo_customer(store.as_ref()).await?;
    let settlement = Arc::new(RecordingSettlement::default());
    let state = AppState::new(
        store.clone(),
        Some(settlement.clone() as Arc<dyn Settlement>),
    );
    let router = build_router(state.clone(), StaticDirs::default());
    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        let _ = axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await;
    });
    Ok(Harness {
        addr,
        state,
        store,
        settlement,
    })
}

async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    for _ in 0..200 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}

fn auth_frame() -> Result<Message, Box<dyn std::error::Error>> {
    let auth = AuthPayload {
        device_id: "gpu-1".into(),
        wallet_address: "0xabc".into(),
        os: "linux".into(),
        arch: "amd64".into(),
        cpu_cores: 8,
    };
    Ok(Message::Text(Envelope::auth(&auth)?.to_json()?.into()))
}

#[tokio::test]
async fn provider_round_trip_earns_reward() -> TestResult {
    let harness = start().await?;
    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws", harness.addr)).await?;

    socket.send(auth_frame()?).await?;
    let registry = harness.state.registry.clone();
    assert!(
        eventually(|| registry
            .list()
            .first()
            .is_some_and(|s| s.status == SessionStatus::Online))
        .await
    );
    let sessions = registry.list();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].device_id, "gpu-1");
    assert_eq!(sessions[0].capabilities_summary, "linux/amd64 - 8 Cores");

    let http = reqwest::Client::new();
    let response = http
        .post(format!("http://{}/jobs", harness.addr))
        .header("X-API-KEY", store::DEMO_API_KEY)
        .json(&serde_json::json!({"image": "alpine", "cmd": ["echo", "hi"]}))
        .send()
        .await?;
    assert_eq!(response.status(), 200);
    assert_eq!(response.text().await?, "Job dispatched");

    let frame = tokio::time::timeout(Duration::from_secs(5), socket.next())
        .await?
        .ok_or("socket closed before offer")??;
    let offer = match Envelope::from_json(frame.to_text()?)?.decode()? {
        ProtocolMessage::JobOffer(offer) => offer,
        other => return Err(format!("expected offer, got {other:?}").into()),
    };
    assert_eq!(offer.image, "alpine");
    assert_eq!(offer.cmd, vec!["echo".to_string(), "hi".to_string()]);

    let result = Envelope::job_result("hi").to_json()?;
    socket.send(Message::Text(result.into())).await?;

    assert!(
        eventually(|| registry
            .list()
            .first()
            .is_some_and(|s| s.token_balance == 10))
        .await
    );
    let jobs = harness.store.jobs().await;
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].node_id, "gpu-1");
    assert_eq!(jobs[0].image, "alpine");
    assert_eq!(jobs[0].status, "COMPLETED");
    assert_eq!(jobs[0].result, "hi");
    assert_eq!(
        *harness.settlement.mints.lock(),
        vec![("0xabc".to_string(), 10)]
    );
    assert_eq!(
        harness
            .store
            .customer(store::DEMO_API_KEY)
            .await
            .ok_or("demo customer missing")?
            .credits,
        store::STARTING_CREDITS - 1
    );

    let api_jobs: serde_json::Value = http
        .get(format!("http://{}/api/jobs", harness.addr))
        .send()
        .await?
        .json()
        .await?;
    assert_eq!(api_jobs[0]["result"], "hi");
    Ok(())
}

#[tokio::test]
async fn disconnect_releases_session() -> TestResult {
    let harness = start().await?;
    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws", harness.addr)).await?;
    socket.send(auth_frame()?).await?;

    let registry = harness.state.registry.clone();
    assert!(eventually(|| registry.len() == 1).await);
    let key = registry.list()[0].connection_key.clone();

    socket.close(None).await?;
    assert!(eventually(|| registry.is_empty()).await);
    assert!(registry.get(&key).is_none());

    let mut disconnected = false;
    for _ in 0..200 {
        if let Some(node) = harness.store.find_node(key.as_str()).await? {
            if node.status == "DISCONNECTED" {
                disconnected = true;
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(disconnected);
    Ok(())
}

#[tokio::test]
async fn dispatch_without_providers_is_unavailable() -> TestResult {
    let harness = start().await?;
    let response = reqwest::Client::new()
        .post(format!("http://{}/jobs", harness.addr))
        .header("X-API-KEY", store::DEMO_API_KEY)
        .json(&serde_json::json!({"image": "alpine", "cmd": []}))
        .send()
        .await?;
    assert_eq!(response.status(), 503);
    Ok(())
}

#[tokio::test]
async fn garbage_frame_keeps_connection_open() -> TestResult {
    let harness = start().await?;
    let (mut socket, _) =
        tokio_tungstenite::connect_async(format!("ws://{}/ws", harness.addr)).await?;
    socket.send(Message::Text("not json".into())).await?;
    socket.send(auth_frame()?).await?;

    let registry = harness.state.registry.clone();
    assert!(
        eventually(|| registry
            .list()
            .first()
            .is_some_and(|s| s.status == SessionStatus::Online))
        .await
    );
    Ok(())
}
