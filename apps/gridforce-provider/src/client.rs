use std::future::Future;

use futures_util::{SinkExt, StreamExt};
use gridforce_protocol::{AuthPayload, Envelope, JobOffer, ProtocolError, ProtocolMessage};
use thiserror::Error;
use tokio_tungstenite::tungstenite::{
    self,
    protocol::{frame::coding::CloseCode, CloseFrame},
    Message,
};
use tracing::{info, warn};

use crate::runner::JobRunner;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("websocket error: {0}")]
    WebSocket(#[from] tungstenite::Error),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// Builds the websocket URL for `server`.
///
/// Explicit `ws://`/`wss://` URLs are kept. Otherwise the scheme is `wss` for
/// ngrok tunnels and `https` addresses and `ws` for everything else.
pub fn server_url(server: &str) -> String {
    let server = server.trim().trim_end_matches('/');
    if server.starts_with("ws://") || server.starts_with("wss://") {
        return if server.ends_with("/ws") {
            server.to_string()
        } else {
            format!("{server}/ws")
        };
    }
    let scheme = if server.contains("ngrok") || server.contains("https") {
        "wss"
    } else {
        "ws"
    };
    let host = server
        .strip_prefix("https://")
        .or_else(|| server.strip_prefix("http://"))
        .unwrap_or(server);
    format!("{scheme}://{host}/ws")
}

/// Runs `offer` and turns the outcome into the `JOB_RESULT` reply.
pub async fn execute_offer<R: JobRunner + ?Sized>(runner: &R, offer: &JobOffer) -> Envelope {
    info!(image = %offer.image, cmd = ?offer.cmd, "received job offer");
    let output = match runner.run(&offer.image, &offer.cmd).await {
        Ok(output) => output,
        Err(err) => {
            warn!(image = %offer.image, error = %err, "container run failed");
            format!("Error: {err}")
        }
    };
    info!(image = %offer.image, bytes = output.len(), "job completed");
    Envelope::job_result(&output)
}

/// Connects, authenticates and serves offers until the server goes away or
/// `shutdown` resolves, in which case a normal close frame is sent first.
pub async fn run<R, F>(
    url: &str,
    auth: &AuthPayload,
    runner: &R,
    shutdown: F,
) -> Result<(), ClientError>
where
    R: JobRunner + ?Sized,
    F: Future<Output = ()>,
{
    let (socket, _) = tokio_tungstenite::connect_async(url).await?;
    info!(url, wallet = %auth.wallet_address, "connected to orchestrator");
    let (mut tx, mut rx) = socket.split();

    tx.send(Message::Text(Envelope::auth(auth)?.to_json()?.into()))
        .await?;
    info!(
        os = %auth.os,
        arch = %auth.arch,
        cores = auth.cpu_cores,
        "sent AUTH"
    );

    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("interrupt received; closing connection");
                let close = CloseFrame {
                    code: CloseCode::Normal,
                    reason: "".into(),
                };
                if let Err(err) = tx.send(Message::Close(Some(close))).await {
                    warn!(error = %err, "failed to send close frame");
                }
                return Ok(());
            }
            frame = rx.next() => {
                let text = match frame {
                    Some(Ok(Message::Text(text))) => text.as_str().to_owned(),
                    Some(Ok(Message::Binary(bytes))) => String::from_utf8_lossy(&bytes).into_owned(),
                    Some(Ok(Message::Close(_))) | None => {
                        info!("orchestrator closed the connection");
                        return Ok(());
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(err)) => return Err(err.into()),
                };
                let offer = match Envelope::from_json(&text).and_then(|e| e.decode()) {
                    Ok(ProtocolMessage::JobOffer(offer)) => offer,
                    Ok(other) => {
                        warn!(message = ?other, "ignoring unexpected message");
                        continue;
                    }
                    Err(err) => {
                        warn!(error = %err, "dropping undecodable frame");
                        continue;
                    }
                };
                let reply = execute_offer(runner, &offer).await.to_json()?;
                tx.send(Message::Text(reply.into())).await?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use tokio::net::TcpListener;
    use tokio::sync::oneshot;

    use super::*;
    use crate::runner::RunnerError;

    #[test]
    fn picks_scheme_from_server_address() {
        assert_eq!(server_url("127.0.0.1:8080"), "ws://127.0.0.1:8080/ws");
        assert_eq!(
            server_url("abcd.ngrok-free.app"),
            "wss://abcd.ngrok-free.app/ws"
        );
        assert_eq!(
            server_url("https://grid.example.com"),
            "wss://grid.example.com/ws"
        );
        assert_eq!(server_url("ws://10.0.0.1:8080/ws"), "ws://10.0.0.1:8080/ws");
        assert_eq!(server_url("wss://grid.example.com/"), "wss://grid.example.com/ws");
    }

    struct FakeRunner {
        fail: bool,
        seen: Mutex<Vec<(String, Vec<String>)>>,
    }

    impl FakeRunner {
        fn new(fail: bool) -> Self {
            Self {
                fail,
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl JobRunner for FakeRunner {
        async fn run(&self, image: &str, cmd: &[String]) -> Result<String, RunnerError> {
            self.seen
                .lock()
                .unwrap()
                .push((image.to_string(), cmd.to_vec()));
            if self.fail {
                return Err(RunnerError::InvalidApiVersion("x".into()));
            }
            Ok(format!("{}\n", cmd[1..].join(" ")))
        }
    }

    fn offer() -> JobOffer {
        JobOffer::new("alpine", vec!["echo".into(), "hi".into()])
    }

    #[tokio::test]
    async fn offer_output_becomes_result() {
        let runner = FakeRunner::new(false);
        let reply = execute_offer(&runner, &offer()).await;
        assert_eq!(reply.decode_job_result().unwrap(), "hi\n");
    }

    #[tokio::test]
    async fn runner_failure_is_reported_as_error_text() {
        let runner = FakeRunner::new(true);
        let reply = execute_offer(&runner, &offer()).await;
        let text = reply.decode_job_result().unwrap();
        assert!(text.starts_with("Error: "), "{text}");
    }

    #[tokio::test]
    async fn serves_offer_over_websocket_and_closes_on_shutdown() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

            let auth = ws.next().await.unwrap().unwrap();
            let auth = Envelope::from_json(auth.to_text().unwrap())
                .unwrap()
                .decode_auth()
                .unwrap();

            let offer_text = Envelope::job_offer(&offer()).unwrap().to_json().unwrap();
            ws.send(Message::Text(offer_text.into())).await.unwrap();
            let result = ws.next().await.unwrap().unwrap();
            let result = Envelope::from_json(result.to_text().unwrap())
                .unwrap()
                .decode_job_result()
                .unwrap();

            let _ = stop_tx.send(());
            let close = ws.next().await.unwrap().unwrap();
            (auth, result, close)
        });

        let runner = FakeRunner::new(false);
        let auth = AuthPayload {
            device_id: "gpu-node-01".into(),
            wallet_address: "0xabc".into(),
            os: "linux".into(),
            arch: "amd64".into(),
            cpu_cores: 4,
        };
        run(
            &server_url(&addr.to_string()),
            &auth,
            &runner,
            async move {
                let _ = stop_rx.await;
            },
        )
        .await
        .unwrap();

        let (seen_auth, result, close) = server.await.unwrap();
        assert_eq!(seen_auth, auth);
        assert_eq!(result, "hi\n");
        match close {
            Message::Close(Some(frame)) => assert_eq!(frame.code, CloseCode::Normal),
            other => panic!("expected close frame, got {other:?}"),
        }
        assert_eq!(runner.seen.lock().unwrap().len(), 1);
    }
}
