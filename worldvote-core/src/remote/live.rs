//! Live strategy: persistent WebSocket session with server push.
//!
//! The client sends FETCH / INCREMENT / PUT_SNAPSHOT requests, each tagged
//! with a message id, and the server answers with SNAPSHOT or ACK carrying
//! the same id. The server also pushes unsolicited SNAPSHOT frames (no id)
//! whenever the store changes, which is what feeds the subscription.
//!
//! Connection loss is handled with automatic reconnection and exponential
//! backoff. Requests queued while disconnected are delivered once the
//! session is back.

use super::{RemoteError, RemoteSnapshot};
use crate::tally::{self, Epoch, Tally};
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, RwLock};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Frames exchanged with the live server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum WireMessage {
    #[serde(rename = "FETCH")]
    Fetch { id: String },
    #[serde(rename = "INCREMENT")]
    Increment { id: String, key: String },
    #[serde(rename = "PUT_SNAPSHOT")]
    PutSnapshot {
        id: String,
        votes: BTreeMap<String, u64>,
        #[serde(rename = "resetEpoch")]
        reset_epoch: Epoch,
    },
    #[serde(rename = "SNAPSHOT")]
    Snapshot {
        #[serde(default)]
        id: Option<String>,
        #[serde(default)]
        votes: serde_json::Map<String, Value>,
        #[serde(rename = "resetEpoch", default)]
        reset_epoch: Option<Value>,
    },
    #[serde(rename = "ACK")]
    Ack { id: String },
    #[serde(rename = "ERROR")]
    Error { id: String, message: String },
}

type PendingReply = oneshot::Sender<Result<Option<RemoteSnapshot>, RemoteError>>;

pub struct LiveRemote {
    url: String,
    request_timeout: Duration,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    pending: Arc<RwLock<HashMap<String, PendingReply>>>,
    outgoing_tx: mpsc::Sender<WireMessage>,
    outgoing_rx: Option<mpsc::Receiver<WireMessage>>,
}

impl LiveRemote {
    pub fn new(
        url: &str,
        request_timeout: Duration,
        reconnect_delay: Duration,
        max_reconnect_delay: Duration,
    ) -> Self {
        let (outgoing_tx, outgoing_rx) = mpsc::channel(64);

        Self {
            url: url.to_string(),
            request_timeout,
            reconnect_delay,
            max_reconnect_delay,
            pending: Arc::new(RwLock::new(HashMap::new())),
            outgoing_tx,
            outgoing_rx: Some(outgoing_rx),
        }
    }

    pub async fn fetch_snapshot(&self) -> Result<RemoteSnapshot, RemoteError> {
        let id = Uuid::new_v4().to_string();
        match self.request(id.clone(), WireMessage::Fetch { id }).await? {
            Some(snapshot) => Ok(snapshot),
            None => Err(RemoteError::InvalidResponse(
                "fetch acknowledged without a snapshot".to_string(),
            )),
        }
    }

    pub async fn increment(&self, key: &str) -> Result<(), RemoteError> {
        let id = Uuid::new_v4().to_string();
        self.request(
            id.clone(),
            WireMessage::Increment {
                id,
                key: key.to_string(),
            },
        )
        .await?;
        Ok(())
    }

    pub async fn push_full(
        &self,
        votes: &BTreeMap<String, u64>,
        epoch: Epoch,
    ) -> Result<(), RemoteError> {
        let id = Uuid::new_v4().to_string();
        self.request(
            id.clone(),
            WireMessage::PutSnapshot {
                id,
                votes: votes.clone(),
                reset_epoch: epoch,
            },
        )
        .await?;
        Ok(())
    }

    /// Send a request frame and wait for the reply carrying the same id.
    async fn request(
        &self,
        id: String,
        message: WireMessage,
    ) -> Result<Option<RemoteSnapshot>, RemoteError> {
        let (reply_tx, reply_rx) = oneshot::channel();

        {
            let mut pending = self.pending.write().await;
            pending.insert(id.clone(), reply_tx);
        }

        if self.outgoing_tx.send(message).await.is_err() {
            self.pending.write().await.remove(&id);
            return Err(RemoteError::ConnectionClosed);
        }

        match tokio::time::timeout(self.request_timeout, reply_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(RemoteError::ConnectionClosed),
            Err(_) => {
                self.pending.write().await.remove(&id);
                Err(RemoteError::Timeout)
            }
        }
    }

    /// Starts the connection loop and returns the server-push feed. The
    /// loop reconnects with exponential backoff until the subscriber goes
    /// away.
    pub fn subscribe(&mut self) -> mpsc::Receiver<RemoteSnapshot> {
        let (snapshot_tx, snapshot_rx) = mpsc::channel(32);

        match self.outgoing_rx.take() {
            Some(outgoing_rx) => {
                let session = SessionLoop {
                    url: self.url.clone(),
                    reconnect_delay: self.reconnect_delay,
                    max_reconnect_delay: self.max_reconnect_delay,
                    pending: self.pending.clone(),
                };
                tokio::spawn(session.run(outgoing_rx, snapshot_tx));
            }
            None => warn!("Remote: Live session already started"),
        }

        snapshot_rx
    }
}

/// Connection half of the live strategy, owned by the spawned task.
struct SessionLoop {
    url: String,
    reconnect_delay: Duration,
    max_reconnect_delay: Duration,
    pending: Arc<RwLock<HashMap<String, PendingReply>>>,
}

impl SessionLoop {
    async fn run(
        self,
        mut outgoing_rx: mpsc::Receiver<WireMessage>,
        snapshot_tx: mpsc::Sender<RemoteSnapshot>,
    ) {
        let mut reconnect_delay = self.reconnect_delay;

        loop {
            info!("Remote: Connecting to {}", self.url);

            match self.connect_and_run(&mut outgoing_rx, &snapshot_tx).await {
                Ok(()) => {
                    info!("Remote: Session closed gracefully");
                    break;
                }
                Err(e) => {
                    warn!("Remote: Connection lost: {}", e);

                    // Wake up callers parked on requests that will never
                    // be answered.
                    self.pending.write().await.clear();

                    if snapshot_tx.is_closed() {
                        debug!("Remote: Subscriber gone, stopping session loop");
                        break;
                    }

                    let delay = reconnect_delay + reconnect_jitter();
                    info!("Remote: Reconnecting in {:?}", delay);
                    tokio::time::sleep(delay).await;
                    reconnect_delay = std::cmp::min(reconnect_delay * 2, self.max_reconnect_delay);
                }
            }
        }
    }

    /// Connect and pump frames until disconnection.
    async fn connect_and_run(
        &self,
        outgoing_rx: &mut mpsc::Receiver<WireMessage>,
        snapshot_tx: &mpsc::Sender<RemoteSnapshot>,
    ) -> Result<(), RemoteError> {
        let (ws_stream, _) = connect_async(&self.url)
            .await
            .map_err(|e| RemoteError::Unavailable(e.to_string()))?;

        info!("Remote: Connected to {}", self.url);
        let (mut ws_tx, mut ws_rx) = ws_stream.split();

        loop {
            tokio::select! {
                msg = ws_rx.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            debug!("Remote: Received: {}", text);
                            self.handle_frame(&text, snapshot_tx).await;
                        }
                        Some(Ok(Message::Close(_))) => {
                            info!("Remote: Closed by server");
                            return Err(RemoteError::ConnectionClosed);
                        }
                        Some(Ok(Message::Ping(_))) => {
                            // Pong is handled by tungstenite itself.
                            debug!("Remote: Received ping");
                        }
                        Some(Err(e)) => {
                            return Err(RemoteError::Unavailable(e.to_string()));
                        }
                        None => {
                            return Err(RemoteError::ConnectionClosed);
                        }
                        _ => {}
                    }
                }

                outgoing = outgoing_rx.recv() => {
                    match outgoing {
                        Some(message) => {
                            let text = serde_json::to_string(&message)?;
                            debug!("Remote: Sending: {}", text);
                            if let Err(e) = ws_tx.send(Message::Text(text.into())).await {
                                return Err(RemoteError::Unavailable(e.to_string()));
                            }
                        }
                        // All senders dropped, the remote itself is gone.
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    async fn handle_frame(&self, text: &str, snapshot_tx: &mpsc::Sender<RemoteSnapshot>) {
        match serde_json::from_str::<WireMessage>(text) {
            Ok(WireMessage::Snapshot {
                id,
                votes,
                reset_epoch,
            }) => {
                let snapshot = RemoteSnapshot {
                    tally: Tally::from_wire_map(&votes),
                    epoch: reset_epoch.as_ref().and_then(tally::parse_epoch),
                };

                match id {
                    // Reply to one of our requests.
                    Some(id) => self.resolve(&id, Ok(Some(snapshot))).await,
                    // Unsolicited push, feed the subscription.
                    None => {
                        let _ = snapshot_tx.send(snapshot).await;
                    }
                }
            }
            Ok(WireMessage::Ack { id }) => self.resolve(&id, Ok(None)).await,
            Ok(WireMessage::Error { id, message }) => {
                self.resolve(&id, Err(RemoteError::Unavailable(message))).await
            }
            Ok(other) => debug!("Remote: Ignoring frame: {:?}", other),
            Err(e) => warn!("Remote: Failed to parse frame: {}", e),
        }
    }

    async fn resolve(&self, id: &str, result: Result<Option<RemoteSnapshot>, RemoteError>) {
        let mut pending = self.pending.write().await;
        match pending.remove(id) {
            Some(reply_tx) => {
                let _ = reply_tx.send(result);
            }
            None => debug!("Remote: Reply for unknown request {}", id),
        }
    }
}

/// Small random spread so restarted clients do not reconnect in lockstep.
fn reconnect_jitter() -> Duration {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    Duration::from_millis(rng.gen_range(0..250))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_frames_serialize_with_type_tag() {
        let frame = WireMessage::Increment {
            id: "abc".to_string(),
            key: "RUS_unknown".to_string(),
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "INCREMENT");
        assert_eq!(json["id"], "abc");
        assert_eq!(json["key"], "RUS_unknown");

        let frame = WireMessage::PutSnapshot {
            id: "def".to_string(),
            votes: BTreeMap::from([("RUS".to_string(), 0)]),
            reset_epoch: 1000,
        };
        let json = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["type"], "PUT_SNAPSHOT");
        assert_eq!(json["resetEpoch"], 1000);
        assert_eq!(json["votes"]["RUS"], 0);
    }

    #[test]
    fn test_snapshot_frame_parses_with_and_without_id() {
        let pushed: WireMessage =
            serde_json::from_str(r#"{"type":"SNAPSHOT","votes":{"RUS":3},"resetEpoch":1000}"#)
                .unwrap();
        match pushed {
            WireMessage::Snapshot { id, votes, reset_epoch } => {
                assert_eq!(id, None);
                assert_eq!(votes["RUS"], 3);
                assert_eq!(reset_epoch, Some(Value::from(1000)));
            }
            other => panic!("Expected SNAPSHOT, got {:?}", other),
        }

        let reply: WireMessage =
            serde_json::from_str(r#"{"type":"SNAPSHOT","id":"abc","votes":{}}"#).unwrap();
        match reply {
            WireMessage::Snapshot { id, .. } => assert_eq!(id.as_deref(), Some("abc")),
            other => panic!("Expected SNAPSHOT, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_request_times_out_without_a_session() {
        let remote = LiveRemote::new(
            "ws://127.0.0.1:1/live",
            Duration::from_millis(20),
            Duration::from_secs(2),
            Duration::from_secs(60),
        );

        // No session loop is draining the queue, so the reply never comes.
        let result = remote.increment("RUS").await;
        assert!(matches!(result, Err(RemoteError::Timeout)));
        // The pending entry is cleaned up on timeout.
        assert!(remote.pending.read().await.is_empty());
    }

    #[tokio::test]
    async fn test_second_subscribe_returns_closed_feed() {
        let mut remote = LiveRemote::new(
            "ws://127.0.0.1:1/live",
            Duration::from_millis(20),
            Duration::from_millis(10),
            Duration::from_millis(10),
        );

        let _first = remote.subscribe();
        let mut second = remote.subscribe();
        assert!(second.recv().await.is_none());
    }
}
