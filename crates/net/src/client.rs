//! TCP client for a remote room store

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio::time::timeout;
use tracing::{debug, info, instrument, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::protocol::{Request, Response};
use crate::store::{RoomStore, Subscription};

/// The store must answer the first ping within this window
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Compare-and-set attempts before a transaction gives up
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 25;

/// Handle to a connected store. Cheap to clone; the connection closes when
/// the last clone and the last subscription are gone.
#[derive(Clone)]
pub struct RemoteStore {
    inner: Arc<Inner>,
}

struct Inner {
    addr: String,
    next_id: AtomicU64,
    cmd_tx: mpsc::Sender<ClientCommand>,
}

enum ClientCommand {
    Request {
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    Subscribe {
        request: Request,
        updates: mpsc::UnboundedSender<Option<Value>>,
        reply: oneshot::Sender<Response>,
    },
    Unsubscribe {
        id: u64,
    },
}

impl RemoteStore {
    /// Connect and complete the ping handshake
    pub async fn connect(addr: &str) -> Result<Self> {
        info!(addr = %addr, "Connecting to store");

        let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr))
            .await
            .map_err(|_| Error::Timeout)??;
        let (reader, writer) = tokio::io::split(stream);

        let (cmd_tx, cmd_rx) = mpsc::channel(64);
        let (incoming_tx, incoming_rx) = mpsc::channel(256);
        tokio::spawn(reader_task(reader, incoming_tx));
        tokio::spawn(connection_task(writer, cmd_rx, incoming_rx));

        let store = RemoteStore {
            inner: Arc::new(Inner {
                addr: addr.to_string(),
                next_id: AtomicU64::new(1),
                cmd_tx,
            }),
        };

        timeout(CONNECT_TIMEOUT, store.ping())
            .await
            .map_err(|_| Error::Timeout)??;

        info!(addr = %addr, "Connected to store");
        Ok(store)
    }

    pub fn addr(&self) -> &str {
        &self.inner.addr
    }

    /// Round-trip a ping
    pub async fn ping(&self) -> Result<()> {
        match self.request(|id| Request::Ping { id }).await? {
            Response::Pong { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    async fn request<F>(&self, build: F) -> Result<Response>
    where
        F: FnOnce(u64) -> Request,
    {
        let (reply, rx) = oneshot::channel();
        let request = build(self.next_id());
        self.inner
            .cmd_tx
            .send(ClientCommand::Request { request, reply })
            .await
            .map_err(|_| Error::NotConnected)?;
        rx.await.map_err(|_| Error::ConnectionClosed)
    }

    async fn expect_ack<F>(&self, build: F) -> Result<()>
    where
        F: FnOnce(u64) -> Request,
    {
        match self.request(build).await? {
            Response::Ack { .. } => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}

impl RoomStore for RemoteStore {
    #[instrument(level = "debug", skip(self))]
    async fn get(&self, path: &str) -> Result<Option<Value>> {
        let path = path.to_string();
        match self.request(|id| Request::Get { id, path }).await? {
            Response::Value { value, .. } => Ok(value),
            other => Err(unexpected(other)),
        }
    }

    #[instrument(level = "debug", skip(self, value))]
    async fn set(&self, path: &str, value: Value) -> Result<()> {
        let path = path.to_string();
        self.expect_ack(|id| Request::Set { id, path, value }).await
    }

    #[instrument(level = "debug", skip(self, fields))]
    async fn update(&self, path: &str, fields: Map<String, Value>) -> Result<()> {
        let path = path.to_string();
        self.expect_ack(|id| Request::Update { id, path, fields }).await
    }

    #[instrument(level = "debug", skip(self))]
    async fn remove(&self, path: &str) -> Result<()> {
        let path = path.to_string();
        self.expect_ack(|id| Request::Remove { id, path }).await
    }

    #[instrument(level = "debug", skip(self, apply))]
    async fn transaction<F>(&self, path: &str, apply: F) -> Result<Value>
    where
        F: Fn(Option<Value>) -> Value + Send + 'static,
    {
        let mut current = self.get(path).await?;

        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let next = apply(current.clone());
            let expected = current.clone();
            let value = next.clone();
            let path_owned = path.to_string();
            let response = self
                .request(|id| Request::CompareAndSet {
                    id,
                    path: path_owned,
                    expected,
                    value,
                })
                .await?;

            match response {
                Response::Ack { .. } => return Ok(next),
                Response::Conflict { current: now, .. } => {
                    debug!(path = %path, attempt, "Transaction conflict, retrying");
                    current = now;
                }
                other => return Err(unexpected(other)),
            }
        }

        warn!(path = %path, "Transaction gave up");
        Err(Error::TransactionAborted {
            path: path.to_string(),
            attempts: MAX_TRANSACTION_ATTEMPTS,
        })
    }

    #[instrument(level = "debug", skip(self))]
    async fn subscribe(&self, path: &str) -> Result<Subscription> {
        let id = self.next_id();
        let (updates, rx) = mpsc::unbounded_channel();
        let (reply, reply_rx) = oneshot::channel();

        let cmd_tx = self.inner.cmd_tx.clone();
        // Built first so a failed subscribe still cleans up its route
        let subscription = Subscription::new(path.to_string(), rx, move || {
            if cmd_tx.try_send(ClientCommand::Unsubscribe { id }).is_err() {
                debug!(id, "Unsubscribe not delivered");
            }
        });

        let request = Request::Subscribe {
            id,
            path: path.to_string(),
        };
        self.inner
            .cmd_tx
            .send(ClientCommand::Subscribe {
                request,
                updates,
                reply,
            })
            .await
            .map_err(|_| Error::NotConnected)?;

        match reply_rx.await.map_err(|_| Error::ConnectionClosed)? {
            Response::Ack { .. } => Ok(subscription),
            other => Err(unexpected(other)),
        }
    }
}

fn unexpected(response: Response) -> Error {
    match response {
        Response::Failed { reason, .. } => Error::Rejected(reason),
        other => Error::Protocol(format!("Unexpected response: {:?}", other)),
    }
}

/// Reader task - decodes server frames
async fn reader_task(mut reader: ReadHalf<TcpStream>, incoming: mpsc::Sender<Response>) {
    loop {
        match read_frame(&mut reader).await {
            Ok(response) => {
                if incoming.send(response).await.is_err() {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!("Store closed connection");
                break;
            }
            Err(e) => {
                warn!(error = %e, "Read error");
                break;
            }
        }
    }
}

/// Main connection task - routes replies and subscription pushes
async fn connection_task(
    mut writer: WriteHalf<TcpStream>,
    mut cmd_rx: mpsc::Receiver<ClientCommand>,
    mut incoming: mpsc::Receiver<Response>,
) {
    let mut pending: HashMap<u64, oneshot::Sender<Response>> = HashMap::new();
    let mut subscriptions: HashMap<u64, mpsc::UnboundedSender<Option<Value>>> = HashMap::new();

    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let outgoing = match cmd {
                    Some(ClientCommand::Request { request, reply }) => {
                        pending.insert(request.id(), reply);
                        request
                    }
                    Some(ClientCommand::Subscribe { request, updates, reply }) => {
                        subscriptions.insert(request.id(), updates);
                        pending.insert(request.id(), reply);
                        request
                    }
                    Some(ClientCommand::Unsubscribe { id }) => {
                        if subscriptions.remove(&id).is_none() {
                            continue;
                        }
                        Request::Unsubscribe { id }
                    }
                    None => {
                        debug!("All store handles dropped");
                        break;
                    }
                };

                if let Err(e) = write_frame(&mut writer, &outgoing).await {
                    warn!(error = %e, "Write error");
                    break;
                }
            }

            response = incoming.recv() => {
                let Some(response) = response else { break };
                match response {
                    Response::Changed { subscription, value } => {
                        let delivered = subscriptions
                            .get(&subscription)
                            .map(|tx| tx.send(value).is_ok());
                        if delivered == Some(false) {
                            subscriptions.remove(&subscription);
                        }
                    }
                    other => {
                        let id = other.request_id();
                        match id.and_then(|id| pending.remove(&id)) {
                            Some(reply) => {
                                let _ = reply.send(other);
                            }
                            None => debug!(?id, "Reply for unknown request"),
                        }
                    }
                }
            }
        }
    }

    // Dropping the maps fails every waiter and ends every subscription
    info!(pending = pending.len(), subscriptions = subscriptions.len(), "Disconnected from store");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::StoreServer;
    use serde_json::json;

    async fn connect(server: &StoreServer) -> RemoteStore {
        RemoteStore::connect(&format!("127.0.0.1:{}", server.addr().port()))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_set_get_update_remove() {
        let server = StoreServer::start(0).await.unwrap();
        let store = connect(&server).await;

        store.set("rooms/ABC123", json!({"names": ["A"], "viewers": 1})).await.unwrap();
        assert_eq!(
            store.get("rooms/ABC123/names").await.unwrap(),
            Some(json!(["A"]))
        );

        let mut fields = Map::new();
        fields.insert("names".into(), json!(["B"]));
        store.update("rooms/ABC123", fields).await.unwrap();
        assert_eq!(
            store.get("rooms/ABC123").await.unwrap(),
            Some(json!({"names": ["B"], "viewers": 1}))
        );

        store.remove("rooms/ABC123").await.unwrap();
        assert_eq!(store.get("rooms/ABC123").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_invalid_path_rejected() {
        let server = StoreServer::start(0).await.unwrap();
        let store = connect(&server).await;
        let result = store.set("rooms/a#b", json!(1)).await;
        assert!(matches!(result, Err(Error::Rejected(_))));
    }

    #[tokio::test]
    async fn test_subscribe_across_clients() {
        let server = StoreServer::start(0).await.unwrap();
        let host = connect(&server).await;
        let viewer = connect(&server).await;

        let mut sub = viewer.subscribe("rooms/R/spinEvent").await.unwrap();
        assert_eq!(sub.recv().await, Some(None));

        host.set("rooms/R/spinEvent", json!({"intensity": 4})).await.unwrap();
        assert_eq!(sub.recv().await, Some(Some(json!({"intensity": 4}))));

        host.remove("rooms/R/spinEvent").await.unwrap();
        assert_eq!(sub.recv().await, Some(None));
    }

    #[tokio::test]
    async fn test_spin_message_floats_survive_the_wire() {
        use rand::rngs::StdRng;
        use rand::{Rng, SeedableRng};
        use spinroom_core::{Intensity, SpinMessage};

        let server = StoreServer::start(0).await.unwrap();
        let host = connect(&server).await;
        let viewer = connect(&server).await;

        let mut sub = viewer.subscribe("rooms/R/spinEvent").await.unwrap();
        assert_eq!(sub.recv().await, Some(None));

        let mut rng = StdRng::seed_from_u64(0x5eed);
        for level in 1..=10 {
            let start_rotation = rng.gen::<f64>() * 1000.0 - 500.0;
            let sent = SpinMessage::generate(
                Intensity::new(level).unwrap(),
                start_rotation,
                1_700_000_000_000 + i64::from(level),
                &mut rng,
            );

            host.set("rooms/R/spinEvent", serde_json::to_value(&sent).unwrap())
                .await
                .unwrap();
            let value = sub.recv().await.unwrap().unwrap();
            let received: SpinMessage = serde_json::from_value(value).unwrap();

            assert_eq!(received, sent);
            assert_eq!(
                received.final_rotation().to_bits(),
                sent.final_rotation().to_bits()
            );
        }
    }

    #[tokio::test]
    async fn test_concurrent_transactions() {
        let server = StoreServer::start(0).await.unwrap();
        let mut handles = Vec::new();

        for _ in 0..8 {
            let store = connect(&server).await;
            handles.push(tokio::spawn(async move {
                store
                    .transaction("rooms/R/viewers", |current| {
                        json!(current.and_then(|v| v.as_u64()).unwrap_or(0) + 1)
                    })
                    .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(
            server.store().get("rooms/R/viewers").await.unwrap(),
            Some(json!(8))
        );
    }

    #[tokio::test]
    async fn test_dropped_subscription_reaches_server() {
        let server = StoreServer::start(0).await.unwrap();
        let store = connect(&server).await;

        let sub = store.subscribe("rooms/R").await.unwrap();
        assert_eq!(server.store().subscriber_count(), 1);
        drop(sub);

        for _ in 0..100 {
            if server.store().subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert_eq!(server.store().subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_connect_refused() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let result = RemoteStore::connect(&format!("127.0.0.1:{}", port)).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_server_shutdown_ends_subscriptions() {
        let server = StoreServer::start(0).await.unwrap();
        let store = connect(&server).await;
        let mut sub = store.subscribe("rooms/R").await.unwrap();
        assert_eq!(sub.recv().await, Some(None));

        server.shutdown();
        assert_eq!(sub.recv().await, None);
        assert!(store.get("rooms/R").await.is_err());
    }
}
