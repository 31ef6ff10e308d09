//! TCP server exposing a `MemoryStore`
//!
//! Any number of sessions connect and share the same tree. Each
//! subscription gets a forwarding task that pushes `changed` frames.

use std::collections::HashMap;
use std::net::SocketAddr;

use tokio::io::{ReadHalf, WriteHalf};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::frame::{read_frame, write_frame};
use crate::memory::{CasOutcome, MemoryStore};
use crate::protocol::{Request, Response};
use crate::store::{RoomStore, Subscription};

/// Frames buffered per connection in each direction
const CHANNEL_CAPACITY: usize = 256;

/// Store server handle
pub struct StoreServer {
    addr: SocketAddr,
    store: MemoryStore,
    shutdown_tx: broadcast::Sender<()>,
}

impl StoreServer {
    /// Start a server with an empty store
    pub async fn start(port: u16) -> Result<Self> {
        Self::with_store(port, MemoryStore::new()).await
    }

    /// Start a server backed by an existing store
    pub async fn with_store(port: u16, store: MemoryStore) -> Result<Self> {
        let addr = SocketAddr::from(([0, 0, 0, 0], port));
        let listener = TcpListener::bind(addr).await?;
        let bound_addr = listener.local_addr()?;

        info!(addr = %bound_addr, "Store server started");

        let (shutdown_tx, _) = broadcast::channel(1);
        tokio::spawn(accept_loop(listener, store.clone(), shutdown_tx.clone()));

        Ok(StoreServer {
            addr: bound_addr,
            store,
            shutdown_tx,
        })
    }

    /// Get the server's bound address
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The tree this server serves
    pub fn store(&self) -> &MemoryStore {
        &self.store
    }

    /// Stop accepting and drop every connection
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
        info!("Store server shutdown initiated");
    }
}

impl Drop for StoreServer {
    fn drop(&mut self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Accept incoming connections
async fn accept_loop(listener: TcpListener, store: MemoryStore, shutdown_tx: broadcast::Sender<()>) {
    let mut shutdown_rx = shutdown_tx.subscribe();
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        debug!(addr = %addr, "New connection");
                        tokio::spawn(handle_connection(
                            stream,
                            addr,
                            store.clone(),
                            shutdown_tx.subscribe(),
                        ));
                    }
                    Err(e) => {
                        error!(error = %e, "Accept failed");
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("Accept loop shutting down");
                break;
            }
        }
    }
}

/// Per-connection state
struct Connection {
    addr: SocketAddr,
    store: MemoryStore,
    outbox: mpsc::Sender<Response>,
    subscriptions: HashMap<u64, JoinHandle<()>>,
}

/// Handle a single client connection
async fn handle_connection(
    stream: TcpStream,
    addr: SocketAddr,
    store: MemoryStore,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (reader, writer) = tokio::io::split(stream);

    let (outbox, outbox_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let writer_handle = tokio::spawn(writer_task(writer, outbox_rx));

    let (requests_tx, mut requests_rx) = mpsc::channel(CHANNEL_CAPACITY);
    let reader_handle = tokio::spawn(reader_task(reader, addr, requests_tx));

    let mut conn = Connection {
        addr,
        store,
        outbox,
        subscriptions: HashMap::new(),
    };

    loop {
        tokio::select! {
            request = requests_rx.recv() => {
                let Some(request) = request else { break };
                if let Err(e) = conn.handle_request(request).await {
                    debug!(addr = %addr, error = %e, "Dropping connection");
                    break;
                }
            }
            _ = shutdown_rx.recv() => {
                debug!(addr = %addr, "Closing connection for shutdown");
                break;
            }
        }
    }

    conn.close();
    reader_handle.abort();
    writer_handle.abort();
    info!(addr = %addr, "Client disconnected");
}

/// Reader task - decodes requests from the client
async fn reader_task(
    mut reader: ReadHalf<TcpStream>,
    addr: SocketAddr,
    requests: mpsc::Sender<Request>,
) {
    loop {
        match read_frame(&mut reader).await {
            Ok(request) => {
                if requests.send(request).await.is_err() {
                    break;
                }
            }
            Err(Error::ConnectionClosed) => {
                debug!(addr = %addr, "Connection closed");
                break;
            }
            Err(e) => {
                warn!(addr = %addr, error = %e, "Read error");
                break;
            }
        }
    }
}

/// Writer task - sends responses to the client
async fn writer_task(mut writer: WriteHalf<TcpStream>, mut rx: mpsc::Receiver<Response>) {
    while let Some(msg) = rx.recv().await {
        if let Err(e) = write_frame(&mut writer, &msg).await {
            debug!(error = %e, "Write failed");
            break;
        }
    }
}

/// Subscription task - pushes every change to the client
async fn forward_changes(id: u64, mut subscription: Subscription, outbox: mpsc::Sender<Response>) {
    while let Some(value) = subscription.recv().await {
        let changed = Response::Changed {
            subscription: id,
            value,
        };
        if outbox.send(changed).await.is_err() {
            break;
        }
    }
}

impl Connection {
    /// Serve one request. Errors only when the client is gone.
    async fn handle_request(&mut self, request: Request) -> Result<()> {
        let response = match request {
            Request::Get { id, path } => match self.store.get(&path).await {
                Ok(value) => Some(Response::Value { id, value }),
                Err(e) => Some(failed(id, e)),
            },
            Request::Set { id, path, value } => {
                Some(ack_or_failed(id, self.store.set(&path, value).await))
            }
            Request::Update { id, path, fields } => {
                Some(ack_or_failed(id, self.store.update(&path, fields).await))
            }
            Request::Remove { id, path } => {
                Some(ack_or_failed(id, self.store.remove(&path).await))
            }
            Request::CompareAndSet {
                id,
                path,
                expected,
                value,
            } => match self.store.compare_and_set(&path, expected.as_ref(), value) {
                Ok(CasOutcome::Applied) => Some(Response::Ack { id }),
                Ok(CasOutcome::Conflict(current)) => Some(Response::Conflict { id, current }),
                Err(e) => Some(failed(id, e)),
            },
            Request::Subscribe { id, path } => match self.store.subscribe(&path).await {
                Ok(subscription) => {
                    self.send(Response::Ack { id }).await?;
                    let handle = tokio::spawn(forward_changes(id, subscription, self.outbox.clone()));
                    if let Some(previous) = self.subscriptions.insert(id, handle) {
                        previous.abort();
                    }
                    debug!(addr = %self.addr, id, path = %path, "Subscribed");
                    None
                }
                Err(e) => Some(failed(id, e)),
            },
            Request::Unsubscribe { id } => {
                if let Some(handle) = self.subscriptions.remove(&id) {
                    handle.abort();
                    debug!(addr = %self.addr, id, "Unsubscribed");
                }
                None
            }
            Request::Ping { id } => Some(Response::Pong { id }),
        };

        match response {
            Some(response) => self.send(response).await,
            None => Ok(()),
        }
    }

    async fn send(&self, response: Response) -> Result<()> {
        self.outbox
            .send(response)
            .await
            .map_err(|_| Error::ConnectionClosed)
    }

    fn close(&mut self) {
        for (_, handle) in self.subscriptions.drain() {
            handle.abort();
        }
    }
}

fn ack_or_failed(id: u64, result: Result<()>) -> Response {
    match result {
        Ok(()) => Response::Ack { id },
        Err(e) => failed(id, e),
    }
}

fn failed(id: u64, error: Error) -> Response {
    Response::Failed {
        id,
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_server_start() {
        let server = StoreServer::start(0).await.unwrap();
        assert!(server.addr().port() > 0);
        server.shutdown();
    }

    #[tokio::test]
    async fn test_raw_request_response() {
        let server = StoreServer::start(0).await.unwrap();
        let stream = TcpStream::connect(("127.0.0.1", server.addr().port()))
            .await
            .unwrap();
        let (mut reader, mut writer) = tokio::io::split(stream);

        write_frame(&mut writer, &Request::Ping { id: 1 }).await.unwrap();
        let pong: Response = read_frame(&mut reader).await.unwrap();
        assert_eq!(pong, Response::Pong { id: 1 });

        let set = Request::Set {
            id: 2,
            path: "rooms/ABC123/viewers".into(),
            value: json!(3),
        };
        write_frame(&mut writer, &set).await.unwrap();
        let ack: Response = read_frame(&mut reader).await.unwrap();
        assert_eq!(ack, Response::Ack { id: 2 });
        assert_eq!(
            server.store().get("rooms/ABC123/viewers").await.unwrap(),
            Some(json!(3))
        );

        let bad = Request::Get {
            id: 3,
            path: "rooms/a.b".into(),
        };
        write_frame(&mut writer, &bad).await.unwrap();
        let failed: Response = read_frame(&mut reader).await.unwrap();
        assert!(matches!(failed, Response::Failed { id: 3, .. }));
    }
}
