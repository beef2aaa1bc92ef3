use chatbox_status_engine::PushStore;
use futures_util::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

pub mod message;

pub use message::{parse_push_frame, parse_push_message, ParseError};

const ACCEPT_ERROR_PAUSE: Duration = Duration::from_millis(100);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListenerState {
    Stopped,
    Starting,
    Running,
    StopRequested,
}

#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("failed to bind push listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// WebSocket endpoint the browser extension pushes media state to.
///
/// Started and stopped on demand; only `Stopped` allows a new start.
pub struct IngestListener {
    bind_addr: String,
    store: Arc<PushStore>,
    shutdown_timeout: Duration,
    state: ListenerState,
    local_addr: Option<SocketAddr>,
    stop_tx: Option<watch::Sender<bool>>,
    task: Option<JoinHandle<()>>,
}

impl IngestListener {
    pub fn new(bind_addr: impl Into<String>, store: Arc<PushStore>, shutdown_timeout: Duration) -> Self {
        Self {
            bind_addr: bind_addr.into(),
            store,
            shutdown_timeout,
            state: ListenerState::Stopped,
            local_addr: None,
            stop_tx: None,
            task: None,
        }
    }

    pub fn state(&self) -> ListenerState {
        self.state
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.local_addr
    }

    pub async fn start(&mut self) -> Result<(), ListenerError> {
        if self.state != ListenerState::Stopped {
            debug!(state = ?self.state, "push listener already active");
            return Ok(());
        }
        self.state = ListenerState::Starting;

        let listener = match TcpListener::bind(&self.bind_addr).await {
            Ok(listener) => listener,
            Err(source) => {
                self.state = ListenerState::Stopped;
                return Err(ListenerError::Bind {
                    addr: self.bind_addr.clone(),
                    source,
                });
            }
        };
        self.local_addr = listener.local_addr().ok();

        let (stop_tx, stop_rx) = watch::channel(false);
        self.task = Some(tokio::spawn(accept_loop(
            listener,
            self.store.clone(),
            stop_rx,
        )));
        self.stop_tx = Some(stop_tx);
        self.state = ListenerState::Running;

        info!(addr = ?self.local_addr, "push listener started");
        Ok(())
    }

    pub async fn stop(&mut self) {
        if self.state == ListenerState::Stopped {
            return;
        }
        self.state = ListenerState::StopRequested;

        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(true);
        }

        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            match tokio::time::timeout(self.shutdown_timeout, task).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) => warn!(error = %err, "push listener task ended abnormally"),
                Err(_) => {
                    warn!(timeout = ?self.shutdown_timeout, "push listener did not stop in time; aborting");
                    abort.abort();
                }
            }
        }

        self.local_addr = None;
        self.state = ListenerState::Stopped;
        info!("push listener stopped");
    }
}

async fn accept_loop(listener: TcpListener, store: Arc<PushStore>, mut stop: watch::Receiver<bool>) {
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, peer)) => {
                    tokio::spawn(serve_connection(stream, peer, store.clone(), stop.clone()));
                }
                Err(err) => {
                    warn!(error = %err, "push listener accept failed");
                    tokio::time::sleep(ACCEPT_ERROR_PAUSE).await;
                }
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    break;
                }
            }
        }
    }
    debug!("push listener accept loop exited");
}

async fn serve_connection(
    stream: TcpStream,
    peer: SocketAddr,
    store: Arc<PushStore>,
    mut stop: watch::Receiver<bool>,
) {
    // a peer that never finishes the upgrade must not outlive a stop
    let handshake = tokio::select! {
        result = tokio::time::timeout(HANDSHAKE_TIMEOUT, accept_async(stream)) => result,
        _ = stop.changed() => {
            debug!(%peer, "push listener stopped during handshake");
            return;
        }
    };
    let mut ws = match handshake {
        Ok(Ok(ws)) => ws,
        Ok(Err(err)) => {
            warn!(%peer, error = %err, "push websocket handshake failed");
            return;
        }
        Err(_) => {
            warn!(%peer, timeout = ?HANDSHAKE_TIMEOUT, "push websocket handshake timed out");
            return;
        }
    };
    info!(%peer, "push client connected");

    loop {
        tokio::select! {
            msg = ws.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    handle_update(parse_push_message(&text), &store, peer);
                }
                Some(Ok(Message::Binary(bytes))) => {
                    handle_update(parse_push_frame(&bytes), &store, peer);
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(%peer, error = %err, "push connection error");
                    break;
                }
            },
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    let _ = ws.close(None).await;
                    break;
                }
            }
        }
    }
    info!(%peer, "push client disconnected");
}

fn handle_update(
    parsed: Result<chatbox_status_core::PushUpdate, ParseError>,
    store: &PushStore,
    peer: SocketAddr,
) {
    match parsed {
        Ok(update) => {
            debug!(%peer, title = %update.title, live = update.is_live, "push update");
            store.write(update, Instant::now());
        }
        Err(err) => warn!(%peer, error = %err, "ignoring malformed push message"),
    }
}

#[cfg(test)]
mod tests {
    use super::{IngestListener, ListenerState};
    use chatbox_status_engine::PushStore;
    use futures_util::{SinkExt, StreamExt};
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::AsyncReadExt;
    use tokio_tungstenite::connect_async;
    use tokio_tungstenite::tungstenite::Message;

    fn listener(store: Arc<PushStore>) -> IngestListener {
        IngestListener::new("127.0.0.1:0", store, Duration::from_secs(5))
    }

    async fn wait_for_title(store: &PushStore, title: &str) {
        for _ in 0..100 {
            if store.read().title == title {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("push store never saw title {title:?}, has {:?}", store.read().title);
    }

    fn ws_url(addr: SocketAddr) -> String {
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn start_is_idempotent_and_restart_works() {
        let mut listener = listener(Arc::new(PushStore::new()));
        assert_eq!(listener.state(), ListenerState::Stopped);

        listener.start().await.unwrap();
        let first = listener.local_addr().unwrap();
        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);
        assert_eq!(listener.local_addr(), Some(first));

        listener.stop().await;
        assert_eq!(listener.state(), ListenerState::Stopped);
        assert_eq!(listener.local_addr(), None);
        listener.stop().await;

        listener.start().await.unwrap();
        assert_eq!(listener.state(), ListenerState::Running);
        listener.stop().await;
    }

    #[tokio::test]
    async fn bind_failure_returns_to_stopped() {
        let taken = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let mut listener =
            IngestListener::new(addr.to_string(), Arc::new(PushStore::new()), Duration::from_secs(5));

        assert!(listener.start().await.is_err());
        assert_eq!(listener.state(), ListenerState::Stopped);
    }

    #[tokio::test]
    async fn malformed_messages_keep_the_connection() {
        let store = Arc::new(PushStore::new());
        let mut listener = listener(store.clone());
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut client, _) = connect_async(ws_url(addr)).await.unwrap();
        client.send(Message::Text("not json".into())).await.unwrap();
        client
            .send(Message::Text(
                r#"{"title":"Video","uploader":"Chan","duration":90,"currentTime":12}"#.into(),
            ))
            .await
            .unwrap();

        wait_for_title(&store, "Video").await;
        let rec = store.read();
        assert_eq!(rec.source, "Chan");
        assert_eq!(rec.duration_secs, 90.0);
        assert!(rec.received_at.is_some());

        listener.stop().await;
    }

    #[tokio::test]
    async fn new_connections_do_not_drop_old_ones() {
        let store = Arc::new(PushStore::new());
        let mut listener = listener(store.clone());
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut first, _) = connect_async(ws_url(addr)).await.unwrap();
        first
            .send(Message::Text(r#"{"title":"one"}"#.into()))
            .await
            .unwrap();
        wait_for_title(&store, "one").await;

        let (mut second, _) = connect_async(ws_url(addr)).await.unwrap();
        second
            .send(Message::Text(r#"{"title":"two"}"#.into()))
            .await
            .unwrap();
        wait_for_title(&store, "two").await;

        first
            .send(Message::Text(r#"{"title":"three"}"#.into()))
            .await
            .unwrap();
        wait_for_title(&store, "three").await;

        drop(second);
        first
            .send(Message::Text(r#"{"title":"four"}"#.into()))
            .await
            .unwrap();
        wait_for_title(&store, "four").await;

        listener.stop().await;
    }

    fn free_port() -> u16 {
        let spare = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        spare.local_addr().unwrap().port()
    }

    #[tokio::test]
    async fn stop_closes_clients_and_frees_the_port() {
        let store = Arc::new(PushStore::new());
        let bind = format!("127.0.0.1:{}", free_port());
        let mut listener = IngestListener::new(bind.clone(), store.clone(), Duration::from_secs(5));
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (mut client, _) = connect_async(ws_url(addr)).await.unwrap();
        client
            .send(Message::Text(r#"{"title":"before"}"#.into()))
            .await
            .unwrap();
        wait_for_title(&store, "before").await;

        listener.stop().await;

        let closed = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                match client.next().await {
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(_)) => {}
                }
            }
        })
        .await;
        assert!(closed.is_ok(), "client was not closed by stop");

        let mut again = IngestListener::new(bind, store.clone(), Duration::from_secs(5));
        again.start().await.unwrap();
        assert_eq!(again.state(), ListenerState::Running);
        assert_eq!(again.local_addr(), Some(addr));

        let (mut client, _) = connect_async(ws_url(addr)).await.unwrap();
        client
            .send(Message::Text(r#"{"title":"after"}"#.into()))
            .await
            .unwrap();
        wait_for_title(&store, "after").await;

        again.stop().await;
    }

    #[tokio::test]
    async fn stop_drops_peers_stuck_before_the_upgrade() {
        let mut listener = listener(Arc::new(PushStore::new()));
        listener.start().await.unwrap();
        let addr = listener.local_addr().unwrap();

        // plain TCP, never sends the upgrade request
        let mut raw = tokio::net::TcpStream::connect(addr).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        listener.stop().await;

        let mut buf = [0u8; 16];
        let read = tokio::time::timeout(Duration::from_secs(2), raw.read(&mut buf))
            .await
            .expect("half-open peer was kept after stop");
        assert!(matches!(read, Ok(0) | Err(_)));
    }
}
