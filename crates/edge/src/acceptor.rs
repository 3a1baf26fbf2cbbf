use std::{
    net::SocketAddr,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

use log::{debug, error, info, warn};
use tokio::{
    net::{TcpListener, TcpStream},
    runtime::Builder,
    sync::oneshot,
};

use ferry_config::ServerConfig;
use ferry_transport::connector::connect_backend;

use crate::{
    error::{EdgeError, EdgeResult},
    router::Router,
    worker::SessionsWorker,
};

const ACCEPTOR_THREAD: &str = "ferry-acceptor";
const ACCEPT_BACKOFF: Duration = Duration::from_millis(10);

/// Accept loop on its own thread. Each accepted client gets a worker and
/// a backend, then a backend connection is opened off the accept path.
pub(crate) struct Acceptor {
    local_addr: SocketAddr,
    shutdown: Option<oneshot::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl Acceptor {
    pub(crate) fn spawn(
        listener: std::net::TcpListener,
        router: Arc<Router>,
        workers: Arc<[Arc<SessionsWorker>]>,
    ) -> EdgeResult<Self> {
        let local_addr = listener.local_addr()?;
        listener.set_nonblocking(true)?;

        let (shutdown, shutdown_rx) = oneshot::channel();
        let thread = thread::Builder::new()
            .name(ACCEPTOR_THREAD.to_string())
            .spawn(move || run(listener, router, workers, shutdown_rx))
            .map_err(|source| EdgeError::Spawn {
                name: ACCEPTOR_THREAD.to_string(),
                source,
            })?;

        Ok(Self {
            local_addr,
            shutdown: Some(shutdown),
            thread: Some(thread),
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stops accepting and waits for the accept thread. Clients whose
    /// backend connect is still pending are dropped.
    pub(crate) fn stop(&mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("acceptor thread panicked");
            }
        }
    }
}

impl Drop for Acceptor {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run(
    listener: std::net::TcpListener,
    router: Arc<Router>,
    workers: Arc<[Arc<SessionsWorker>]>,
    shutdown: oneshot::Receiver<()>,
) {
    let runtime = match Builder::new_current_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("acceptor: failed to build runtime: {}", err);
            return;
        }
    };

    runtime.block_on(async move {
        let listener = match TcpListener::from_std(listener) {
            Ok(listener) => listener,
            Err(err) => {
                error!("acceptor: failed to register listener: {}", err);
                return;
            }
        };
        accept_loop(listener, router, workers, shutdown).await;
    });
}

async fn accept_loop(
    listener: TcpListener,
    router: Arc<Router>,
    workers: Arc<[Arc<SessionsWorker>]>,
    mut shutdown: oneshot::Receiver<()>,
) {
    if let Ok(addr) = listener.local_addr() {
        info!("accepting clients on {addr} across {} workers", workers.len());
    }

    loop {
        let accepted = tokio::select! {
            _ = &mut shutdown => break,
            accepted = listener.accept() => accepted,
        };

        let (client, peer) = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                error!("accept failed: {}", err);
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        let worker = Arc::clone(&workers[router.pick_worker(workers.len())]);
        let backend = match router.next_backend() {
            Ok(backend) => backend,
            Err(err) => {
                debug!("refusing client {peer}: {err}");
                continue;
            }
        };

        debug!("client {peer} -> {backend} on worker {}", worker.id());
        tokio::spawn(hand_off(client, peer, backend, worker, Arc::clone(&router)));
    }

    info!("acceptor stopped");
}

async fn hand_off(
    client: TcpStream,
    peer: SocketAddr,
    backend: ServerConfig,
    worker: Arc<SessionsWorker>,
    router: Arc<Router>,
) {
    let upstream = match connect_backend(&backend).await {
        Ok(upstream) => upstream,
        Err(err) => {
            warn!("backend {backend} unreachable for client {peer}: {err}");
            router.signal(&backend);
            return;
        }
    };
    if let Err(err) = client.set_nodelay(true) {
        debug!("client {peer}: could not set TCP_NODELAY: {err}");
    }

    let sockets = client
        .into_std()
        .and_then(|client| Ok((client, upstream.into_std()?)));
    let (client, upstream) = match sockets {
        Ok(sockets) => sockets,
        Err(err) => {
            warn!("could not hand client {peer} to a worker: {err}");
            router.signal(&backend);
            return;
        }
    };

    if let Err(err) = worker.new_session(client, upstream, backend.clone()) {
        warn!("dropping client {peer}: {err}");
        router.signal(&backend);
    }
}
