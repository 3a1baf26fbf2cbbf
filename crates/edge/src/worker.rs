use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
};

use log::{debug, error, info, trace, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::TcpStream,
    runtime::Builder,
    sync::{mpsc, watch},
    task::{self, LocalSet},
};

use ferry_config::ServerConfig;
use ferry_transport::pipe::{PipeEnd, pipe};

use crate::error::{EdgeError, EdgeResult};

/// Receives the chosen backend of every session a worker tears down.
pub trait SessionObserver: Send + Sync {
    fn session_closed(&self, backend: &ServerConfig);
}

type SessionId = u64;

enum Command {
    NewSession {
        client: std::net::TcpStream,
        backend: std::net::TcpStream,
        chosen: ServerConfig,
    },
    Stop,
}

struct Session {
    backend: ServerConfig,
    client_peer: Option<SocketAddr>,
    cancel: watch::Sender<bool>,
}

/// One single-threaded event loop relaying any number of sessions.
///
/// The loop owns the session registry, so registration and teardown
/// never leave the worker's thread. Other threads talk to it only
/// through the command channel.
pub struct SessionsWorker {
    id: usize,
    commands: mpsc::UnboundedSender<Command>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Command>>>,
    observer: Arc<dyn SessionObserver>,
    active: AtomicUsize,
}

impl SessionsWorker {
    pub fn new(id: usize, observer: Arc<dyn SessionObserver>) -> Self {
        let (commands, inbox) = mpsc::unbounded_channel();
        Self {
            id,
            commands,
            inbox: Mutex::new(Some(inbox)),
            observer,
            active: AtomicUsize::new(0),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Sessions currently registered on this worker.
    pub fn session_count(&self) -> usize {
        self.active.load(Ordering::Relaxed)
    }

    /// Runs the event loop on the calling thread until [`stop`] is
    /// called. A worker runs at most once.
    ///
    /// [`stop`]: SessionsWorker::stop
    pub fn start_work(&self) {
        let inbox = self
            .inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(inbox) = inbox else {
            warn!("worker {} already ran, ignoring start", self.id);
            return;
        };

        let runtime = match Builder::new_current_thread().enable_all().build() {
            Ok(runtime) => runtime,
            Err(err) => {
                error!("worker {}: failed to build runtime: {}", self.id, err);
                return;
            }
        };

        debug!("worker {} started", self.id);
        let local = LocalSet::new();
        local.block_on(&runtime, self.run(inbox));

        // relays still parked in the set are dropped here, closing their sockets
        drop(local);
        drop(runtime);
        debug!("worker {} stopped", self.id);
    }

    /// Hands both sockets to this worker and starts relaying. Fails only
    /// when the worker has already stopped, in which case the sockets
    /// are closed.
    pub fn new_session(
        &self,
        client: std::net::TcpStream,
        backend: std::net::TcpStream,
        chosen: ServerConfig,
    ) -> EdgeResult<()> {
        self.commands
            .send(Command::NewSession {
                client,
                backend,
                chosen,
            })
            .map_err(|_| EdgeError::WorkerStopped(self.id))
    }

    pub fn stop(&self) {
        let _ = self.commands.send(Command::Stop);
    }

    async fn run(&self, mut inbox: mpsc::UnboundedReceiver<Command>) {
        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<SessionId>();
        let mut sessions: HashMap<SessionId, Session> = HashMap::new();
        let mut next_id: SessionId = 0;

        loop {
            tokio::select! {
                // `self.commands` keeps the channel open, so an idle worker
                // only leaves this loop on an explicit stop
                command = inbox.recv() => match command {
                    Some(Command::NewSession { client, backend, chosen }) => {
                        next_id += 1;
                        match open_session(next_id, client, backend, &chosen, &done_tx) {
                            Ok(session) => {
                                trace!(
                                    "worker {}: session {} for {:?} -> {}",
                                    self.id, next_id, session.client_peer, chosen
                                );
                                sessions.insert(next_id, session);
                                self.active.store(sessions.len(), Ordering::Relaxed);
                            }
                            Err(err) => {
                                warn!("worker {}: could not register session to {}: {}", self.id, chosen, err);
                                self.observer.session_closed(&chosen);
                            }
                        }
                    }
                    Some(Command::Stop) | None => break,
                },
                Some(id) = done_rx.recv() => self.teardown(&mut sessions, id),
            }
        }

        if !sessions.is_empty() {
            info!("worker {}: dropping {} in-flight sessions", self.id, sessions.len());
        }
        sessions.clear();
        self.active.store(0, Ordering::Relaxed);
    }

    fn teardown(&self, sessions: &mut HashMap<SessionId, Session>, id: SessionId) {
        // both directions report; only the first finds the session
        let Some(session) = sessions.remove(&id) else {
            return;
        };
        self.active.store(sessions.len(), Ordering::Relaxed);

        let _ = session.cancel.send(true);
        debug!(
            "worker {}: session {} for {:?} -> {} closed",
            self.id, id, session.client_peer, session.backend
        );
        self.observer.session_closed(&session.backend);
    }
}

fn open_session(
    id: SessionId,
    client: std::net::TcpStream,
    backend: std::net::TcpStream,
    chosen: &ServerConfig,
    done: &mpsc::UnboundedSender<SessionId>,
) -> std::io::Result<Session> {
    client.set_nonblocking(true)?;
    backend.set_nonblocking(true)?;
    let client = TcpStream::from_std(client)?;
    let backend = TcpStream::from_std(backend)?;
    let client_peer = client.peer_addr().ok();

    let (client_read, client_write) = client.into_split();
    let (backend_read, backend_write) = backend.into_split();
    let (cancel, cancel_rx) = watch::channel(false);

    spawn_direction(id, "client->backend", client_read, backend_write, cancel_rx.clone(), done.clone());
    spawn_direction(id, "backend->client", backend_read, client_write, cancel_rx, done.clone());

    Ok(Session {
        backend: chosen.clone(),
        client_peer,
        cancel,
    })
}

fn spawn_direction<R, W>(
    id: SessionId,
    direction: &'static str,
    src: R,
    dst: W,
    cancel: watch::Receiver<bool>,
    done: mpsc::UnboundedSender<SessionId>,
) where
    R: AsyncRead + Unpin + 'static,
    W: AsyncWrite + Unpin + 'static,
{
    task::spawn_local(async move {
        let report = pipe(src, dst, cancel).await;
        match &report.end {
            PipeEnd::Eof | PipeEnd::Cancelled => {
                trace!("session {id} {direction}: {:?} after {} bytes", report.end, report.bytes)
            }
            PipeEnd::Read(err) | PipeEnd::Write(err) => {
                debug!("session {id} {direction}: {err} after {} bytes", report.bytes)
            }
        }
        let _ = done.send(id);
    });
}
