use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::{Arc, Mutex, MutexGuard, PoisonError, Weak},
    thread::{self, JoinHandle},
};

use log::{debug, error, info, warn};

use ferry_config::{Config, ServerConfig};
use ferry_lb::LoadBalancing;

use crate::{
    acceptor::Acceptor,
    error::{EdgeError, EdgeResult},
    router::Router,
    worker::{SessionObserver, SessionsWorker},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Idle,
    Active,
}

struct WorkerHandle {
    worker: Arc<SessionsWorker>,
    thread: Option<JoinHandle<()>>,
}

struct Lifecycle {
    state: State,
    workers: Vec<WorkerHandle>,
    acceptor: Option<Acceptor>,
}

/// Owns the listening socket, the worker pool and the routing state.
///
/// Start and stop are serialized by the lifecycle lock. Backend
/// management goes through the router and works in either state.
pub struct LoadBalancer {
    clients_port: u16,
    workers: Option<usize>,
    router: Arc<Router>,
    lifecycle: Mutex<Lifecycle>,
}

impl LoadBalancer {
    fn new(config: &Config) -> EdgeResult<Self> {
        let mut strategy = LoadBalancing::from_config(&config.algorithm)?;
        for server in config.server_configs()? {
            if !strategy.attach(server.clone()) {
                warn!("backend {server} listed twice, keeping the first");
            }
        }

        Ok(Self {
            clients_port: config.clients_port,
            workers: config.workers,
            router: Arc::new(Router::new(strategy)),
            lifecycle: Mutex::new(Lifecycle {
                state: State::Idle,
                workers: Vec::new(),
                acceptor: None,
            }),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Lifecycle> {
        self.lifecycle.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> State {
        self.lock().state
    }

    pub fn is_active(&self) -> bool {
        self.state() == State::Active
    }

    pub fn clients_port(&self) -> u16 {
        self.clients_port
    }

    pub fn strategy_name(&self) -> &'static str {
        self.router.strategy_name()
    }

    /// Address actually bound while active. Differs from the configured
    /// port when that port is 0.
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.lock().acceptor.as_ref().map(Acceptor::local_addr)
    }

    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    /// Binds the clients port, starts the worker pool and begins
    /// accepting. Fails without side effects when the port is taken.
    pub fn start_work(&self) -> EdgeResult<()> {
        let mut lifecycle = self.lock();
        if lifecycle.state == State::Active {
            return Err(EdgeError::AlreadyStarted);
        }

        let pool_size = self.pool_size()?;
        let address = SocketAddr::from((Ipv4Addr::UNSPECIFIED, self.clients_port));
        let listener = std::net::TcpListener::bind(address)
            .map_err(|source| EdgeError::Bind { address, source })?;

        let observer: Arc<dyn SessionObserver> = self.router.clone();
        let mut workers = Vec::with_capacity(pool_size);
        for id in 0..pool_size {
            match spawn_worker(id, Arc::clone(&observer)) {
                Ok(handle) => workers.push(handle),
                Err(err) => {
                    stop_workers(&mut workers);
                    return Err(err);
                }
            }
        }

        let pool: Arc<[Arc<SessionsWorker>]> =
            workers.iter().map(|h| Arc::clone(&h.worker)).collect();
        let acceptor = match Acceptor::spawn(listener, Arc::clone(&self.router), pool) {
            Ok(acceptor) => acceptor,
            Err(err) => {
                stop_workers(&mut workers);
                return Err(err);
            }
        };

        info!(
            "load balancer started on {} ({}, {} workers, {} backends)",
            acceptor.local_addr(),
            self.router.strategy_name(),
            workers.len(),
            self.router.servers().len()
        );
        lifecycle.workers = workers;
        lifecycle.acceptor = Some(acceptor);
        lifecycle.state = State::Active;
        Ok(())
    }

    /// Stops accepting, drops every in-flight session and zeroes the
    /// strategy's counters. Attached backends are kept.
    pub fn stop_work(&self) -> EdgeResult<()> {
        let mut lifecycle = self.lock();
        if lifecycle.state != State::Active {
            return Err(EdgeError::NotActive);
        }

        if let Some(mut acceptor) = lifecycle.acceptor.take() {
            acceptor.stop();
        }
        stop_workers(&mut lifecycle.workers);
        self.router.reset();
        lifecycle.state = State::Idle;

        info!("load balancer stopped");
        Ok(())
    }

    /// Returns false when the backend is already attached.
    pub fn attach_server(&self, server: ServerConfig) -> bool {
        let attached = self.router.attach(server.clone());
        if attached {
            info!("attached backend {server}");
        }
        attached
    }

    /// Returns false when the backend was not attached. Sessions already
    /// relaying to it are left alone.
    pub fn detach_server(&self, server: &ServerConfig) -> bool {
        let detached = self.router.detach(server);
        if detached {
            info!("detached backend {server}");
        }
        detached
    }

    pub fn servers(&self) -> Vec<ServerConfig> {
        self.router.servers()
    }

    /// Reports that one session to `server` has ended.
    pub fn signal(&self, server: &ServerConfig) {
        self.router.signal(server);
    }

    pub fn active_connections(&self, server: &ServerConfig) -> Option<u32> {
        self.router.active_connections(server)
    }

    fn pool_size(&self) -> EdgeResult<usize> {
        let size = match self.workers {
            Some(size) => size,
            None => thread::available_parallelism().map_or(1, |n| n.get()),
        };
        if size == 0 {
            return Err(EdgeError::NoWorkers);
        }
        Ok(size)
    }
}

impl Drop for LoadBalancer {
    fn drop(&mut self) {
        if self.is_active() {
            if let Err(err) = self.stop_work() {
                debug!("stop on drop failed: {}", err);
            }
        }
    }
}

fn spawn_worker(id: usize, observer: Arc<dyn SessionObserver>) -> EdgeResult<WorkerHandle> {
    let worker = Arc::new(SessionsWorker::new(id, observer));
    let runner = Arc::clone(&worker);
    let name = format!("ferry-worker-{id}");

    let thread = thread::Builder::new()
        .name(name.clone())
        .spawn(move || runner.start_work())
        .map_err(|source| EdgeError::Spawn { name, source })?;

    Ok(WorkerHandle {
        worker,
        thread: Some(thread),
    })
}

fn stop_workers(workers: &mut Vec<WorkerHandle>) {
    for handle in workers.iter() {
        handle.worker.stop();
    }
    for mut handle in workers.drain(..) {
        if let Some(thread) = handle.thread.take() {
            if thread.join().is_err() {
                error!("session worker {} panicked", handle.worker.id());
            }
        }
    }
}

/// Holds the one live [`LoadBalancer`] of a process.
///
/// The slot keeps a weak reference, so once every handle to the current
/// instance is dropped a new one may be created.
#[derive(Default)]
pub struct InstanceSlot {
    current: Mutex<Weak<LoadBalancer>>,
}

impl InstanceSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the instance from `config` with its servers attached.
    /// Fails while a previous instance is still alive.
    pub fn set_instance(&self, config: &Config) -> EdgeResult<Arc<LoadBalancer>> {
        let mut current = self.current.lock().unwrap_or_else(PoisonError::into_inner);
        if current.upgrade().is_some() {
            return Err(EdgeError::AlreadyInitialized);
        }

        let balancer = Arc::new(LoadBalancer::new(config)?);
        *current = Arc::downgrade(&balancer);
        Ok(balancer)
    }

    pub fn instance(&self) -> Option<Arc<LoadBalancer>> {
        self.current
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .upgrade()
    }
}
