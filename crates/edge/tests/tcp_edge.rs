use std::{
    net::SocketAddr,
    sync::Arc,
    time::{Duration, Instant},
};

use rand::RngCore;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    time::timeout,
};

use ferry_config::{Config, ServerConfig, config::Server};
use ferry_edge::{EdgeError, InstanceSlot, LoadBalancer};

const WAIT: Duration = Duration::from_secs(5);

/// Echo backend that greets every connection with `tag\n` and reports
/// each closed connection on the returned channel.
async fn tagged_backend(tag: &'static str) -> (ServerConfig, mpsc::UnboundedReceiver<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    let (closed_tx, closed_rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            let closed = closed_tx.clone();
            tokio::spawn(async move {
                if stream.write_all(format!("{tag}\n").as_bytes()).await.is_ok() {
                    let (mut reader, mut writer) = stream.split();
                    let _ = tokio::io::copy(&mut reader, &mut writer).await;
                }
                drop(stream);
                let _ = closed.send(());
            });
        }
    });

    (ServerConfig::new("127.0.0.1", port).unwrap(), closed_rx)
}

/// Backend that greets and hangs up immediately.
async fn hangup_backend(tag: &'static str) -> ServerConfig {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        while let Ok((mut stream, _)) = listener.accept().await {
            let _ = stream.write_all(format!("{tag}\n").as_bytes()).await;
        }
    });

    ServerConfig::new("127.0.0.1", port).unwrap()
}

fn start(slot: &InstanceSlot, algorithm: &str, servers: &[&ServerConfig]) -> Arc<LoadBalancer> {
    let config = Config {
        clients_port: 0,
        algorithm: algorithm.to_string(),
        servers: servers
            .iter()
            .map(|s| Server::new(s.address(), s.port()))
            .collect(),
        workers: Some(2),
        ..Config::default()
    };
    let balancer = slot.set_instance(&config).unwrap();
    balancer.start_work().unwrap();
    balancer
}

fn entry(balancer: &LoadBalancer) -> SocketAddr {
    let port = balancer.local_addr().unwrap().port();
    SocketAddr::from(([127, 0, 0, 1], port))
}

async fn connect(balancer: &LoadBalancer) -> TcpStream {
    TcpStream::connect(entry(balancer)).await.unwrap()
}

async fn read_tag(stream: &mut TcpStream) -> String {
    let mut line = Vec::new();
    let mut byte = [0u8; 1];
    timeout(WAIT, async {
        loop {
            stream.read_exact(&mut byte).await.unwrap();
            if byte[0] == b'\n' {
                break;
            }
            line.push(byte[0]);
        }
    })
    .await
    .unwrap();
    String::from_utf8(line).unwrap()
}

async fn read_all(stream: &mut TcpStream) -> Vec<u8> {
    let mut rest = Vec::new();
    timeout(WAIT, stream.read_to_end(&mut rest))
        .await
        .unwrap()
        .unwrap();
    rest
}

async fn wait_for_active(balancer: &LoadBalancer, server: &ServerConfig, expected: u32) {
    let deadline = Instant::now() + WAIT;
    while balancer.active_connections(server) != Some(expected) {
        assert!(
            Instant::now() < deadline,
            "{server} stuck at {:?} active, expected {expected}",
            balancer.active_connections(server)
        );
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn round_robin_cycles_in_attachment_order() {
    let (a, _a_closed) = tagged_backend("A").await;
    let (b, _b_closed) = tagged_backend("B").await;
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "roundrobin", &[&a, &b]);

    let mut tags = Vec::new();
    let mut clients = Vec::new();
    for _ in 0..3 {
        let mut client = connect(&balancer).await;
        tags.push(read_tag(&mut client).await);
        clients.push(client);
    }
    assert_eq!(tags, vec!["A", "B", "A"]);

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn least_connections_follows_session_lifetimes() {
    let (a, mut a_closed) = tagged_backend("A").await;
    let (b, _b_closed) = tagged_backend("B").await;
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "leastconnections", &[&a, &b]);

    let mut first = connect(&balancer).await;
    assert_eq!(read_tag(&mut first).await, "A");
    let mut second = connect(&balancer).await;
    assert_eq!(read_tag(&mut second).await, "B");
    assert_eq!(balancer.active_connections(&a), Some(1));
    assert_eq!(balancer.active_connections(&b), Some(1));

    drop(first);
    timeout(WAIT, a_closed.recv()).await.unwrap().unwrap();
    wait_for_active(&balancer, &a, 0).await;

    let mut third = connect(&balancer).await;
    assert_eq!(read_tag(&mut third).await, "A");
    assert_eq!(balancer.active_connections(&a), Some(1));

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn client_is_closed_when_no_backend_is_attached() {
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "roundrobin", &[]);

    let mut client = connect(&balancer).await;
    assert!(read_all(&mut client).await.is_empty());

    // the acceptor keeps going
    let (a, _a_closed) = tagged_backend("A").await;
    assert!(balancer.attach_server(a));
    let mut client = connect(&balancer).await;
    assert_eq!(read_tag(&mut client).await, "A");

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn relays_large_payload_in_order() {
    let (a, _a_closed) = tagged_backend("A").await;
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "roundrobin", &[&a]);

    let mut payload = vec![0u8; 256 * 1024];
    rand::thread_rng().fill_bytes(&mut payload);

    // the client keeps its write side open: a half-close ends the session
    let client = connect(&balancer).await;
    let (mut reader, mut writer) = client.into_split();
    let sent = payload.clone();
    let upload = tokio::spawn(async move {
        writer.write_all(&sent).await.unwrap();
        writer
    });

    let mut tag = [0u8; 2];
    timeout(WAIT, reader.read_exact(&mut tag)).await.unwrap().unwrap();
    assert_eq!(&tag, b"A\n");

    let mut echoed = vec![0u8; payload.len()];
    timeout(WAIT, reader.read_exact(&mut echoed))
        .await
        .unwrap()
        .unwrap();
    assert!(echoed == payload);
    upload.await.unwrap();

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn backend_hangup_reaches_the_client() {
    let a = hangup_backend("A").await;
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "leastconnections", &[&a]);

    let mut client = connect(&balancer).await;
    assert_eq!(read_all(&mut client).await, b"A\n");
    wait_for_active(&balancer, &a, 0).await;

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_backend_closes_client_and_releases_count() {
    let dead = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        ServerConfig::new("127.0.0.1", port).unwrap()
    };
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "leastconnections", &[&dead]);

    let mut client = connect(&balancer).await;
    assert!(read_all(&mut client).await.is_empty());
    wait_for_active(&balancer, &dead, 0).await;

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn detached_backend_keeps_its_sessions() {
    let (a, _a_closed) = tagged_backend("A").await;
    let (b, _b_closed) = tagged_backend("B").await;
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "roundrobin", &[&a, &b]);

    let mut first = connect(&balancer).await;
    assert_eq!(read_tag(&mut first).await, "A");
    assert!(balancer.detach_server(&a));
    assert_eq!(balancer.servers(), vec![b.clone()]);

    first.write_all(b"still open").await.unwrap();
    let mut echoed = [0u8; 10];
    timeout(WAIT, first.read_exact(&mut echoed)).await.unwrap().unwrap();
    assert_eq!(&echoed, b"still open");

    let mut second = connect(&balancer).await;
    assert_eq!(read_tag(&mut second).await, "B");

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn stop_drops_sessions_and_restart_starts_fresh() {
    let (a, _a_closed) = tagged_backend("A").await;
    let (b, _b_closed) = tagged_backend("B").await;
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "roundrobin", &[&a, &b]);

    let mut client = connect(&balancer).await;
    assert_eq!(read_tag(&mut client).await, "A");

    let stopping = Arc::clone(&balancer);
    tokio::task::spawn_blocking(move || stopping.stop_work())
        .await
        .unwrap()
        .unwrap();
    assert!(read_all(&mut client).await.is_empty());
    assert!(matches!(balancer.stop_work(), Err(EdgeError::NotActive)));

    balancer.start_work().unwrap();
    assert!(matches!(balancer.start_work(), Err(EdgeError::AlreadyStarted)));
    assert_eq!(balancer.servers(), vec![a.clone(), b.clone()]);

    let mut client = connect(&balancer).await;
    assert_eq!(read_tag(&mut client).await, "A");

    balancer.stop_work().unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn least_connections_counters_reset_on_stop() {
    let (a, _a_closed) = tagged_backend("A").await;
    let slot = InstanceSlot::new();
    let balancer = start(&slot, "leastconnections", &[&a]);

    let mut client = connect(&balancer).await;
    assert_eq!(read_tag(&mut client).await, "A");
    assert_eq!(balancer.active_connections(&a), Some(1));

    balancer.stop_work().unwrap();
    assert_eq!(balancer.active_connections(&a), Some(0));
}
