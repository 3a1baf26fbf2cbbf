use log::trace;
use tokio::net::TcpStream;

use ferry_config::ServerConfig;

/// Opens a TCP connection to a backend. No retry and no timeout: a
/// failed connect is terminal for the one client waiting on it.
pub async fn connect_backend(server: &ServerConfig) -> std::io::Result<TcpStream> {
    let stream = TcpStream::connect(server.socket_addr()).await?;
    stream.set_nodelay(true)?;
    trace!("connected to backend {server} from {:?}", stream.local_addr());
    Ok(stream)
}
