use std::net::SocketAddr;

use clap::Parser;
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
};

#[derive(Parser)]
#[command(version, about = "Tagged TCP echo backend for ferry")]
struct Cli {
    #[arg(long, default_value_t = 9001)]
    port: u16,

    // First line sent to every client, defaults to "backend <port>"
    #[arg(long)]
    tag: Option<String>,
}

async fn serve(mut stream: TcpStream, tag: String) -> std::io::Result<u64> {
    stream.write_all(format!("{tag}\n").as_bytes()).await?;
    let (mut reader, mut writer) = stream.split();
    tokio::io::copy(&mut reader, &mut writer).await
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let cli = Cli::parse();
    let addr: SocketAddr = format!("127.0.0.1:{}", cli.port).parse()?;
    let tag = cli.tag.unwrap_or_else(|| format!("backend {}", cli.port));

    let listener = TcpListener::bind(addr).await?;
    println!("echo backend '{}' listening on {}", tag, addr);

    loop {
        let (stream, peer) = listener.accept().await?;
        let tag = tag.clone();

        tokio::spawn(async move {
            match serve(stream, tag).await {
                Ok(echoed) => println!("{peer}: closed after {echoed} bytes"),
                Err(err) => eprintln!("{peer}: {err}"),
            }
        });
    }
}
