//! One direction of a relayed session.
//!
//! A pipe reads bounded chunks from its source and writes each chunk in
//! full to its destination until the source closes, an I/O call fails,
//! or the session is cancelled. Cancellation is observed both while the
//! pipe waits on a read and while it waits on a write, so a peer that
//! stops reading cannot hold a cancelled session open. A chunk whose
//! write is cut short is discarded. On exit the destination's write side
//! is shut down.

use std::io;

use bytes::BytesMut;
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    sync::watch,
};

pub const RELAY_CHUNK: usize = 4096;

#[derive(Debug)]
pub enum PipeEnd {
    Eof,
    Cancelled,
    Read(io::Error),
    Write(io::Error),
}

#[derive(Debug)]
pub struct PipeReport {
    pub bytes: u64,
    pub end: PipeEnd,
}

pub async fn pipe<R, W>(mut src: R, mut dst: W, mut cancel: watch::Receiver<bool>) -> PipeReport
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut buf = BytesMut::with_capacity(RELAY_CHUNK);
    let mut bytes = 0u64;

    let end = loop {
        buf.clear();
        let read = tokio::select! {
            biased;
            _ = cancel.changed() => break PipeEnd::Cancelled,
            read = src.read_buf(&mut buf) => read,
        };

        match read {
            Ok(0) => break PipeEnd::Eof,
            Ok(n) => {
                let written = tokio::select! {
                    biased;
                    _ = cancel.changed() => break PipeEnd::Cancelled,
                    written = dst.write_all(&buf[..n]) => written,
                };
                if let Err(err) = written {
                    break PipeEnd::Write(err);
                }
                bytes += n as u64;
            }
            Err(err) => break PipeEnd::Read(err),
        }
    };

    // the peer may already be gone
    let _ = dst.shutdown().await;

    PipeReport { bytes, end }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use rand::RngCore;
    use tokio::io::duplex;

    use super::*;

    #[tokio::test]
    async fn copies_bytes_in_order_until_eof() {
        let (mut client, src) = duplex(RELAY_CHUNK);
        let (dst, mut sink) = duplex(1024);
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let mut payload = vec![0u8; 20_000];
        rand::thread_rng().fill_bytes(&mut payload);
        let expected = payload.clone();

        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
        });
        let relay = tokio::spawn(pipe(src, dst, cancel_rx));

        let mut received = Vec::new();
        sink.read_to_end(&mut received).await.unwrap();
        writer.await.unwrap();

        let report = relay.await.unwrap();
        assert_eq!(received, expected);
        assert_eq!(report.bytes, expected.len() as u64);
        assert!(matches!(report.end, PipeEnd::Eof));
    }

    #[tokio::test]
    async fn cancel_stops_an_idle_pipe() {
        let (_client, src) = duplex(RELAY_CHUNK);
        let (dst, mut sink) = duplex(1024);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let relay = tokio::spawn(pipe(src, dst, cancel_rx));
        cancel_tx.send(true).unwrap();

        let report = relay.await.unwrap();
        assert!(matches!(report.end, PipeEnd::Cancelled));
        assert_eq!(report.bytes, 0);

        // destination was shut down
        let mut rest = Vec::new();
        sink.read_to_end(&mut rest).await.unwrap();
        assert!(rest.is_empty());
    }

    #[tokio::test]
    async fn cancel_abandons_a_blocked_write() {
        let (mut client, src) = duplex(RELAY_CHUNK);
        let (dst, mut sink) = duplex(8);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        client.write_all(&[7u8; 100]).await.unwrap();
        let relay = tokio::spawn(pipe(src, dst, cancel_rx));

        // nobody drains the sink, so the pipe is stuck mid-write
        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel_tx.send(true).unwrap();

        let report = tokio::time::timeout(Duration::from_secs(5), relay)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(report.end, PipeEnd::Cancelled));
        assert_eq!(report.bytes, 0);

        // whatever fit in the buffer, then end of stream
        let mut received = Vec::new();
        sink.read_to_end(&mut received).await.unwrap();
        assert!(received.len() < 100);
    }

    #[tokio::test]
    async fn dropped_session_handle_cancels() {
        let (_client, src) = duplex(RELAY_CHUNK);
        let (dst, _sink) = duplex(1024);
        let (cancel_tx, cancel_rx) = watch::channel(false);

        let relay = tokio::spawn(pipe(src, dst, cancel_rx));
        drop(cancel_tx);

        let report = relay.await.unwrap();
        assert!(matches!(report.end, PipeEnd::Cancelled));
    }

    #[tokio::test]
    async fn closed_destination_is_a_write_error() {
        let (mut client, src) = duplex(RELAY_CHUNK);
        let (dst, sink) = duplex(1024);
        let (_cancel_tx, cancel_rx) = watch::channel(false);
        drop(sink);

        client.write_all(b"hello").await.unwrap();
        let report = pipe(src, dst, cancel_rx).await;
        assert!(matches!(report.end, PipeEnd::Write(_)));
        assert_eq!(report.bytes, 0);
    }
}
