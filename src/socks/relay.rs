//! Half-duplex relay tasks
//!
//! A CONNECT session runs two of these, one per direction. Each task copies
//! bytes through a small buffer, feeds a byte counter, and half-closes its
//! destination when the source reaches EOF so the peer observes FIN.

use crate::socks::consts::RELAY_BUFFER_SIZE;
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::task::JoinHandle;

/// Spawn a one-direction relay from `src` to `dst`.
///
/// `count` is invoked with the byte count of every successful read, before
/// the bytes are written on. The task resolves `Ok(())` on source EOF and
/// with the first IO error otherwise; in both cases the destination's write
/// side is shut down. The read side of `src` is never closed here.
pub(crate) fn spawn_pipe<R, W, C>(mut src: R, mut dst: W, count: C) -> JoinHandle<io::Result<()>>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
    C: Fn(usize) + Send + 'static,
{
    tokio::spawn(async move {
        let result = pipe(&mut src, &mut dst, count).await;
        let _ = dst.shutdown().await;
        result
    })
}

async fn pipe<R, W, C>(src: &mut R, dst: &mut W, count: C) -> io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    C: Fn(usize),
{
    let mut buf = [0u8; RELAY_BUFFER_SIZE];
    loop {
        let n = src.read(&mut buf).await?;
        if n == 0 {
            return Ok(());
        }
        count(n);
        dst.write_all(&buf[..n]).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicI64, Ordering};
    use std::sync::Arc;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_pipe_copies_and_counts() {
        let (mut client, server) = duplex(4096);
        let (sink, mut sink_peer) = duplex(4096);

        let counter = Arc::new(AtomicI64::new(0));
        let counted = counter.clone();
        let handle = spawn_pipe(server, sink, move |n| {
            counted.fetch_add(n as i64, Ordering::Relaxed);
        });

        client.write_all(b"hello relay").await.unwrap();
        drop(client);

        handle.await.unwrap().unwrap();

        let mut received = Vec::new();
        sink_peer.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, b"hello relay");
        assert_eq!(counter.load(Ordering::Relaxed), 11);
    }

    #[tokio::test]
    async fn test_pipe_eof_is_success() {
        let (client, server) = duplex(64);
        let (sink, _sink_peer) = duplex(64);
        drop(client);

        let handle = spawn_pipe(server, sink, |_| {});
        assert!(handle.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_pipe_half_closes_destination() {
        let (mut client, server) = duplex(64);
        let (sink, mut sink_peer) = duplex(64);

        let handle = spawn_pipe(server, sink, |_| {});
        client.write_all(b"bye").await.unwrap();
        drop(client);
        handle.await.unwrap().unwrap();

        // After the relay exits the sink peer must observe EOF.
        let mut buf = Vec::new();
        sink_peer.read_to_end(&mut buf).await.unwrap();
        assert_eq!(buf, b"bye");
    }

    #[tokio::test]
    async fn test_pipe_reports_write_error() {
        let (mut client, server) = duplex(64);
        let (sink, sink_peer) = duplex(64);
        drop(sink_peer);

        let handle = spawn_pipe(server, sink, |_| {});
        client.write_all(b"doomed").await.unwrap();
        drop(client);

        assert!(handle.await.unwrap().is_err());
    }

    #[tokio::test]
    async fn test_pipe_counts_multiple_buffers() {
        let (mut client, server) = duplex(8192);
        let (sink, mut sink_peer) = duplex(8192);

        let counter = Arc::new(AtomicI64::new(0));
        let counted = counter.clone();
        let handle = spawn_pipe(server, sink, move |n| {
            counted.fetch_add(n as i64, Ordering::Relaxed);
        });

        let payload = vec![0xA5u8; RELAY_BUFFER_SIZE * 3 + 17];
        let expected = payload.len();
        let writer = tokio::spawn(async move {
            client.write_all(&payload).await.unwrap();
            drop(client);
        });

        let mut received = Vec::new();
        sink_peer.read_to_end(&mut received).await.unwrap();
        writer.await.unwrap();
        handle.await.unwrap().unwrap();

        assert_eq!(received.len(), expected);
        assert_eq!(counter.load(Ordering::Relaxed) as usize, expected);
    }
}
