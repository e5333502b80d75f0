//! Example demonstrating pool, dispatcher, and registry usage
//!
//! This example shows how to:
//! 1. Configure and connect a per-host pool
//! 2. Run units of work through the retrying dispatcher
//! 3. Watch the pool's status snapshot
//!
//! It spins up a local TCP echo server so it runs without any real backend.

use futures::FutureExt;
use rpcpool::{CallDispatcher, CallError, Host, HostPool, PoolConfig, TcpLink, TcpTransport, TransportError};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // A stand-in backend: echo whatever arrives, 4 bytes at a time
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tokio::spawn(async move {
        loop {
            let Ok((mut stream, _)) = listener.accept().await else {
                return;
            };
            tokio::spawn(async move {
                let mut buf = [0u8; 4];
                while stream.read_exact(&mut buf).await.is_ok() {
                    if stream.write_all(&buf).await.is_err() {
                        return;
                    }
                }
            });
        }
    });

    let config = PoolConfig {
        init_connection_per_host: 2,
        max_connection_per_host: 8,
        ..PoolConfig::default()
    };

    let host = Host::new("127.0.0.1", addr.port());
    let pool = HostPool::connect(host, TcpTransport, config).await;
    info!(status = %pool.status(), "pool connected");

    let dispatcher = CallDispatcher::new(pool.clone());

    for i in 0..5u8 {
        let payload = [b'm', b's', b'g', b'0' + i];
        let echoed = dispatcher
            .invoke(move |link: &mut TcpLink| {
                async move {
                    let stream = link.stream_mut();
                    stream
                        .write_all(&payload)
                        .await
                        .map_err(|e| CallError::Transport(TransportError::Connect(e)))?;
                    let mut buf = [0u8; 4];
                    stream
                        .read_exact(&mut buf)
                        .await
                        .map_err(|e| CallError::Transport(TransportError::Connect(e)))?;
                    Ok(buf)
                }
                .boxed()
            })
            .await?;
        info!(
            sent = %String::from_utf8_lossy(&payload),
            echoed = %String::from_utf8_lossy(&echoed),
            "round trip"
        );
    }

    info!(status = %pool.status(), "after traffic");
    pool.shutdown();
    Ok(())
}
