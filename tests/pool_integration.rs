//! Integration tests for the pool, the dispatcher, and the registry
//!
//! These drive the whole borrow/return/quarantine/recovery cycle through a
//! scriptable mock transport, plus one end-to-end pass over real TCP.

mod common;

use common::{test_config, test_host, MockLink, MockTransport};
use futures::FutureExt;
use rpcpool::{
    CallDispatcher, CallError, ErrorKind, Host, HostPool, PoolConfig, PoolRegistry, RemoteFault,
    TcpLink, TcpTransport, TransportError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Wait for the pool to leave the DOWN state, with a generous bound.
async fn wait_until_up<T: rpcpool::Transport>(pool: &Arc<HostPool<T>>) {
    for _ in 0..200 {
        if !pool.is_down() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("pool never recovered");
}

#[tokio::test]
async fn test_warm_up_populates_idle_queue() {
    let transport = MockTransport::default();
    let config = PoolConfig {
        init_connection_per_host: 3,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport.clone(), config).await;

    let status = pool.status();
    assert!(status.up);
    assert_eq!(status.open, 3);
    assert_eq!(status.idle, 3);
    assert_eq!(status.busy, 0);
    assert_eq!(transport.opened(), 3);
}

#[tokio::test]
async fn test_cold_start_tolerates_open_failures() {
    let transport = MockTransport::default();
    transport.refuse(true);
    let config = PoolConfig {
        init_connection_per_host: 3,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport, config).await;

    // Warm-up failed entirely, but the pool still starts ACTIVE
    let status = pool.status();
    assert!(status.up);
    assert_eq!(status.open, 0);
}

#[tokio::test]
async fn test_capacity_cap_and_zero_timeout_fast_fail() {
    let transport = MockTransport::default();
    let config = PoolConfig {
        max_connection_per_host: 2,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport, config).await;

    let first = pool.borrow(Duration::from_millis(500)).await.unwrap();
    let second = pool.borrow(Duration::from_millis(500)).await.unwrap();
    assert_ne!(first.id(), second.id());
    assert_eq!(pool.status().open, 2);

    // Pool is at capacity: no open can start, and a zero timeout must not block
    let err = pool.borrow(Duration::ZERO).await.unwrap_err();
    assert!(err.is_pool_timeout(), "expected pool timeout, got {err}");
}

#[tokio::test]
async fn test_idle_and_checked_out_accounting() {
    let transport = MockTransport::default();
    let pool = HostPool::connect(test_host(), transport.clone(), test_config()).await;

    let a = pool.borrow(Duration::from_millis(500)).await.unwrap();
    let b = pool.borrow(Duration::from_millis(500)).await.unwrap();

    let status = pool.status();
    assert_eq!(status.open, 2);
    assert_eq!(status.idle, 0);
    assert_eq!(status.busy, 2);

    pool.return_session(a, None);
    pool.return_session(b, None);

    let status = pool.status();
    assert_eq!(status.open, 2);
    assert_eq!(status.idle, 2);
    assert_eq!(status.busy, 0);

    // Borrowing again reuses a parked session instead of opening
    let c = pool.borrow(Duration::from_millis(500)).await.unwrap();
    assert_eq!(transport.opened(), 2);
    pool.return_session(c, None);
}

#[tokio::test]
async fn test_transport_fault_quarantines_host() {
    let transport = MockTransport::default();
    let pool = HostPool::connect(test_host(), transport.clone(), test_config()).await;

    let session = pool.borrow(Duration::from_millis(500)).await.unwrap();
    transport.refuse(true); // keep the recovery loop failing

    let closed_before = transport.closed();
    pool.return_session(
        session,
        Some(&CallError::Transport(TransportError::Closed)),
    );

    // The faulted session is closed and the pool flips DOWN
    assert_eq!(transport.closed(), closed_before + 1);
    assert!(pool.is_down());
    assert_eq!(pool.status().open, 0);

    let err = pool.borrow(Duration::from_millis(500)).await.unwrap_err();
    assert!(err.is_host_down(), "expected host down, got {err}");
}

#[tokio::test]
async fn test_fourth_rapid_timeout_quarantines() {
    let transport = MockTransport::default();
    let pool = HostPool::connect(test_host(), transport.clone(), test_config()).await;
    transport.refuse(true); // recovery must not sneak the pool back up mid-test

    // bad_host_timeout_count is 3: three rapid timeouts are tolerated
    for _ in 0..3 {
        let session = pool.borrow(Duration::from_millis(500)).await.unwrap();
        pool.return_session(
            session,
            Some(&CallError::Timeout {
                elapsed: Duration::from_millis(200),
            }),
        );
        assert!(!pool.is_down());
    }
    // Sessions below the threshold stay reusable
    assert_eq!(pool.status().idle, 1);

    let session = pool.borrow(Duration::from_millis(500)).await.unwrap();
    pool.return_session(
        session,
        Some(&CallError::Timeout {
            elapsed: Duration::from_millis(200),
        }),
    );
    assert!(pool.is_down());
    assert_eq!(pool.status().open, 0);
}

#[tokio::test]
async fn test_recovery_flips_pool_back_up() {
    let transport = MockTransport::default();
    let config = PoolConfig {
        retry_suspend_window_ms: 40,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport.clone(), config).await;

    let session = pool.borrow(Duration::from_millis(500)).await.unwrap();
    pool.return_session(
        session,
        Some(&CallError::Transport(TransportError::Closed)),
    );
    assert!(pool.is_down());

    // Transport is healthy again; the backoff loop should reconnect quickly
    wait_until_up(&pool).await;

    // The recovered pool serves the reconnect's fresh session; nothing stale
    // survived the quarantine and no extra open was needed
    let session = pool.borrow(Duration::from_millis(500)).await.unwrap();
    assert_eq!(transport.opened(), 2);
    assert_eq!(pool.status().busy, 1);
    pool.return_session(session, None);
}

#[tokio::test]
async fn test_dispatcher_success_path() {
    let transport = MockTransport::default();
    let pool = HostPool::connect(test_host(), transport, test_config()).await;
    let dispatcher = CallDispatcher::new(pool);

    let result = dispatcher
        .invoke(|link: &mut MockLink| {
            let id = link.id;
            async move { Ok::<_, CallError>(id * 10) }.boxed()
        })
        .await
        .unwrap();
    assert_eq!(result, 10);
}

#[tokio::test]
async fn test_dispatcher_exhausts_retries_on_dead_host() {
    let transport = MockTransport::default();
    transport.refuse(true);
    let config = PoolConfig {
        connect_timeout_ms: 30,
        max_time_wait_for_connection_ms: 50,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport, config).await;
    let dispatcher = CallDispatcher::new(pool);

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let err = dispatcher
        .invoke(move |_link: &mut MockLink| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move { Ok::<_, CallError>(()) }.boxed()
        })
        .await
        .unwrap_err();

    // No session ever materialized: the work never ran and the last borrow
    // failure is surfaced with all attempts spent
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert!(err.is_pool_timeout(), "expected pool timeout, got {err}");
    assert_eq!(err.attempts(), 3);
}

#[tokio::test]
async fn test_dispatcher_never_retries_remote_faults() {
    let transport = MockTransport::default();
    let pool = HostPool::connect(test_host(), transport, test_config()).await;
    let dispatcher = CallDispatcher::new(pool.clone());

    let calls = Arc::new(AtomicUsize::new(0));
    let counted = calls.clone();
    let err = dispatcher
        .invoke(move |_link: &mut MockLink| {
            counted.fetch_add(1, Ordering::SeqCst);
            async move {
                Err::<(), _>(CallError::Remote(RemoteFault::new(4, "bad argument")))
            }
            .boxed()
        })
        .await
        .unwrap_err();

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert_eq!(err.attempts(), 1);
    assert!(matches!(err.kind(), ErrorKind::Remote(fault) if fault.code == 4));

    // A remote fault is the host answering: the pool stays up and the
    // session goes back to the idle queue
    assert!(!pool.is_down());
    assert_eq!(pool.status().idle, 1);
}

#[tokio::test]
async fn test_shutdown_closes_idle_now_and_checked_out_on_return() {
    let transport = MockTransport::default();
    let config = PoolConfig {
        max_connection_per_host: 5,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport.clone(), config).await;

    let mut sessions = Vec::new();
    for _ in 0..5 {
        sessions.push(pool.borrow(Duration::from_millis(500)).await.unwrap());
    }
    for session in sessions.drain(..2) {
        pool.return_session(session, None);
    }
    // 2 idle, 3 checked out
    assert_eq!(pool.status().idle, 2);

    pool.shutdown();
    let status = pool.status();
    assert!(!status.up);
    assert_eq!(status.idle, 0);
    assert_eq!(status.open, 3);

    // Checked-out sessions are closed as they come back
    for session in sessions {
        pool.return_session(session, None);
    }
    assert_eq!(pool.status().open, 0);
    assert_eq!(transport.closed(), 5);

    // No further borrows or opens succeed
    let err = pool.borrow(Duration::from_millis(100)).await.unwrap_err();
    assert!(err.is_host_down());
    assert!(pool.open_session().await.is_err());
}

#[tokio::test]
async fn test_blocked_waiter_admission_limit() {
    let transport = MockTransport::default();
    let config = PoolConfig {
        max_block_threads_per_host: 0,
        max_connection_per_host: 1,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport, config).await;

    // With no blocking allowed, even a borrow that started an open fails
    // immediately rather than queuing
    let err = pool.borrow(Duration::from_millis(500)).await.unwrap_err();
    assert!(err.is_pool_timeout());

    // The background open still lands in the idle queue for the next caller
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(pool.status().idle, 1);
    let session = pool.borrow(Duration::ZERO).await;
    assert!(session.is_ok());
}

#[tokio::test]
async fn test_open_session_respects_capacity() {
    let transport = MockTransport::default();
    let config = PoolConfig {
        max_connection_per_host: 1,
        ..test_config()
    };
    let pool = HostPool::connect(test_host(), transport, config).await;

    let session = pool.open_session().await.unwrap();
    let err = pool.open_session().await.unwrap_err();
    assert!(matches!(err.kind(), ErrorKind::Exhausted));
    pool.return_session(session, None);
}

#[tokio::test]
async fn test_registry_lifecycle() {
    let transport = MockTransport::default();
    let registry = PoolRegistry::new(transport, test_config());
    let host = test_host();

    let first = registry.get_or_connect(host.clone()).await;
    let second = registry.get_or_connect(host.clone()).await;
    assert!(Arc::ptr_eq(&first, &second));
    assert_eq!(registry.len(), 1);

    assert!(registry.evict(&host));
    assert!(!registry.evict(&host));
    assert!(registry.is_empty());

    // The evicted dispatcher's pool is shut down
    let err = first
        .invoke(|_link: &mut MockLink| async move { Ok::<_, CallError>(()) }.boxed())
        .await
        .unwrap_err();
    assert!(err.is_host_down());

    // A fresh lookup builds a working pool again
    let third = registry.get_or_connect(host).await;
    let result = third
        .invoke(|link: &mut MockLink| {
            let id = link.id;
            async move { Ok::<_, CallError>(id) }.boxed()
        })
        .await;
    assert!(result.is_ok());
    registry.shutdown_all();
    assert!(registry.is_empty());
}

#[tokio::test]
async fn test_tcp_transport_end_to_end() {
    // Echo server for the reference transport
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
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

    let host = Host::new("127.0.0.1", addr.port());
    let config = PoolConfig {
        init_connection_per_host: 1,
        ..test_config()
    };
    let pool = HostPool::connect(host, TcpTransport, config).await;
    let dispatcher = CallDispatcher::new(pool.clone());

    let echoed = dispatcher
        .invoke(|link: &mut TcpLink| {
            async move {
                let stream = link.stream_mut();
                stream
                    .write_all(b"ping")
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
        .await
        .unwrap();

    assert_eq!(&echoed, b"ping");
    assert!(!pool.is_down());
    pool.shutdown();
}
