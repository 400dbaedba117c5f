//! End-to-end relay tests over loopback QUIC
//!
//! Each test stands up a real relay (agent listener + forward listener),
//! real agents, and plain TCP targets, then drives traffic through the
//! forward port.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use culvert_agent::{Agent, AgentConfig};
use culvert_relay::{
    AgentListener, ForwardListener, PickError, Selector, SessionPicker, SessionPool,
};
use culvert_session::{Session, SessionConfig, SessionConnector};

struct RelayUnderTest {
    agent_addr: SocketAddr,
    forward_addr: SocketAddr,
    pool: Arc<SessionPool<Session>>,
    selector: Arc<Selector<Session>>,
}

async fn start_relay(picker: Arc<dyn SessionPicker>) -> RelayUnderTest {
    let pool = Arc::new(SessionPool::new());
    let selector = Arc::new(Selector::new(pool.clone(), picker));

    let config = SessionConfig::server_ephemeral().expect("ephemeral server config");
    let agent_listener =
        AgentListener::bind("127.0.0.1:0".parse().unwrap(), &config, pool.clone())
            .expect("bind agent listener");
    let agent_addr = agent_listener.local_addr().expect("agent listener addr");
    tokio::spawn(async move {
        let _ = agent_listener.run().await;
    });

    let forward_listener =
        ForwardListener::bind("127.0.0.1:0".parse().unwrap(), selector.clone())
            .await
            .expect("bind forward listener");
    let forward_addr = forward_listener.local_addr().expect("forward listener addr");
    tokio::spawn(async move {
        let _ = forward_listener.run().await;
    });

    RelayUnderTest {
        agent_addr,
        forward_addr,
        pool,
        selector,
    }
}

/// TCP target that writes `tag` once, then echoes everything back
async fn start_tagged_target(tag: u8) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind target");
    let addr = listener.local_addr().expect("target addr");

    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                if conn.write_all(&[tag]).await.is_err() {
                    return;
                }
                let (mut read, mut write) = conn.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });

    addr
}

async fn start_echo_target() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind target");
    let addr = listener.local_addr().expect("target addr");

    tokio::spawn(async move {
        loop {
            let Ok((mut conn, _)) = listener.accept().await else {
                break;
            };
            tokio::spawn(async move {
                let (mut read, mut write) = conn.split();
                let _ = tokio::io::copy(&mut read, &mut write).await;
            });
        }
    });

    addr
}

fn start_agent(relay_addr: SocketAddr, target: SocketAddr, id: &str) -> JoinHandle<()> {
    let config = AgentConfig {
        relay_addr: relay_addr.to_string(),
        server_name: "localhost".to_string(),
        target_addr: target.to_string(),
        identifier: id.to_string(),
        insecure: true,
    };
    tokio::spawn(async move {
        let _ = Agent::new(config).run().await;
    })
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) {
    let outcome = timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(outcome.is_ok(), "timed out waiting for {}", what);
}

fn current_id(relay: &RelayUnderTest) -> Option<String> {
    relay.pool.current().map(|(id, _)| id)
}

/// Always picks the first candidate
struct PickFirst;

#[async_trait]
impl SessionPicker for PickFirst {
    async fn pick(&self, candidates: &[String]) -> Result<String, PickError> {
        candidates
            .first()
            .cloned()
            .ok_or(PickError::Cancelled)
    }
}

/// Picks the candidate whose trimmed identifier matches
struct PickNamed(&'static str);

#[async_trait]
impl SessionPicker for PickNamed {
    async fn pick(&self, candidates: &[String]) -> Result<String, PickError> {
        candidates
            .iter()
            .find(|id| id.trim_end_matches('\0') == self.0)
            .cloned()
            .ok_or(PickError::Cancelled)
    }
}

#[tokio::test]
async fn forwards_bytes_through_an_agent() {
    let target = start_echo_target().await;
    let relay = start_relay(Arc::new(PickFirst)).await;
    let _agent = start_agent(relay.agent_addr, target, "echo-agent");

    wait_until("agent registration", || relay.pool.len() == 1).await;

    let mut conn = TcpStream::connect(relay.forward_addr).await.expect("connect");
    conn.write_all(b"hello relay").await.expect("write");

    let mut buf = [0u8; 11];
    timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .expect("read echo");
    assert_eq!(&buf, b"hello relay");
}

#[tokio::test]
async fn relays_a_large_payload_in_both_directions() {
    let target = start_echo_target().await;
    let relay = start_relay(Arc::new(PickFirst)).await;
    let _agent = start_agent(relay.agent_addr, target, "bulk-agent");

    wait_until("agent registration", || relay.pool.len() == 1).await;

    let payload: Vec<u8> = (0..256 * 1024).map(|i| (i % 251) as u8).collect();

    let conn = TcpStream::connect(relay.forward_addr).await.expect("connect");
    let (mut read_half, mut write_half) = conn.into_split();

    let expected = payload.clone();
    let reader = tokio::spawn(async move {
        let mut received = vec![0u8; expected.len()];
        read_half.read_exact(&mut received).await.expect("read payload");
        assert_eq!(received, expected);
    });

    write_half.write_all(&payload).await.expect("write payload");

    timeout(Duration::from_secs(10), reader)
        .await
        .expect("payload round trip timed out")
        .expect("reader task");
}

#[tokio::test]
async fn concurrent_connections_are_served_independently() {
    let target = start_echo_target().await;
    let relay = start_relay(Arc::new(PickFirst)).await;
    let _agent = start_agent(relay.agent_addr, target, "multi-agent");

    wait_until("agent registration", || relay.pool.len() == 1).await;

    let mut tasks = Vec::new();
    for n in 0..5u8 {
        let forward_addr = relay.forward_addr;
        tasks.push(tokio::spawn(async move {
            let mut conn = TcpStream::connect(forward_addr).await.expect("connect");
            let message = [n; 32];
            conn.write_all(&message).await.expect("write");

            let mut buf = [0u8; 32];
            conn.read_exact(&mut buf).await.expect("read");
            assert_eq!(buf, message);
        }));
    }

    for task in tasks {
        timeout(Duration::from_secs(5), task)
            .await
            .expect("connection timed out")
            .expect("connection task");
    }
}

#[tokio::test]
async fn reselect_switches_new_connections_to_the_chosen_agent() {
    let target_a = start_tagged_target(b'A').await;
    let target_b = start_tagged_target(b'B').await;

    let relay = start_relay(Arc::new(PickNamed("beta"))).await;

    let _alpha = start_agent(relay.agent_addr, target_a, "alpha");
    wait_until("first registration", || relay.pool.len() == 1).await;
    let _beta = start_agent(relay.agent_addr, target_b, "beta");
    wait_until("second registration", || relay.pool.len() == 2).await;

    // The lone first session was auto-bound; now let the oracle choose
    let bound = relay.selector.reselect().await.expect("reselect");
    assert_eq!(bound.0.trim_end_matches('\0'), "beta");
    assert_eq!(
        current_id(&relay).as_deref().map(|id| id.trim_end_matches('\0')),
        Some("beta")
    );

    let mut conn = TcpStream::connect(relay.forward_addr).await.expect("connect");
    let mut tag = [0u8; 1];
    timeout(Duration::from_secs(5), conn.read_exact(&mut tag))
        .await
        .expect("tag timed out")
        .expect("read tag");
    assert_eq!(tag[0], b'B');
}

#[tokio::test]
async fn failover_binds_the_surviving_agent() {
    let target_a = start_tagged_target(b'A').await;
    let target_b = start_tagged_target(b'B').await;

    let relay = start_relay(Arc::new(PickFirst)).await;

    let alpha = start_agent(relay.agent_addr, target_a, "alpha");
    wait_until("first registration", || relay.pool.len() == 1).await;
    let _beta = start_agent(relay.agent_addr, target_b, "beta");
    wait_until("second registration", || relay.pool.len() == 2).await;

    wait_until("initial selection", || {
        current_id(&relay)
            .map(|id| id.trim_end_matches('\0') == "alpha")
            .unwrap_or(false)
    })
    .await;

    // Kill the bound agent; the watcher must evict it and bind the
    // survivor without operator input
    alpha.abort();

    wait_until("failover to the survivor", || {
        current_id(&relay)
            .map(|id| id.trim_end_matches('\0') == "beta")
            .unwrap_or(false)
    })
    .await;
    assert_eq!(relay.pool.len(), 1);

    let mut conn = TcpStream::connect(relay.forward_addr).await.expect("connect");
    let mut tag = [0u8; 1];
    timeout(Duration::from_secs(5), conn.read_exact(&mut tag))
        .await
        .expect("tag timed out")
        .expect("read tag");
    assert_eq!(tag[0], b'B');
}

#[tokio::test]
async fn connections_are_refused_once_the_pool_drains() {
    let relay = start_relay(Arc::new(PickFirst)).await;

    // A bare session that never serves streams is enough to get selected
    let connector =
        SessionConnector::new(&SessionConfig::client_insecure()).expect("create connector");
    let session = connector
        .connect(relay.agent_addr, "localhost")
        .await
        .expect("connect session");
    let mut stream = session.open_stream().await.expect("open identifier stream");
    stream.write_all(b"doomed").await.expect("send identifier");
    stream.finish().expect("finish identifier stream");

    wait_until("registration and selection", || current_id(&relay).is_some()).await;

    session.close(0, "agent going away");
    wait_until("eviction after shutdown", || relay.pool.is_empty()).await;

    // With an empty registry the forward path must close connections
    // immediately, not open streams
    let mut conn = TcpStream::connect(relay.forward_addr).await.expect("connect");
    let mut buf = Vec::new();
    let read = timeout(Duration::from_secs(5), conn.read_to_end(&mut buf))
        .await
        .expect("connection was not closed")
        .expect("read");
    assert_eq!(read, 0);
    assert!(current_id(&relay).is_none());
}

#[tokio::test]
async fn reset_identifier_stream_still_registers_the_session() {
    let relay = start_relay(Arc::new(PickFirst)).await;

    let connector =
        SessionConnector::new(&SessionConfig::client_insecure()).expect("create connector");
    let session = connector
        .connect(relay.agent_addr, "localhost")
        .await
        .expect("connect session");

    // Open the identifier stream but reset it before writing anything;
    // the relay's read fails and the session registers under a
    // zero-filled identifier
    let mut stream = session.open_stream().await.expect("open identifier stream");
    stream.reset(1);
    drop(stream);

    wait_until("degraded registration", || relay.pool.len() == 1).await;

    let snapshot = relay.pool.snapshot();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].len(), culvert_session::IDENTIFIER_LEN);
    assert!(snapshot[0].chars().all(|c| c == '\0'));
}

#[tokio::test]
async fn inflight_relay_outlives_eviction_of_its_session() {
    let target = start_echo_target().await;
    let relay = start_relay(Arc::new(PickFirst)).await;
    let _agent = start_agent(relay.agent_addr, target, "sticky");

    wait_until("agent registration", || relay.pool.len() == 1).await;

    let mut conn = TcpStream::connect(relay.forward_addr).await.expect("connect");
    conn.write_all(b"before").await.expect("write");
    let mut buf = [0u8; 6];
    timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
        .await
        .expect("echo timed out")
        .expect("read echo");
    assert_eq!(&buf, b"before");

    // Evict the session the relay is using; the captured stream must
    // keep working, only new connections observe the eviction
    let bound = current_id(&relay).expect("session bound");
    relay.selector.evict(&bound);
    assert!(relay.pool.is_empty());

    conn.write_all(b"after!").await.expect("write after eviction");
    timeout(Duration::from_secs(5), conn.read_exact(&mut buf))
        .await
        .expect("echo after eviction timed out")
        .expect("read echo after eviction");
    assert_eq!(&buf, b"after!");

    let mut fresh = TcpStream::connect(relay.forward_addr).await.expect("connect");
    let mut rest = Vec::new();
    let read = timeout(Duration::from_secs(5), fresh.read_to_end(&mut rest))
        .await
        .expect("fresh connection was not closed")
        .expect("read");
    assert_eq!(read, 0);
}
