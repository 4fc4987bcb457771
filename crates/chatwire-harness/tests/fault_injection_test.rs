//! Fault injection tests for the messaging client.
//!
//! Each test runs the real client (driver, WebSocket framing, state machine)
//! against the scripted backend over turmoil's simulated network, then
//! injects a fault: a crashed backend, a partition, a refused or silent
//! handshake, or a backend that drops every channel.
//!
//! All timing is virtual. A test that takes minutes of simulated time runs in
//! milliseconds and produces the same interleaving on every run.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use chatwire_client::{ClientConfig, Collaborators, MessagingClient};
use chatwire_core::{BearerToken, ConnectionState};
use chatwire_harness::{ServerBehavior, SimEnv, SimServer, SimTransport};
use chatwire_proto::{CorrelationId, OutboundMessageIntent};
use tokio::sync::mpsc;

const PORT: u16 = 3000;

/// Claims `{"id":1}`, matching the backend's view of the client user.
const TOKEN: &str = "eyJhbGciOiJIUzI1NiJ9.eyJpZCI6MX0.sig";

fn start_client(seed: u64) -> Result<MessagingClient, Box<dyn std::error::Error>> {
    let collaborators = Collaborators::new(|| Some(BearerToken::new(TOKEN)));
    let client = MessagingClient::init_with_env(
        ClientConfig::new(format!("ws://server:{PORT}")),
        collaborators,
        SimTransport::new(),
        SimEnv::with_seed(seed),
    )?;
    Ok(client)
}

fn host_server(sim: &mut turmoil::Sim<'_>, server: &SimServer) {
    let server = server.clone();
    sim.host("server", move || server.clone().serve());
}

#[test]
fn send_round_trip() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();
    let server = SimServer::new(PORT);
    host_server(&mut sim, &server);

    sim.client("client", async {
        let client = start_client(1)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = client.on_message_sent(move |sent| {
            let _ = tx.send(sent.correlation_id.clone());
        });

        client.connect()?;
        client.wait_for_state(ConnectionState::Connected).await?;

        let correlation_id = client.send_message(OutboundMessageIntent::new("c1", 2, "hello"))?;
        assert_eq!(rx.recv().await, Some(Some(correlation_id)));

        client.teardown().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");

    let stats = server.stats();
    assert_eq!(stats.connections, 1);
    assert_eq!(stats.messages, 1);
    assert_eq!(stats.tokens, [TOKEN]);
}

#[test]
fn own_sends_do_not_notify_but_peer_messages_do() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(60)).build();
    let server = SimServer::new(PORT);
    host_server(&mut sim, &server);

    sim.client("client", async {
        let client = start_client(1)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = client.on_new_message(move |message| {
            let _ = tx.send(message.sender.id);
        });

        client.connect()?;
        client.wait_for_state(ConnectionState::Connected).await?;
        client.join_conversation("c1");

        assert_eq!(rx.recv().await, Some(chatwire_harness::sim_server::PEER_USER_ID));

        client.teardown().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");
    assert_eq!(server.stats().joins, ["c1"]);
}

#[test]
fn reconnects_and_rejoins_after_server_crash() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(300)).build();
    let server = SimServer::new(PORT);
    host_server(&mut sim, &server);

    let greeted = Arc::new(AtomicBool::new(false));
    let first_greeting = Arc::clone(&greeted);
    sim.client("client", async move {
        let client = start_client(2)?;
        let (tx, mut rx) = mpsc::unbounded_channel();
        let _sub = client.on_new_message(move |message| {
            let _ = tx.send(message.conversation_id.clone());
        });

        client.connect()?;
        client.wait_for_state(ConnectionState::Connected).await?;
        client.join_conversation("c1");
        assert_eq!(rx.recv().await.as_deref(), Some("c1"));
        first_greeting.store(true, Ordering::SeqCst);

        client.wait_for_state(ConnectionState::Disconnected).await?;
        client.wait_for_state(ConnectionState::Connected).await?;

        // Re-joined without being asked: the backend greets again.
        assert_eq!(rx.recv().await.as_deref(), Some("c1"));

        client.teardown().await;
        Ok(())
    });

    let mut steps = 0;
    while !greeted.load(Ordering::SeqCst) {
        sim.step().expect("simulation step");
        steps += 1;
        assert!(steps < 100_000, "client never greeted");
    }
    sim.bounce("server");

    sim.run().expect("simulation should complete");

    let stats = server.stats();
    assert!(stats.connections >= 2);
    assert_eq!(stats.joins, ["c1", "c1"]);
}

#[test]
fn retries_are_spaced_by_reconnect_delay() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build();
    let server = SimServer::new(PORT);
    server.set_behavior(ServerBehavior::DropAfterHandshake);
    host_server(&mut sim, &server);

    sim.client("client", async {
        let client = start_client(3)?;
        client.connect()?;

        tokio::time::sleep(Duration::from_secs(20)).await;

        client.teardown().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");

    let stats = server.stats();
    assert!(stats.connections >= 4, "expected repeated reconnects: {stats:?}");
    assert!(stats.connections <= 7, "reconnected faster than the delay: {stats:?}");
    for pair in stats.accepted_at.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(3), "retry too early: {pair:?}");
    }
}

#[test]
fn rejected_handshake_retries_until_accepted() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build();
    let server = SimServer::new(PORT);
    server.set_behavior(ServerBehavior::Reject { message: "jwt expired".to_string() });
    host_server(&mut sim, &server);

    let backend = server.clone();
    sim.client("client", async move {
        let client = start_client(4)?;
        client.connect()?;

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_ne!(client.state(), ConnectionState::Connected);

        backend.set_behavior(ServerBehavior::Accept);
        client.wait_for_state(ConnectionState::Connected).await?;

        client.teardown().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");

    let stats = server.stats();
    assert!(stats.connections >= 3);
    assert_eq!(stats.acknowledged, 1);
}

#[test]
fn silent_backend_hits_handshake_timeout() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build();
    let server = SimServer::new(PORT);
    server.set_behavior(ServerBehavior::Silent);
    host_server(&mut sim, &server);

    sim.client("client", async {
        let client = start_client(5)?;
        client.connect()?;

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_ne!(client.state(), ConnectionState::Connected);

        client.teardown().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");

    let stats = server.stats();
    assert!(stats.connections >= 2, "handshake never timed out: {stats:?}");
    for pair in stats.accepted_at.windows(2) {
        assert!(pair[1] - pair[0] >= Duration::from_secs(12), "retry too early: {pair:?}");
    }
}

#[test]
fn partition_is_detected_and_recovered() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(600)).build();
    let server = SimServer::new(PORT);
    host_server(&mut sim, &server);

    sim.client("client", async {
        let client = start_client(6)?;
        client.connect()?;
        client.wait_for_state(ConnectionState::Connected).await?;

        let partitioned_at = turmoil::elapsed();
        turmoil::partition("client", "server");

        client.wait_for_state(ConnectionState::Disconnected).await?;
        let detected = turmoil::elapsed() - partitioned_at;
        assert!(detected <= Duration::from_secs(62), "took {detected:?} to notice");

        turmoil::repair("client", "server");
        client.wait_for_state(ConnectionState::Connected).await?;

        client.teardown().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");
    assert!(server.stats().connections >= 2);
}

#[test]
fn manual_disconnect_stops_reconnecting() {
    let mut sim = turmoil::Builder::new().simulation_duration(Duration::from_secs(120)).build();
    let server = SimServer::new(PORT);
    host_server(&mut sim, &server);

    sim.client("client", async {
        let client = start_client(7)?;
        client.connect()?;
        client.wait_for_state(ConnectionState::Connected).await?;

        client.disconnect()?;
        client.wait_for_state(ConnectionState::Disconnected).await?;
        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(client.state(), ConnectionState::Disconnected);

        client.teardown().await;
        Ok(())
    });

    sim.run().expect("simulation should complete");
    assert_eq!(server.stats().connections, 1);
}

#[test]
fn same_seed_same_run() {
    fn run(seed: u64) -> (Vec<CorrelationId>, Vec<Duration>) {
        let ids = Arc::new(Mutex::new(Vec::new()));
        let mut sim = turmoil::Builder::new()
            .simulation_duration(Duration::from_secs(60))
            .rng_seed(seed)
            .build();
        let server = SimServer::new(PORT);
        host_server(&mut sim, &server);

        let captured = Arc::clone(&ids);
        sim.client("client", async move {
            let client = start_client(seed)?;
            client.connect()?;
            client.wait_for_state(ConnectionState::Connected).await?;

            for content in ["a", "b", "c"] {
                let id = client.send_message(OutboundMessageIntent::new("c1", 2, content))?;
                captured.lock().unwrap().push(id);
            }

            client.teardown().await;
            Ok(())
        });

        sim.run().expect("simulation should complete");
        let ids = ids.lock().unwrap().clone();
        (ids, server.stats().accepted_at)
    }

    assert_eq!(run(42), run(42));
    assert_ne!(run(42).0, run(43).0);
}
