//! Transport-level tests: framing round-trips, size-limit rejection,
//! and connection lifecycle over plain TCP.

use rand::RngCore;
use tokio::io::AsyncWriteExt;

use vistore::transport::{ConnClient, ConnServer, Error, TlsConfig};

/// Echo frames back until the peer shuts down.
async fn echo(server: ConnServer) {
    let mut connection = server.accept().await.expect("accept failed");
    loop {
        let message = match connection.recv_message().await {
            Ok(message) => message.to_vec(),
            Err(Error::ConnectionShutDown) => break,
            Err(e) => panic!("server receive failed: {}", e),
        };
        connection
            .send_message(&message)
            .await
            .expect("server send failed");
    }
}

#[tokio::test]
async fn frame_round_trip() {
    const PORT: u16 = 56210;
    let server = ConnServer::new(PORT, &TlsConfig::default()).unwrap();
    let echo_task = tokio::spawn(echo(server));

    let mut client = ConnClient::open("127.0.0.1", PORT, &TlsConfig::default())
        .await
        .unwrap();

    let mut rng = rand::thread_rng();
    for size in [1usize, 2, 3, 64, 4096, 1 << 20] {
        let mut payload = vec![0u8; size];
        rng.fill_bytes(&mut payload);
        client.send_message(&payload).await.unwrap();
        let received = client.recv_message().await.unwrap();
        assert_eq!(received, &payload[..], "payload of {} bytes mangled", size);
    }

    client.shutdown().await.unwrap();
    drop(client);
    echo_task.await.unwrap();
}

#[tokio::test]
async fn twenty_message_ping_pong() {
    const PORT: u16 = 56211;
    let server = ConnServer::new(PORT, &TlsConfig::default()).unwrap();
    let echo_task = tokio::spawn(echo(server));

    let mut client = ConnClient::open("127.0.0.1", PORT, &TlsConfig::default())
        .await
        .unwrap();
    for i in 0..20u32 {
        let message = format!("ping {}", i).into_bytes();
        client.send_message(&message).await.unwrap();
        assert_eq!(client.recv_message().await.unwrap(), &message[..]);
    }
    client.shutdown().await.unwrap();
    drop(client);
    echo_task.await.unwrap();
}

#[tokio::test]
async fn zero_length_declared_frame_is_rejected() {
    const PORT: u16 = 56212;
    let server = ConnServer::new(PORT, &TlsConfig::default()).unwrap();
    let server_task = tokio::spawn(async move {
        let mut connection = server.accept().await.unwrap();
        match connection.recv_message().await {
            Err(Error::InvalidMessageSize(0)) => {}
            other => panic!("expected InvalidMessageSize(0), got {:?}", other.map(|_| ())),
        }
    });

    let mut raw = tokio::net::TcpStream::connect(("127.0.0.1", PORT))
        .await
        .unwrap();
    raw.write_all(&0u32.to_le_bytes()).await.unwrap();
    raw.flush().await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn oversized_declared_frame_is_rejected() {
    const PORT: u16 = 56213;
    let server = ConnServer::new(PORT, &TlsConfig::default()).unwrap();
    let server_task = tokio::spawn(async move {
        let mut connection = server.accept().await.unwrap();
        match connection.recv_message().await {
            Err(Error::InvalidMessageSize(size)) => {
                assert_eq!(size, (1u64 << 30) + 1);
            }
            other => panic!("expected InvalidMessageSize, got {:?}", other.map(|_| ())),
        }
    });

    let declared: u32 = (1 << 30) + 1;
    let mut raw = tokio::net::TcpStream::connect(("127.0.0.1", PORT))
        .await
        .unwrap();
    raw.write_all(&declared.to_le_bytes()).await.unwrap();
    raw.flush().await.unwrap();
    server_task.await.unwrap();
}

#[tokio::test]
async fn empty_sends_are_refused_locally() {
    const PORT: u16 = 56214;
    let server = ConnServer::new(PORT, &TlsConfig::default()).unwrap();
    let accept_task = tokio::spawn(async move {
        let _connection = server.accept().await.unwrap();
    });

    let mut client = ConnClient::open("127.0.0.1", PORT, &TlsConfig::default())
        .await
        .unwrap();
    match client.send_message(&[]).await {
        Err(Error::InvalidMessageSize(0)) => {}
        other => panic!("expected InvalidMessageSize(0), got {:?}", other),
    }
    accept_task.await.unwrap();
}

#[tokio::test]
async fn port_zero_is_rejected_before_any_socket_call() {
    match ConnServer::new(0, &TlsConfig::default()) {
        Err(Error::PortError(0)) => {}
        other => panic!("expected PortError, got {:?}", other.map(|_| ())),
    }

    let client = ConnClient::new(&TlsConfig::default()).unwrap();
    match client.connect("127.0.0.1", 0).await {
        Err(Error::PortError(0)) => {}
        other => panic!("expected PortError, got {:?}", other.map(|_| ())),
    }
}

#[tokio::test]
async fn unresolvable_hosts_fail_with_a_typed_error() {
    let client = ConnClient::new(&TlsConfig::default()).unwrap();
    match client.connect("does-not-exist.invalid", 56215).await {
        Err(Error::ServerAddError(host)) => assert_eq!(host, "does-not-exist.invalid"),
        Err(Error::ConnectionError(_)) => {} // some resolvers return NXDOMAIN as io errors
        other => panic!("expected a resolution failure, got {:?}", other.map(|_| ())),
    }
}
