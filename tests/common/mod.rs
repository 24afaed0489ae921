//! Shared helpers for the integration tests: scratch configurations,
//! in-process servers, and generated TLS material.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use vistore::backend::GraphDb;
use vistore::client::Client;
use vistore::config::Config;
use vistore::query::QueryHandler;
use vistore::server::Server;
use vistore::store::ObjectStore;
use vistore::transport::TlsConfig;
use vistore::wire::Envelope;

/// A configuration rooted in a scratch directory.
pub fn test_config(root: &Path, port: u16) -> Config {
    let mut config = Config::default();
    config.port = port;
    config.db_root_path = root.join("db");
    config
}

/// An in-process query handler over a scratch database.
pub fn handler(root: &Path) -> QueryHandler {
    let config = test_config(root, 55555);
    let db = GraphDb::open(&config.db_root_path).expect("could not open scratch graph");
    let store = ObjectStore::new(&config).expect("could not open scratch store");
    QueryHandler::new(db, store, &config)
}

/// Run one request and parse the response array.
pub async fn run(
    handler: &QueryHandler,
    json: &str,
    blobs: Vec<Vec<u8>>,
) -> (serde_json::Value, Vec<Vec<u8>>) {
    let response = handler.process(Envelope::new(json, blobs)).await;
    let parsed = serde_json::from_str(&response.json).expect("response must be valid JSON");
    (parsed, response.blobs)
}

pub struct TestServer {
    shutdown: oneshot::Sender<()>,
    handle: JoinHandle<Result<(), anyhow::Error>>,
}

/// Spawn a server for `config`; stop it with [`stop`].
pub fn spawn_server(config: Config) -> TestServer {
    let (shutdown, rx) = oneshot::channel();
    let handle = tokio::spawn(Server::new(config).serve_until(async {
        let _ = rx.await;
    }));
    TestServer { shutdown, handle }
}

pub async fn stop(server: TestServer) {
    let _ = server.shutdown.send(());
    server
        .handle
        .await
        .expect("server task panicked")
        .expect("server exited with an error");
}

/// Connect a client, retrying while the server binds its socket.
pub async fn connect(host: &str, port: u16, tls: &TlsConfig) -> Client {
    for _ in 0..100 {
        match Client::connect(host, port, tls).await {
            Ok(client) => return client,
            Err(_) => tokio::time::sleep(Duration::from_millis(50)).await,
        }
    }
    panic!("server on {}:{} never became reachable", host, port);
}

/// Generated TLS material: a CA plus server and client identities
/// signed by it, written as PEM files.
pub struct TestCerts {
    pub ca: PathBuf,
    pub server_cert: PathBuf,
    pub server_key: PathBuf,
    pub client_cert: PathBuf,
    pub client_key: PathBuf,
}

impl TestCerts {
    pub fn server_tls(&self) -> TlsConfig {
        TlsConfig {
            certificate: Some(self.server_cert.clone()),
            private_key: Some(self.server_key.clone()),
            ca_certificate: None,
        }
    }

    pub fn server_tls_mutual(&self) -> TlsConfig {
        TlsConfig {
            certificate: Some(self.server_cert.clone()),
            private_key: Some(self.server_key.clone()),
            ca_certificate: Some(self.ca.clone()),
        }
    }

    pub fn client_tls(&self) -> TlsConfig {
        TlsConfig {
            certificate: None,
            private_key: None,
            ca_certificate: Some(self.ca.clone()),
        }
    }

    pub fn client_tls_mutual(&self) -> TlsConfig {
        TlsConfig {
            certificate: Some(self.client_cert.clone()),
            private_key: Some(self.client_key.clone()),
            ca_certificate: Some(self.ca.clone()),
        }
    }
}

/// Generate a CA and two leaf certificates (server: `localhost`) under
/// `dir`.
pub fn generate_certs(dir: &Path) -> TestCerts {
    use rcgen::{
        BasicConstraints, Certificate, CertificateParams, DistinguishedName, DnType, IsCa,
    };

    let mut ca_params = CertificateParams::new(Vec::<String>::new());
    ca_params.is_ca = IsCa::Ca(BasicConstraints::Unconstrained);
    let mut ca_dn = DistinguishedName::new();
    ca_dn.push(DnType::CommonName, "vistore test ca");
    ca_params.distinguished_name = ca_dn;
    let ca = Certificate::from_params(ca_params).expect("could not build CA");

    let server_params = CertificateParams::new(vec!["localhost".to_string()]);
    let server = Certificate::from_params(server_params).expect("could not build server cert");

    let client_params = CertificateParams::new(vec!["client".to_string()]);
    let client = Certificate::from_params(client_params).expect("could not build client cert");

    let write = |name: &str, contents: String| -> PathBuf {
        let path = dir.join(name);
        std::fs::write(&path, contents).expect("could not write certificate");
        path
    };

    TestCerts {
        ca: write("ca.pem", ca.serialize_pem().expect("CA pem")),
        server_cert: write(
            "server.pem",
            server
                .serialize_pem_with_signer(&ca)
                .expect("server pem signed by CA"),
        ),
        server_key: write("server.key", server.serialize_private_key_pem()),
        client_cert: write(
            "client.pem",
            client
                .serialize_pem_with_signer(&ca)
                .expect("client pem signed by CA"),
        ),
        client_key: write("client.key", client.serialize_private_key_pem()),
    }
}
