//! The accept/dispatch server: a listening socket, a fixed-size worker
//! pool, and one request loop per connection.

use std::sync::Arc;

use anyhow::Context;
use futures::Future;
use tokio::sync::Semaphore;
use tracing::{error, info, info_span, warn, Instrument};

use crate::backend::GraphDb;
use crate::config::Config;
use crate::query::QueryHandler;
use crate::store::ObjectStore;
use crate::transport::{self, ConnServer, Connection};
use crate::wire::Envelope;

pub struct Server {
    config: Config,
}

impl Server {
    pub fn new(config: Config) -> Self {
        Server { config }
    }

    /// Serve until interrupted (ctrl-c).
    pub async fn serve(self) -> Result<(), anyhow::Error> {
        self.serve_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
    }

    /// Serve until `terminate` completes, then persist the graph and
    /// return.
    pub async fn serve_until(
        self,
        terminate: impl Future<Output = ()>,
    ) -> Result<(), anyhow::Error> {
        let config = self.config;
        let db = GraphDb::open(&config.db_root_path)
            .with_context(|| format!("could not open graph at {:?}", config.db_root_path))?;
        let store = ObjectStore::new(&config).context("could not open object store")?;
        let handler = Arc::new(QueryHandler::new(db.clone(), store, &config));

        let listener = ConnServer::new(config.port, &config.tls())?;
        info!("serving on {}", listener.local_addr()?);

        // Scheduled maintenance: expiration sweep and replication are
        // hook points driven by the configuration.
        let mut maintenance: Vec<tokio::task::JoinHandle<()>> = Vec::new();
        if let Some(period) = config.sweep_interval() {
            let handler = handler.clone();
            maintenance.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    match handler.sweep_expired().await {
                        Ok(0) => {}
                        Ok(removed) => info!("expiration sweep removed {} entities", removed),
                        Err(e) => warn!("expiration sweep failed: {}", e),
                    }
                }
            }));
        }
        if let Some(period) = config.replication_interval() {
            let db = db.clone();
            let backup_path = config
                .backup_path
                .clone()
                .expect("replication interval implies a backup path");
            maintenance.push(tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
                loop {
                    ticker.tick().await;
                    if let Err(e) = db.backup(&backup_path).await {
                        warn!("replication failed: {}", e);
                    }
                }
            }));
        }

        // The worker pool: accepted connections wait here for a slot.
        let workers = Arc::new(Semaphore::new(config.max_simultaneous_clients));

        tokio::pin!(terminate);
        loop {
            let accepted = tokio::select! {
                () = &mut terminate => break,
                accepted = listener.accept() => accepted,
            };
            let connection = match accepted {
                Ok(connection) => connection,
                // A failed handshake (or a dropped socket) only loses
                // that client; the listener stays usable.
                Err(e) => {
                    error!("accept failed: {}", e);
                    continue;
                }
            };

            let permit = workers
                .clone()
                .acquire_owned()
                .await
                .expect("worker semaphore never closes");
            let handler = handler.clone();
            let peer = connection
                .peer_addr()
                .map(|a| a.to_string())
                .unwrap_or_else(|| "unknown".to_string());
            tokio::spawn(
                async move {
                    serve_connection(connection, handler).await;
                    drop(permit);
                }
                .instrument(info_span!("connection", %peer)),
            );
        }

        for task in maintenance {
            task.abort();
        }
        db.persist().await.context("could not persist the graph")?;
        Ok(())
    }
}

/// One connection's request loop: requests are processed in receipt
/// order, one at a time.
async fn serve_connection(mut connection: Connection, handler: Arc<QueryHandler>) {
    loop {
        let request = match connection.recv_message().await {
            Ok(raw) => match Envelope::decode(raw) {
                Ok(request) => request,
                Err(e) => {
                    error!("dropping connection: {}", e);
                    break;
                }
            },
            Err(transport::Error::ConnectionShutDown) => break,
            Err(e) => {
                error!("receive failed: {}", e);
                break;
            }
        };

        let response = handler.process(request).await;
        let encoded = match response.encode() {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("could not encode response: {}", e);
                break;
            }
        };
        if let Err(e) = connection.send_message(&encoded).await {
            error!("send failed: {}", e);
            break;
        }
    }
    let _ = connection.shutdown().await;
}
