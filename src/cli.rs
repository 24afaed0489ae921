//! The command-line interface: run a server, or send a query to one.

use {anyhow::Context, std::path::PathBuf, structopt::StructOpt};

use crate::client::Client;
use crate::config::Config;
use crate::defaults;
use crate::server::Server;
use crate::transport::TlsConfig;

#[derive(Debug, StructOpt)]
#[structopt(name = "vistore", about = "visual-data management server")]
pub enum Cli {
    /// Run the server
    Run(Run),
    /// Send a query file to a running server
    Query(Query),
}

#[derive(Debug, StructOpt)]
pub struct Run {
    /// Path to the JSON configuration file
    #[structopt(long)]
    pub config: Option<PathBuf>,
}

impl Run {
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let config = match self.config {
            Some(path) => Config::load(&path).await?,
            None => {
                // Fall back to the default path, or to built-in defaults
                // when no file exists there.
                let path = defaults::config_path()?;
                if path.exists() {
                    Config::load(&path).await?
                } else {
                    Config::default()
                }
            }
        };
        Server::new(config).serve().await
    }
}

#[derive(Debug, StructOpt)]
pub struct Query {
    /// Server host name
    #[structopt(long, default_value = "localhost")]
    pub address: String,
    /// Server port
    #[structopt(long)]
    pub port: Option<u16>,
    /// Client certificate (enables TLS)
    #[structopt(long)]
    pub certificate: Option<PathBuf>,
    /// Client private key
    #[structopt(long)]
    pub private_key: Option<PathBuf>,
    /// CA bundle used to trust the server
    #[structopt(long)]
    pub ca_certificate: Option<PathBuf>,
    /// File holding the JSON command array
    pub query: PathBuf,
    /// Blob files, attached in order
    pub blobs: Vec<PathBuf>,
}

impl Query {
    pub async fn run(self) -> Result<(), anyhow::Error> {
        let json = tokio::fs::read_to_string(&self.query)
            .await
            .with_context(|| format!("could not read query {:?}", self.query))?;

        let mut blobs = Vec::with_capacity(self.blobs.len());
        for path in &self.blobs {
            blobs.push(
                tokio::fs::read(path)
                    .await
                    .with_context(|| format!("could not read blob {:?}", path))?,
            );
        }

        let tls = TlsConfig {
            certificate: self.certificate,
            private_key: self.private_key,
            ca_certificate: self.ca_certificate,
        };
        let port = self.port.unwrap_or_else(defaults::server_port);

        let mut client = Client::connect(&self.address, port, &tls).await?;
        let response = client.query(json, blobs).await?;
        client.shutdown().await?;

        // Pretty-print when the response is valid JSON (it always is,
        // unless the connection died mid-request).
        match serde_json::from_str::<serde_json::Value>(&response.json) {
            Ok(parsed) => println!("{}", serde_json::to_string_pretty(&parsed)?),
            Err(_) => println!("{}", response.json),
        }
        if !response.blobs.is_empty() {
            eprintln!("({} blobs returned)", response.blobs.len());
        }
        Ok(())
    }
}
