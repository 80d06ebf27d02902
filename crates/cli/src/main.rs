//! Enforcer discovery agent: loads the runtime configuration from the
//! adapter, then keeps every resource category in sync until stopped.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::redundant_pub_crate)]

mod error;

use error::{Error, Result};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use enforcer_config_store::ConfigStores;
use enforcer_transport::{Config, Endpoint};
use enforcer_transport_tls::{TlsConfig, TlsTransport};
use enforcer_xds_client::{RetryPolicy, XdsClient, XdsClientConfig};
use enforcer_xds_protocol::NodeIdentity;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Clone, Debug, Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Control plane host
    #[arg(long, default_value = "adapter", env = "ADAPTER_HOST")]
    adapter_host: String,

    /// Control plane xDS port
    #[arg(long, default_value_t = 18000, env = "ADAPTER_XDS_PORT")]
    adapter_xds_port: u16,

    /// Name the adapter's certificate is verified against
    #[arg(long, default_value = "adapter", env = "ADAPTER_HOST_NAME")]
    adapter_host_name: String,

    /// Label selecting this enforcer's configuration
    #[arg(long, default_value = "enforcer", env = "ENFORCER_LABEL")]
    enforcer_label: String,

    /// Instance identifier sent with every request
    #[arg(long, default_value = "Unassigned", env = "HOSTNAME")]
    instance_id: String,

    /// Largest discovery message accepted, in bytes
    #[arg(long, default_value_t = 4 * 1024 * 1024, env = "XDS_MAX_MSG_SIZE")]
    xds_max_msg_size: usize,

    /// Number of times the retry delay may double
    #[arg(long, default_value_t = 3, env = "XDS_MAX_RETRIES")]
    xds_max_retries: u32,

    /// Base delay between reconnect attempts, in seconds
    #[arg(long, default_value_t = 5, env = "XDS_RETRY_PERIOD")]
    xds_retry_period: u64,

    /// CA bundle file or directory
    #[arg(
        long,
        default_value = "/home/wso2/security/truststore",
        env = "TRUSTED_CA_CERTS_PATH"
    )]
    trusted_ca_certs_path: PathBuf,

    /// Also trust the bundled web PKI roots
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set, env = "TRUST_DEFAULT_CERTS")]
    trust_default_certs: bool,

    /// Client private key for mutual TLS
    #[arg(
        long,
        default_value = "/home/wso2/security/keystore/mg.key",
        env = "ENFORCER_PRIVATE_KEY_PATH"
    )]
    enforcer_private_key_path: PathBuf,

    /// Client certificate for mutual TLS
    #[arg(
        long,
        default_value = "/home/wso2/security/keystore/mg.pem",
        env = "ENFORCER_PUBLIC_CERT_PATH"
    )]
    enforcer_public_cert_path: PathBuf,
}

impl Args {
    fn tls_config(&self) -> TlsConfig {
        TlsConfig {
            trusted_ca_path: self.trusted_ca_certs_path.clone(),
            trust_default_certs: self.trust_default_certs,
            client_cert_path: Some(self.enforcer_public_cert_path.clone()),
            client_key_path: Some(self.enforcer_private_key_path.clone()),
            server_name: Some(self.adapter_host_name.clone()),
            transport: Config {
                max_message_size: self.xds_max_msg_size,
                ..Config::default()
            },
        }
    }

    fn client_config(&self) -> XdsClientConfig {
        XdsClientConfig {
            endpoint: Endpoint::new(self.adapter_host.clone(), self.adapter_xds_port),
            node: NodeIdentity::new(self.enforcer_label.clone(), self.instance_id.clone()),
            retry: RetryPolicy {
                retry_period: Duration::from_secs(self.xds_retry_period),
                max_retries: self.xds_max_retries,
                ..RetryPolicy::default()
            },
            ..XdsClientConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let args = Args::parse();

    let shutdown_token = CancellationToken::new();
    let signal_shutdown_token = shutdown_token.clone();
    let signals = termination_signal()?;
    tokio::spawn(async move {
        signals.await;
        info!("Shutting down");
        signal_shutdown_token.cancel();
    });

    run(&args, shutdown_token).await
}

async fn run(args: &Args, shutdown_token: CancellationToken) -> Result<()> {
    let transport = Arc::new(TlsTransport::new(&args.tls_config())?);
    let stores = ConfigStores::new();
    let config = args.client_config();
    let client = XdsClient::new(&transport, &config, &stores);

    info!(
        "Requesting configuration from {} as {}",
        config.endpoint, config.node
    );

    tokio::select! {
        () = client.bootstrap() => {}
        () = shutdown_token.cancelled() => {
            client.shutdown().await;
            return Ok(());
        }
    }

    client.start().await;
    info!("Enforcer discovery running");

    shutdown_token.cancelled().await;
    client.shutdown().await;

    info!("Enforcer discovery stopped");
    Ok(())
}

/// Install the signal handlers; the returned future resolves on the first
/// termination signal.
fn termination_signal() -> Result<impl Future<Output = ()> + Send + 'static> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigterm = signal(SignalKind::terminate())
            .map_err(|e| Error::Io("failed to create SIGTERM handler", e))?;
        let mut sigint = signal(SignalKind::interrupt())
            .map_err(|e| Error::Io("failed to create SIGINT handler", e))?;

        Ok(async move {
            tokio::select! {
                _ = sigterm.recv() => info!("Received SIGTERM"),
                _ = sigint.recv() => info!("Received SIGINT"),
            }
        })
    }

    #[cfg(not(unix))]
    {
        Ok(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received interrupt signal");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let args = Args::try_parse_from(["enforcer"]).unwrap();
        let config = args.client_config();

        assert_eq!(config.endpoint, Endpoint::new("adapter", 18000));
        assert_eq!(config.retry.retry_period, Duration::from_secs(5));
        assert_eq!(config.retry.max_retries, 3);
        assert_eq!(config.retry.initial_delay, Duration::from_secs(1));
        assert_eq!(config.bootstrap_timeout, Duration::from_secs(60));

        let tls = args.tls_config();
        assert!(tls.trust_default_certs);
        assert_eq!(tls.server_name.as_deref(), Some("adapter"));
        assert_eq!(tls.transport.max_message_size, 4 * 1024 * 1024);
    }

    #[test]
    fn test_flags_override_defaults() {
        let args = Args::try_parse_from([
            "enforcer",
            "--adapter-host",
            "adapter.mesh",
            "--adapter-xds-port",
            "18443",
            "--enforcer-label",
            "prod",
            "--instance-id",
            "enforcer-7",
            "--xds-retry-period",
            "2",
            "--xds-max-retries",
            "5",
            "--trust-default-certs",
            "false",
        ])
        .unwrap();
        let config = args.client_config();

        assert_eq!(config.endpoint, Endpoint::new("adapter.mesh", 18443));
        assert_eq!(config.node, NodeIdentity::new("prod", "enforcer-7"));
        assert_eq!(config.retry.retry_period, Duration::from_secs(2));
        assert_eq!(config.retry.max_retries, 5);
        assert!(!args.tls_config().trust_default_certs);
    }
}
