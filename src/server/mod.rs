pub mod connection;

use crate::config::ServerConfig;
use crate::directory::Partition;
use crate::interceptor::{InterceptorChain, ReferralInterceptor};
use crate::referral::ReferralLut;
use crate::yaml;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};

pub struct Server {
    config: ServerConfig,
    chain: Arc<InterceptorChain>,
    lut: Arc<ReferralLut>,
}

impl Server {
    pub async fn new(config: ServerConfig) -> crate::Result<Self> {
        // Load directory from YAML
        let directory = yaml::parse_directory_file(&config.yaml_file).await?;
        Ok(Self::with_partition(config, Arc::new(directory)))
    }

    /// Serves an already loaded partition.
    pub fn with_partition(config: ServerConfig, partition: Arc<dyn Partition>) -> Self {
        let lut = Arc::new(ReferralLut::new());
        lut.rebuild(&partition.entries());

        info!(
            "Serving {} with {} referrals, referral mode {}",
            partition.suffix(),
            lut.len(),
            config.referral_mode
        );

        let chain = InterceptorChain::new(partition).with(Arc::new(ReferralInterceptor::new(
            config.referral_mode,
            Arc::clone(&lut),
        )));

        Self {
            config,
            chain: Arc::new(chain),
            lut,
        }
    }

    pub fn chain(&self) -> &Arc<InterceptorChain> {
        &self.chain
    }

    pub fn lut(&self) -> &Arc<ReferralLut> {
        &self.lut
    }

    pub async fn run(self) -> crate::Result<()> {
        let listener = TcpListener::bind(&self.config.bind_address).await?;

        info!("LDAP server listening on {}", self.config.bind_address);

        self.serve(listener).await
    }

    /// Accepts connections on `listener` until the task is dropped.
    pub async fn serve(self, listener: TcpListener) -> crate::Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, addr)) => {
                    info!("New connection from {}", addr);

                    let chain = Arc::clone(&self.chain);
                    tokio::spawn(async move {
                        if let Err(e) = connection::handle_connection(socket, chain).await {
                            error!("Connection error: {}", e);
                        }
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dn::Dn;
    use crate::referral::ReferralMode;
    use std::io::Write;
    use std::path::PathBuf;
    use tempfile::NamedTempFile;

    fn create_test_yaml_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "directory:").unwrap();
        writeln!(file, "  base_dn: dc=test,dc=com").unwrap();
        writeln!(file, "entries:").unwrap();
        writeln!(file, "  - dn: dc=test,dc=com").unwrap();
        writeln!(file, "    objectClass: [top, domain]").unwrap();
        writeln!(file, "    dc: test").unwrap();
        writeln!(file, "  - dn: ou=remote,dc=test,dc=com").unwrap();
        writeln!(file, "    objectClass: [top, referral]").unwrap();
        writeln!(file, "    ref: ldap://remote.example.com/ou=remote,o=other").unwrap();
        file.flush().unwrap();
        file
    }

    fn config(yaml_file: PathBuf) -> ServerConfig {
        ServerConfig {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            yaml_file,
            referral_mode: ReferralMode::Throw,
        }
    }

    #[tokio::test]
    async fn test_server_new_builds_lut_and_chain() {
        let yaml_file = create_test_yaml_file();
        let server = Server::new(config(yaml_file.path().to_path_buf())).await.unwrap();

        assert_eq!(server.lut().len(), 1);
        assert!(server
            .lut()
            .is_referral(&Dn::parse("ou=remote,dc=test,dc=com").unwrap()));
        assert_eq!(server.chain().names(), vec!["referralInterceptor"]);
    }

    #[tokio::test]
    async fn test_server_new_invalid_yaml() {
        let result = Server::new(config(PathBuf::from("/nonexistent/file.yaml"))).await;
        assert!(result.is_err());
    }
}
