use crate::referral::ReferralMode;
use crate::LdapMuxError;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(name = "ldapmux")]
#[command(about = "LDAP client with a referral-aware directory server")]
#[command(version)]
pub struct CliArgs {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Set log level: debug, info, warn, error
    #[arg(long, default_value = "info", global = true)]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

impl CliArgs {
    pub fn log_level(&self) -> tracing::Level {
        if self.verbose {
            return tracing::Level::DEBUG;
        }
        match self.log_level.to_lowercase().as_str() {
            "debug" => tracing::Level::DEBUG,
            "info" => tracing::Level::INFO,
            "warn" => tracing::Level::WARN,
            "error" => tracing::Level::ERROR,
            _ => tracing::Level::INFO,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Bind to a server and print the result
    Bind(ConnectionArgs),
    /// Search a server and print the entries and references
    Search(SearchArgs),
    /// Serve a YAML directory
    Serve(ServeArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct ConnectionArgs {
    /// YAML file with connection settings
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Server host name
    #[arg(short = 'H', long)]
    pub host: Option<String>,

    /// Server port
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Connect over TLS
    #[arg(long)]
    pub tls: bool,

    /// Operation timeout in milliseconds
    #[arg(long, value_name = "MILLIS")]
    pub timeout: Option<u64>,

    /// DN to bind as
    #[arg(short = 'D', long)]
    pub bind_dn: Option<String>,

    /// Password for the bind DN
    #[arg(short = 'w', long)]
    pub password: Option<String>,
}

impl ConnectionArgs {
    /// Settings from the config file, if any, overridden by the flags.
    pub fn resolve(&self) -> crate::Result<ConnectionConfig> {
        let mut config = match &self.config {
            Some(path) => ConnectionConfig::from_yaml_file(path)?,
            None => ConnectionConfig::default(),
        };

        if let Some(host) = &self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if self.tls {
            config.use_tls = true;
        }
        if let Some(timeout) = self.timeout {
            config.timeout_millis = timeout;
        }
        if let Some(name) = &self.bind_dn {
            config.name = Some(name.clone());
        }
        if let Some(password) = &self.password {
            config.credentials = Some(password.clone());
        }
        Ok(config)
    }
}

#[derive(Args, Debug, Clone)]
pub struct SearchArgs {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    /// Search base DN
    #[arg(short, long)]
    pub base: String,

    /// Search filter
    #[arg(long, default_value = "(objectClass=*)")]
    pub filter: String,

    /// Search scope: base, one, sub
    #[arg(short, long, default_value = "sub")]
    pub scope: String,

    /// Attributes to return
    #[arg(short, long)]
    pub attributes: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct ServeArgs {
    /// Path to YAML directory file
    #[arg(short, long, value_name = "FILE")]
    pub file: PathBuf,

    /// Port to listen on
    #[arg(short, long, default_value = "389")]
    pub port: u16,

    /// Address to bind to
    #[arg(long, default_value = "0.0.0.0")]
    pub bind_address: String,

    /// How referral entries are handled: ignore, throw, throw-finding-base
    #[arg(long, default_value = "throw")]
    pub referral_mode: String,
}

/// Where and how a client connects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: u16,
    pub use_tls: bool,
    pub timeout_millis: u64,
    /// Default bind DN
    pub name: Option<String>,
    pub credentials: Option<String>,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 389,
            use_tls: false,
            timeout_millis: 30_000,
            name: None,
            credentials: None,
        }
    }
}

impl ConnectionConfig {
    pub fn from_yaml_str(content: &str) -> crate::Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn from_yaml_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    pub fn with_host(mut self, host: impl Into<String>) -> Self {
        self.host = host.into();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_millis = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    pub fn with_identity(mut self, name: impl Into<String>, credentials: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self.credentials = Some(credentials.into());
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_millis)
    }
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_address: SocketAddr,
    pub yaml_file: PathBuf,
    pub referral_mode: ReferralMode,
}

impl ServerConfig {
    pub fn from_serve_args(args: ServeArgs) -> crate::Result<Self> {
        // Handle IPv6 addresses by adding brackets if needed
        let bind_address = if args.bind_address.contains(':') && !args.bind_address.starts_with('[')
        {
            format!("[{}]:{}", args.bind_address, args.port)
        } else {
            format!("{}:{}", args.bind_address, args.port)
        };

        let bind_address = bind_address
            .parse()
            .map_err(|e| LdapMuxError::Config(format!("Invalid bind address: {}", e)))?;

        Ok(ServerConfig {
            bind_address,
            yaml_file: args.file,
            referral_mode: args.referral_mode.parse()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::str::FromStr;

    fn serve_args(bind_address: &str, port: u16) -> ServeArgs {
        ServeArgs {
            file: PathBuf::from("test.yaml"),
            port,
            bind_address: bind_address.to_string(),
            referral_mode: "throw".to_string(),
        }
    }

    #[test]
    fn test_serve_args_default_values() {
        let args = CliArgs::parse_from(["ldapmux", "serve", "-f", "test.yaml"]);
        assert!(!args.verbose);
        assert_eq!(args.log_level, "info");
        match args.command {
            Command::Serve(serve) => {
                assert_eq!(serve.file, PathBuf::from("test.yaml"));
                assert_eq!(serve.port, 389);
                assert_eq!(serve.bind_address, "0.0.0.0");
                assert_eq!(serve.referral_mode, "throw");
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_search_args_custom_values() {
        let args = CliArgs::parse_from([
            "ldapmux",
            "search",
            "-H",
            "ldap.example.com",
            "-p",
            "1389",
            "--tls",
            "-D",
            "cn=admin,dc=example,dc=com",
            "-w",
            "secret",
            "-b",
            "dc=example,dc=com",
            "--filter",
            "(cn=a*)",
            "-s",
            "one",
            "-a",
            "cn",
            "-a",
            "mail",
            "-v",
        ]);
        assert!(args.verbose);
        let search = match args.command {
            Command::Search(search) => search,
            other => panic!("unexpected {:?}", other),
        };
        assert_eq!(search.base, "dc=example,dc=com");
        assert_eq!(search.filter, "(cn=a*)");
        assert_eq!(search.scope, "one");
        assert_eq!(search.attributes, vec!["cn", "mail"]);

        let config = search.connection.resolve().unwrap();
        assert_eq!(config.host, "ldap.example.com");
        assert_eq!(config.port, 1389);
        assert!(config.use_tls);
        assert_eq!(config.name.as_deref(), Some("cn=admin,dc=example,dc=com"));
        assert_eq!(config.credentials.as_deref(), Some("secret"));
    }

    #[test]
    fn test_connection_config_defaults() {
        let config = ConnectionConfig::default();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 389);
        assert!(!config.use_tls);
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.name, None);
    }

    #[test]
    fn test_connection_config_from_yaml_with_overrides() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "host: ldap.internal\nport: 636\nuse_tls: true\nname: cn=svc,dc=x").unwrap();

        let partial = ConnectionConfig::from_yaml_file(file.path()).unwrap();
        assert_eq!(partial.host, "ldap.internal");
        assert_eq!(partial.timeout_millis, 30_000);

        let args = ConnectionArgs {
            config: Some(file.path().to_path_buf()),
            port: Some(1636),
            timeout: Some(250),
            ..ConnectionArgs::default()
        };
        let config = args.resolve().unwrap();
        assert_eq!(config.host, "ldap.internal");
        assert_eq!(config.port, 1636);
        assert!(config.use_tls);
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.name.as_deref(), Some("cn=svc,dc=x"));
    }

    #[test]
    fn test_connection_config_rejects_bad_yaml() {
        assert!(matches!(
            ConnectionConfig::from_yaml_str("port: not-a-number"),
            Err(LdapMuxError::YamlParse(_))
        ));
    }

    #[test]
    fn test_server_config_from_serve_args() {
        let config = ServerConfig::from_serve_args(serve_args("127.0.0.1", 1389)).unwrap();
        assert_eq!(
            config.bind_address,
            SocketAddr::from_str("127.0.0.1:1389").unwrap()
        );
        assert_eq!(config.referral_mode, ReferralMode::Throw);

        let config = ServerConfig::from_serve_args(serve_args("::1", 389)).unwrap();
        assert_eq!(config.bind_address, SocketAddr::from_str("[::1]:389").unwrap());
    }

    #[test]
    fn test_server_config_invalid_values() {
        let result = ServerConfig::from_serve_args(serve_args("invalid_address", 389));
        assert!(matches!(result, Err(LdapMuxError::Config(_))));

        let mut args = serve_args("127.0.0.1", 389);
        args.referral_mode = "chase".to_string();
        assert!(matches!(
            ServerConfig::from_serve_args(args),
            Err(LdapMuxError::Config(_))
        ));
    }

    #[test]
    fn test_log_level_parsing() {
        let test_cases = vec![
            ("debug", tracing::Level::DEBUG),
            ("WARN", tracing::Level::WARN),
            ("error", tracing::Level::ERROR),
            ("invalid", tracing::Level::INFO), // default
        ];

        for (log_level_str, expected_level) in test_cases {
            let args = CliArgs::parse_from([
                "ldapmux",
                "--log-level",
                log_level_str,
                "bind",
            ]);
            assert_eq!(args.log_level(), expected_level);
        }

        let args = CliArgs::parse_from(["ldapmux", "bind", "-v", "--log-level", "error"]);
        assert_eq!(args.log_level(), tracing::Level::DEBUG);
    }
}
