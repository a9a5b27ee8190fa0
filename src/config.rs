//! CLI arguments and server configuration defaults.

use clap::Parser;
use std::io;
use std::path::PathBuf;

pub const DEFAULT_CONTENT_DIR: &str = "cdn";
pub const DEFAULT_TCP_HOST: &str = "0.0.0.0";
pub const DEFAULT_TCP_PORT: u16 = 3004;
pub const DEFAULT_TCP_ADDRESS: &str = "0.0.0.0:3004";
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/simple-cdn.sock";
pub const DEFAULT_UPLOAD_MAX_SIZE: u64 = 0;
pub const DEFAULT_UPLOAD_BUFFER_LIMIT: usize = 32 * 1024 * 1024;
pub const SHUTDOWN_GRACE_SECS: u64 = 10;

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "simple-cdn", version, about = "Static file server with keyed uploads")]
pub struct Args {
    #[arg(
        short = 'd',
        long,
        env = "CDN_CONTENT_DIR",
        default_value = DEFAULT_CONTENT_DIR,
        help = "Content root served at / and written by uploads"
    )]
    pub content_dir: String,
    #[arg(
        short = 'a',
        long,
        env = "CDN_ADDRESS",
        help = "Bind address (host:port) or socket path in unix socket mode"
    )]
    pub address: Option<String>,
    #[arg(
        long,
        env = "IP_ADDRESS",
        help = "TCP bind host, used when --address is unset"
    )]
    pub ip_address: Option<String>,
    #[arg(
        long,
        env = "REST_PORT",
        help = "TCP bind port, used when --address is unset"
    )]
    pub rest_port: Option<u16>,
    #[arg(
        short = 'u',
        long,
        env = "CDN_UNIX_SOCKET",
        default_value_t = false,
        help = "Listen on a unix domain socket instead of TCP"
    )]
    pub unix_socket: bool,
    #[arg(
        short = 'k',
        long,
        env = "UPLOAD_KEY",
        hide_env_values = true,
        value_parser = parse_upload_key,
        help = "Shared secret required by POST /upload"
    )]
    pub upload_key: String,
    #[arg(long, env = "CDN_CORS_ORIGINS", help = "Comma separated CORS origins")]
    pub cors_origins: Option<String>,
    #[arg(
        long,
        env = "CDN_UPLOAD_MAX_SIZE",
        default_value_t = DEFAULT_UPLOAD_MAX_SIZE,
        help = "Max upload request size in bytes (0 to disable)"
    )]
    pub upload_max_size: u64,
    #[arg(
        long,
        env = "CDN_UPLOAD_BUFFER_LIMIT",
        default_value_t = DEFAULT_UPLOAD_BUFFER_LIMIT,
        help = "Max bytes held in memory for a file part sent before the upload key"
    )]
    pub upload_buffer_limit: usize,
}

/// Where the HTTP listener binds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenTarget {
    Tcp(String),
    Unix(PathBuf),
}

impl Args {
    pub fn listen_target(&self) -> Result<ListenTarget, io::Error> {
        let address = self
            .address
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty());

        if self.unix_socket {
            let path = address.unwrap_or(DEFAULT_SOCKET_PATH);
            return Ok(ListenTarget::Unix(PathBuf::from(path)));
        }

        let address = match address {
            Some(address) => address.to_string(),
            None => {
                let host = self
                    .ip_address
                    .as_deref()
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .unwrap_or(DEFAULT_TCP_HOST);
                format!("{host}:{}", self.rest_port.unwrap_or(DEFAULT_TCP_PORT))
            }
        };
        if !address.contains(':') {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("bind address `{address}` must be host:port"),
            ));
        }
        Ok(ListenTarget::Tcp(address))
    }
}

fn parse_upload_key(value: &str) -> Result<String, String> {
    if value.is_empty() {
        return Err("upload key must not be empty".into());
    }
    Ok(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["simple-cdn", "--upload-key", "secret"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).expect("parse args")
    }

    #[test]
    fn tcp_target_defaults_to_all_interfaces() {
        let args = parse(&[]);
        assert_eq!(
            args.listen_target().expect("target"),
            ListenTarget::Tcp(DEFAULT_TCP_ADDRESS.to_string())
        );
    }

    #[test]
    fn unix_target_defaults_to_socket_path() {
        let args = parse(&["--unix-socket"]);
        assert_eq!(
            args.listen_target().expect("target"),
            ListenTarget::Unix(PathBuf::from(DEFAULT_SOCKET_PATH))
        );
    }

    #[test]
    fn unix_target_uses_explicit_address() {
        let args = parse(&["--unix-socket", "--address", "/run/cdn.sock"]);
        assert_eq!(
            args.listen_target().expect("target"),
            ListenTarget::Unix(PathBuf::from("/run/cdn.sock"))
        );
    }

    #[test]
    fn tcp_target_falls_back_to_host_and_port() {
        let args = parse(&["--ip-address", "127.0.0.1", "--rest-port", "8080"]);
        assert_eq!(
            args.listen_target().expect("target"),
            ListenTarget::Tcp("127.0.0.1:8080".to_string())
        );

        let args = parse(&["--rest-port", "8080"]);
        assert_eq!(
            args.listen_target().expect("target"),
            ListenTarget::Tcp("0.0.0.0:8080".to_string())
        );
    }

    #[test]
    fn explicit_address_wins_over_host_and_port() {
        let args = parse(&["--address", "10.0.0.1:9000", "--rest-port", "8080"]);
        assert_eq!(
            args.listen_target().expect("target"),
            ListenTarget::Tcp("10.0.0.1:9000".to_string())
        );
    }

    #[test]
    fn tcp_target_requires_port() {
        let args = parse(&["--address", "127.0.0.1"]);
        assert!(args.listen_target().is_err());
    }

    #[test]
    fn empty_upload_key_is_rejected() {
        let result = Args::try_parse_from(["simple-cdn", "--upload-key", ""]);
        assert!(result.is_err());
    }
}
