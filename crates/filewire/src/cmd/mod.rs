use clap::{Args, Subcommand};
use std::path::PathBuf;

use crate::exit::CliResult;

pub mod serve;
pub mod version;

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run a node: watch a share directory, accept peer connections, and
    /// replicate changes to every connected, handshaked peer.
    Serve(ServeArgs),
    /// Show version information.
    Version(VersionArgs),
}

pub fn run(command: Command) -> CliResult<i32> {
    match command {
        Command::Serve(args) => serve::run(args),
        Command::Version(args) => version::run(args),
    }
}

#[derive(Args, Debug)]
pub struct ServeArgs {
    /// Address to listen on for incoming peer connections.
    #[arg(long, default_value = "0.0.0.0:4242")]
    pub listen: String,

    /// This node's own host and port, as advertised to peers in
    /// HANDSHAKE_REQUEST/HANDSHAKE_RESPONSE. Required — the listen address
    /// is usually a wildcard bind and isn't a usable peer identity by
    /// itself.
    #[arg(long, value_parser = parse_host_port)]
    pub advertise: filewire_proto::HostPort,

    /// Root directory this node shares and watches for changes.
    #[arg(long, value_name = "DIR")]
    pub share_dir: PathBuf,

    /// Maximum bytes requested per FILE_BYTES_REQUEST chunk.
    #[arg(long, default_value_t = 64 * 1024)]
    pub block_size: u64,

    /// Maximum number of simultaneous incoming connections.
    #[arg(long, default_value_t = 10)]
    pub max_connections: usize,

    /// Peer(s) to connect to at startup (repeatable), as `host:port`.
    #[arg(long = "connect", value_name = "HOST:PORT", value_parser = parse_host_port)]
    pub connect: Vec<filewire_proto::HostPort>,
}

/// Parses a `host:port` CLI argument into a [`filewire_proto::HostPort`].
fn parse_host_port(raw: &str) -> Result<filewire_proto::HostPort, String> {
    let (host, port) = raw
        .rsplit_once(':')
        .ok_or_else(|| format!("expected HOST:PORT, got {raw:?}"))?;
    let port: u16 = port
        .parse()
        .map_err(|_| format!("invalid port in {raw:?}"))?;
    if host.is_empty() {
        return Err(format!("missing host in {raw:?}"));
    }
    Ok(filewire_proto::HostPort::new(host, port))
}

#[derive(Args, Debug)]
pub struct VersionArgs {
    /// Show extended build provenance.
    #[arg(long)]
    pub extended: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_host_port() {
        let hp = parse_host_port("peer.local:4242").unwrap();
        assert_eq!(hp, filewire_proto::HostPort::new("peer.local", 4242));
    }

    #[test]
    fn rejects_missing_port() {
        assert!(parse_host_port("peer.local").is_err());
    }

    #[test]
    fn rejects_non_numeric_port() {
        assert!(parse_host_port("peer.local:abc").is_err());
    }
}
