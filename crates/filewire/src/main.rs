mod cmd;
mod exit;
mod logging;
mod watcher;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};

#[derive(Parser, Debug)]
#[command(name = "filewire", version, about = "Peer-to-peer file sync node")]
struct Cli {
    /// Log output format (stderr).
    #[arg(long, value_name = "FORMAT", default_value = "text", global = true)]
    log_format: LogFormat,

    /// Minimum log level (stderr).
    #[arg(long, value_name = "LEVEL", default_value = "info", global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.log_format, cli.log_level);

    let result = cmd::run(cli.command);

    match result {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(err.code);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_serve_subcommand() {
        let cli = Cli::try_parse_from([
            "filewire",
            "serve",
            "--share-dir",
            "/tmp/share",
            "--advertise",
            "localhost:4242",
        ])
        .expect("serve args should parse");

        assert!(matches!(cli.command, Command::Serve(_)));
    }

    #[test]
    fn serve_requires_advertise() {
        let err = Cli::try_parse_from(["filewire", "serve", "--share-dir", "/tmp/share"])
            .expect_err("missing --advertise should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn serve_accepts_repeated_connect_flags() {
        let cli = Cli::try_parse_from([
            "filewire",
            "serve",
            "--share-dir",
            "/tmp/share",
            "--advertise",
            "localhost:4242",
            "--connect",
            "a:1",
            "--connect",
            "b:2",
        ])
        .expect("repeated --connect should parse");

        match cli.command {
            Command::Serve(args) => assert_eq!(args.connect.len(), 2),
            _ => panic!("expected serve command"),
        }
    }

    #[test]
    fn parses_version_subcommand() {
        let cli =
            Cli::try_parse_from(["filewire", "version", "--extended"]).expect("version args");
        assert!(matches!(cli.command, Command::Version(_)));
    }
}
