mod cmd;
mod exit;
mod logging;
mod output;

use clap::Parser;

use crate::cmd::Command;
use crate::logging::{init_logging, LogFormat, LogLevel};
use crate::output::OutputFormat;

#[derive(Parser, Debug)]
#[command(
    name = "fieldcast",
    version,
    about = "Stream a computed field from a worker group to a live consumer"
)]
struct Cli {
    /// Output format.
    #[arg(long, value_name = "FORMAT", global = true)]
    format: Option<OutputFormat>,

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

    let format = cli.format.unwrap_or_else(OutputFormat::default_for_stdout);
    let result = cmd::run(cli.command, format);

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
    fn parses_compute_subcommand() {
        let cli = Cli::try_parse_from([
            "fieldcast",
            "compute",
            "--open-port",
            "--duration",
            "2s",
            "--allocation",
            "per-tick",
        ])
        .expect("compute args should parse");

        match cli.command {
            Command::Compute(args) => {
                assert!(args.open_port);
                assert_eq!(args.workers, 2);
                assert_eq!(args.duration, "2s");
            }
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn parses_visualize_subcommand() {
        let cli = Cli::try_parse_from([
            "fieldcast",
            "--format",
            "json",
            "visualize",
            "--policy",
            "complete",
            "--exit-on-quit",
        ])
        .expect("visualize args should parse");
        assert!(matches!(cli.command, Command::Visualize(_)));
    }

    #[test]
    fn rejects_unknown_policy() {
        let err = Cli::try_parse_from(["fieldcast", "visualize", "--policy", "oldest"])
            .expect_err("unknown policy should fail");
        assert_eq!(err.kind(), clap::error::ErrorKind::InvalidValue);
    }
}
