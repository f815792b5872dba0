//! # cashlock CLI entry point
//!
//! Parses command-line arguments and dispatches to subcommand handlers.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use cashlock_cli::certify::{run_certify, CertifyArgs};
use cashlock_cli::invariants::{run_invariants_cmd, InvariantsArgs};
use cashlock_cli::load_engine;
use cashlock_cli::matching::{run_match, MatchArgs};
use cashlock_cli::normalize::{run_normalize, NormalizeArgs};
use cashlock_cli::trust::{run_trust_report, TrustReportArgs};

/// Cashlock operator CLI
///
/// Offline tooling for the reconciliation engine: normalize bank
/// statements, run matching over snapshot fixtures, score them, and
/// certify them against external cash-position exports.
#[derive(Parser, Debug)]
#[command(name = "cashlock", version, about, long_about = None)]
struct Cli {
    /// Enable verbose output. Repeat for more verbosity (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Engine configuration YAML (policies, thresholds, certification,
    /// intercompany groups).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Normalize a bank statement file into canonical JSON.
    Normalize(NormalizeArgs),

    /// Run matching over a snapshot fixture.
    Match(MatchArgs),

    /// Run the invariant suite over a snapshot fixture.
    Invariants(InvariantsArgs),

    /// Generate the trust report and lock-gate evaluation for a fixture.
    TrustReport(TrustReportArgs),

    /// Compare an external export against a fixture.
    Certify(CertifyArgs),
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize tracing based on verbosity level.
    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = match cli.command {
        Commands::Normalize(args) => run_normalize(&args),
        Commands::Match(args) => {
            load_engine(cli.config.as_deref()).and_then(|engine| run_match(&args, &engine))
        }
        Commands::Invariants(args) => load_engine(cli.config.as_deref())
            .and_then(|engine| run_invariants_cmd(&args, &engine)),
        Commands::TrustReport(args) => load_engine(cli.config.as_deref())
            .and_then(|engine| run_trust_report(&args, &engine)),
        Commands::Certify(args) => {
            load_engine(cli.config.as_deref()).and_then(|engine| run_certify(&args, &engine))
        }
    };

    match result {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            tracing::error!("{e:#}");
            eprintln!("error: {e:#}");
            ExitCode::from(1)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_parse_normalize() {
        let cli = Cli::try_parse_from([
            "cashlock",
            "normalize",
            "de.sta",
            "--entity",
            "ACME-DE",
            "--format",
            "mt940",
        ])
        .unwrap();
        if let Commands::Normalize(args) = cli.command {
            assert_eq!(args.path, PathBuf::from("de.sta"));
            assert_eq!(args.entity_id, "ACME-DE");
            assert_eq!(args.format.as_deref(), Some("mt940"));
            assert!(!args.verify_only);
        } else {
            panic!("expected normalize");
        }
    }

    #[test]
    fn cli_parse_normalize_requires_entity() {
        assert!(Cli::try_parse_from(["cashlock", "normalize", "de.sta"]).is_err());
    }

    #[test]
    fn cli_parse_match_with_global_flags() {
        let cli =
            Cli::try_parse_from(["cashlock", "-vv", "match", "w13.yaml", "--config", "engine.yaml"])
                .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.config, Some(PathBuf::from("engine.yaml")));
        assert!(matches!(cli.command, Commands::Match(_)));
    }

    #[test]
    fn cli_parse_trust_report_check() {
        let cli = Cli::try_parse_from(["cashlock", "trust-report", "w13.yaml", "--check"]).unwrap();
        if let Commands::TrustReport(args) = cli.command {
            assert!(args.check);
            assert!(!args.no_match);
        } else {
            panic!("expected trust-report");
        }
    }

    #[test]
    fn cli_parse_invariants_only_is_repeatable() {
        let cli = Cli::try_parse_from([
            "cashlock",
            "invariants",
            "w13.yaml",
            "--only",
            "fx_rate_integrity",
            "--only",
            "duplicate_transactions",
        ])
        .unwrap();
        if let Commands::Invariants(args) = cli.command {
            assert_eq!(args.only.len(), 2);
        } else {
            panic!("expected invariants");
        }
    }

    #[test]
    fn cli_parse_certify() {
        let cli = Cli::try_parse_from([
            "cashlock",
            "certify",
            "w13.yaml",
            "kyriba.csv",
            "--certifier",
            "cfo@acme.example",
            "--artifact",
            "out.json",
        ])
        .unwrap();
        if let Commands::Certify(args) = cli.command {
            assert_eq!(args.export, PathBuf::from("kyriba.csv"));
            assert_eq!(args.system, "external");
            assert_eq!(args.certifier.as_deref(), Some("cfo@acme.example"));
            assert_eq!(args.artifact, Some(PathBuf::from("out.json")));
        } else {
            panic!("expected certify");
        }
    }

    #[test]
    fn cli_rejects_unknown_subcommand() {
        assert!(Cli::try_parse_from(["cashlock", "sync"]).is_err());
    }
}
