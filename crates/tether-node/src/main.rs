//! # tether-node
//!
//! Bootstrap for tether endpoints. Creates and manages keystores, and runs a
//! demo server exposing a few tasks other endpoints can ship work to.
//!
//! Logs go to stderr (filtered by `RUST_LOG`); stdout carries only what a
//! calling script needs to read.

mod commands;
mod demo;


use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use clap::Subcommand;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "tether-node")]
#[command(about = "Run and provision tether endpoints")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a communicator and serve the demo tasks until Ctrl-C
    Serve {
        /// Endpoint configuration, e.g.
        /// "type=tls; keystore=node.ks; password_file=/dev/stdin; host=127.0.0.1; port=7400"
        #[arg(long)]
        endpoint: String,
    },
    /// Create a keystore with a fresh self-signed identity
    Enroll {
        /// Human-readable endpoint name
        #[arg(long)]
        name: String,
        /// Certificate validity in days
        #[arg(long, default_value = "365")]
        days: u64,
        /// Where to write the keystore
        #[arg(long)]
        out: PathBuf,
        /// Where to write the generated password (stdout if omitted)
        #[arg(long)]
        password_out: Option<PathBuf>,
    },
    /// Write the keystore's own certificate to a file
    ExportCert {
        #[arg(long)]
        keystore: PathBuf,
        #[arg(long)]
        password_file: PathBuf,
        #[arg(long)]
        out: PathBuf,
    },
    /// Add a certificate to the keystore's trusted set
    Trust {
        #[arg(long)]
        keystore: PathBuf,
        #[arg(long)]
        password_file: PathBuf,
        #[arg(long)]
        certificate: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    match args.command {
        Command::Serve { endpoint } => commands::serve(&endpoint).await,
        Command::Enroll { name, days, out, password_out } => {
            let password = commands::enroll(&name, days, &out, password_out.as_deref())?;
            if let Some(password) = password {
                // the caller reads the only copy of the password from stdout
                let stdout = std::io::stdout();
                commands::print_password(&mut stdout.lock(), &password)?;
            }
            Ok(())
        }
        Command::ExportCert { keystore, password_file, out } => {
            commands::export_cert(&keystore, &password_file, &out)?;
            Ok(())
        }
        Command::Trust { keystore, password_file, certificate } => {
            let fingerprint = commands::trust(&keystore, &password_file, &certificate)?;
            println!("{}", fingerprint);
            Ok(())
        }
    }
}
