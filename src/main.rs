#![allow(missing_docs)]

//! Operational CLI for the parentline notification dispatcher.
//!
//! `send` performs a one-shot dispatch from the command line and prints the
//! outcome as JSON; `diagnose` renders the masked configuration report.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tokio::time::Instant;
use tracing::info;

use parentline::audit::{AuditSink, JsonlAuditSink, NullAuditSink};
use parentline::channel::ChannelHint;
use parentline::config::Credentials;
use parentline::{DispatchRequest, Dispatcher};

#[derive(Parser)]
#[command(name = "parentline", version, about = "Payment-notification dispatch over Twilio")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Dispatch one notification and print the outcome as JSON.
    Send {
        /// Recipient contact (E.164, formatted, or `whatsapp:`-prefixed).
        #[arg(long)]
        to: String,
        /// Message body, already formatted.
        #[arg(long)]
        body: String,
        /// Requested channel.
        #[arg(long, value_enum, default_value = "auto")]
        channel: ChannelArg,
        /// Idempotency key; repeated keys return the cached outcome.
        #[arg(long)]
        idempotency_key: Option<String>,
        /// Wall-clock bound for the whole dispatch, in seconds.
        #[arg(long)]
        timeout_secs: Option<u64>,
        /// Audit log path (JSON lines). Omit to disable auditing.
        #[arg(long)]
        audit_log: Option<std::path::PathBuf>,
    },
    /// Print the masked credential report and exit.
    Diagnose,
}

#[derive(Clone, Copy, ValueEnum)]
enum ChannelArg {
    Sms,
    Whatsapp,
    Auto,
}

impl From<ChannelArg> for ChannelHint {
    fn from(arg: ChannelArg) -> Self {
        match arg {
            ChannelArg::Sms => Self::Sms,
            ChannelArg::Whatsapp => Self::Whatsapp,
            ChannelArg::Auto => Self::Auto,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    parentline::logging::init_cli();

    let cli = Cli::parse();
    match cli.command {
        Command::Send {
            to,
            body,
            channel,
            idempotency_key,
            timeout_secs,
            audit_log,
        } => {
            let audit: Arc<dyn AuditSink> = match audit_log {
                Some(path) => Arc::new(
                    JsonlAuditSink::new(&path)
                        .with_context(|| format!("failed to open audit log {}", path.display()))?,
                ),
                None => Arc::new(NullAuditSink),
            };

            let dispatcher =
                Dispatcher::from_env(audit).context("failed to resolve Twilio credentials")?;

            let mut request =
                DispatchRequest::new(to, body).with_channel(ChannelHint::from(channel));
            if let Some(key) = idempotency_key {
                request = request.with_idempotency_key(key);
            }
            if let Some(secs) = timeout_secs {
                if let Some(deadline) = Instant::now().checked_add(Duration::from_secs(secs)) {
                    request = request.with_deadline(deadline);
                }
            }

            let outcome = dispatcher.dispatch(request).await;
            println!(
                "{}",
                serde_json::to_string_pretty(&outcome).context("failed to render outcome")?
            );

            if outcome.is_sent() {
                info!("notification accepted by carrier");
                Ok(())
            } else {
                std::process::exit(1);
            }
        }
        Command::Diagnose => {
            let report = match Credentials::resolve() {
                Ok(credentials) => credentials.diagnostic(),
                Err(e) => {
                    eprintln!("configuration error: {e}");
                    println!("{}", Credentials::disabled().diagnostic());
                    std::process::exit(1);
                }
            };
            println!("{report}");
            Ok(())
        }
    }
}
