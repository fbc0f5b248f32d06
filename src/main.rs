use std::{io, process, thread, time::Duration};

use clap::Parser;
use env_logger::{Env, TimestampPrecision};
use log::*;
use payment_protos::payment::{PaymentStatus, Provider};
use signal_hook::consts::{SIGINT, SIGTERM};
use thiserror::Error;
use tokio::{runtime::Runtime, sync::watch};

use crate::{
    channel::{ChannelManager, ConnectionError},
    client::{ListFilter, PaymentClient, RequestError, StreamFilter},
    presenter::{ConsolePresenter, OutputFormat, Presenter},
    session::Session,
};

mod channel;
mod client;
#[cfg(test)]
mod mock_server;
mod presenter;
mod session;
mod stats;

#[derive(Clone, Debug, Parser)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Address of the payment service. Either `host:port` or a full `http://` / `https://` URL.
    #[arg(long, env, default_value = "localhost:50051")]
    grpc_address: String,

    /// How long to wait for the channel to become ready before giving up.
    #[arg(long, env, default_value_t = 5_000)]
    connect_timeout_ms: u64,

    /// How events, payments and the session summary are printed.
    #[arg(long, env, value_enum, default_value_t = OutputFormat::Simple)]
    output_format: OutputFormat,

    /// Defaults to `stream` when omitted.
    #[command(subcommand)]
    command: Option<ClientSubcommands>,
}

#[derive(Clone, Debug, clap::Subcommand)]
enum ClientSubcommands {
    /// Subscribes to live payment events until interrupted or the server ends the stream.
    Stream(StreamArgs),

    /// Fetches a single payment by id.
    Get {
        payment_id: String,
    },

    /// Lists payments matching the given filters.
    List(ListArgs),
}

#[derive(clap::Args, Clone, Debug, Default)]
struct StreamArgs {
    /// Only receive payments from this provider, by name (`stripe`) or code (`1`).
    #[arg(long, env = "STREAM_PROVIDER", value_parser = parse_provider)]
    provider: Option<Provider>,
}

#[derive(clap::Args, Clone, Debug)]
struct ListArgs {
    /// Provider name or code.
    #[arg(long, value_parser = parse_provider)]
    provider: Option<Provider>,

    /// Status name (`completed`) or code (`2`).
    #[arg(long, value_parser = parse_status)]
    status: Option<PaymentStatus>,

    /// Maximum number of payments. Sent as 10 when omitted; `0` is passed through to the server.
    #[arg(long)]
    limit: Option<i32>,
}

#[derive(Debug, Error)]
pub enum PaymentClientError {
    #[error("ConnectionError {0}")]
    ConnectionError(#[from] ConnectionError),
    #[error("RequestError {0}")]
    RequestError(#[from] RequestError),
    #[error("IoError {0}")]
    IoError(#[from] io::Error),
}

fn parse_provider(value: &str) -> Result<Provider, String> {
    if let Ok(code) = value.parse::<i32>() {
        return Provider::try_from(code).map_err(|_| format!("unknown provider code {code}"));
    }
    let name = value.trim().to_ascii_uppercase();
    let name = name.strip_prefix("PROVIDER_").unwrap_or(&name);
    Provider::from_str_name(&format!("PROVIDER_{name}"))
        .ok_or_else(|| format!("unknown provider {value}"))
}

fn parse_status(value: &str) -> Result<PaymentStatus, String> {
    if let Ok(code) = value.parse::<i32>() {
        return PaymentStatus::try_from(code).map_err(|_| format!("unknown status code {code}"));
    }
    let name = value.trim().to_ascii_uppercase();
    let name = name
        .strip_prefix("PAYMENT_STATUS_")
        .or_else(|| name.strip_prefix("STATUS_"))
        .unwrap_or(&name);
    PaymentStatus::from_str_name(&format!("PAYMENT_STATUS_{name}"))
        .ok_or_else(|| format!("unknown status {value}"))
}

// Creates a watch channel that flips to `true` when `SIGINT` or `SIGTERM` is signalled.
fn shutdown_notifier() -> io::Result<watch::Receiver<bool>> {
    let (s, r) = watch::channel(false);
    let mut signals = signal_hook::iterator::Signals::new([SIGINT, SIGTERM])?;

    thread::Builder::new()
        .name("pmtSignalWatch".to_string())
        .spawn(move || {
            for signal in signals.forever() {
                info!("Received signal {signal}, shutting down");
                if s.send(true).is_err() {
                    break;
                }
            }
        })?;

    Ok(r)
}

async fn wait_for_shutdown(mut receiver: watch::Receiver<bool>) {
    while !*receiver.borrow_and_update() {
        if receiver.changed().await.is_err() {
            // notifier is gone, no signal can arrive anymore
            std::future::pending::<()>().await;
        }
    }
}

fn main() -> Result<(), PaymentClientError> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info"))
        .format_timestamp(Some(TimestampPrecision::Millis))
        .init();

    let args = Args::parse();
    let connect_timeout = Duration::from_millis(args.connect_timeout_ms);
    let mut client = PaymentClient::new(ChannelManager::new(args.grpc_address.clone()));
    let mut presenter = ConsolePresenter::new(args.output_format);
    let runtime = Runtime::new()?;

    match args.command.unwrap_or(ClientSubcommands::Stream(StreamArgs::default())) {
        ClientSubcommands::Stream(stream_args) => {
            let shutdown_receiver = shutdown_notifier()?;
            info!(
                "Payment stream client connecting to {} (timeout {connect_timeout:?})",
                client.address()
            );
            let outcome = runtime.block_on(Session::new(presenter).run(
                &mut client,
                StreamFilter {
                    provider: stream_args.provider,
                },
                connect_timeout,
                wait_for_shutdown(shutdown_receiver),
            ));
            debug!("Session states: {:?}", outcome.states);
            match outcome.exit_code() {
                0 => info!("Session ended: {}", outcome.cause),
                code => error!(
                    "Session ended: {} ({} payments received), exiting with code {code}",
                    outcome.cause, outcome.report.total
                ),
            }
            process::exit(outcome.exit_code());
        }
        ClientSubcommands::Get { payment_id } => {
            let payment = runtime.block_on(async {
                client.connect(connect_timeout).await?;
                let payment = client.get_payment(&payment_id).await;
                client.close();
                Ok::<_, PaymentClientError>(payment?)
            })?;
            presenter.present_payment(&payment);
        }
        ClientSubcommands::List(list_args) => {
            let filter = ListFilter {
                provider: list_args.provider,
                status: list_args.status,
                limit: list_args.limit,
            };
            let payments = runtime.block_on(async {
                client.connect(connect_timeout).await?;
                let payments = client.list_payments(filter).await;
                client.close();
                Ok::<_, PaymentClientError>(payments?)
            })?;
            info!("Received {} payments", payments.len());
            for payment in payments.iter() {
                presenter.present_payment(payment);
            }
        }
    }
    Ok(())
}
