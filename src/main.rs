#[macro_use]
extern crate tracing;

mod config;
mod http;

use anyhow::Context;
use blinkit_common::{
    LedController, PixelStore,
    controller::WARNING_FLASH,
    transport::{HardwareTransport, SimulatedTransport, Transport},
};
use config::{Config, ServeArgs, TransportKind};
use std::{fmt, net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    signal::{
        self,
        unix::{SignalKind, signal},
    },
    sync::{Notify, oneshot},
};
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(argh::FromArgs)]
/// Control an 8 pixel LED strip over HTTP and websockets
struct Args {
    #[argh(subcommand)]
    command: Command,
}

#[derive(argh::FromArgs)]
#[argh(subcommand)]
enum Command {
    Serve(ServeArgs),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ShutdownReason {
    Interrupt,
    Terminate,
    TransportFault,
}

impl fmt::Display for ShutdownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Interrupt => "Received SIGINT",
            Self::Terminate => "Received SIGTERM",
            Self::TransportFault => "Transport fault",
        })
    }
}

async fn shutdown_signal(fatal: &Notify) -> ShutdownReason {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut terminate) => {
                terminate.recv().await;
            }
            Err(err) => {
                warn!("cannot listen for SIGTERM: {err}");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        result = signal::ctrl_c() => {
            if let Err(err) = result {
                warn!("cannot listen for SIGINT: {err}");
            }
            ShutdownReason::Interrupt
        }
        () = terminate => ShutdownReason::Terminate,
        () = fatal.notified() => ShutdownReason::TransportFault,
    }
}

async fn serve(addr: SocketAddr, state: http::AppState, fatal: Arc<Notify>) -> anyhow::Result<ShutdownReason> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to listen on {addr}"))?;
    info!("Listening on {}", listener.local_addr()?);

    let (reason_tx, reason_rx) = oneshot::channel();
    axum::serve(listener, http::router(state))
        .with_graceful_shutdown(async move {
            let reason = shutdown_signal(&fatal).await;
            info!("{reason}, shutting down");
            let _ = reason_tx.send(reason);
        })
        .await?;

    Ok(reason_rx.await.unwrap_or(ShutdownReason::Interrupt))
}

async fn run_server(config: Config) -> anyhow::Result<()> {
    let store = Arc::new(PixelStore::new());
    let transport: Box<dyn Transport> = match config.transport {
        TransportKind::Hardware => Box::new(HardwareTransport::new(store, config.pins.clone())),
        TransportKind::Simulated => Box::new(SimulatedTransport::stdout(store)),
    };
    info!(transport = %config.transport, "using transport");

    let controller = Arc::new(LedController::new(transport));
    controller.setup().context("failed to set up transport")?;

    let fatal = Arc::new(Notify::new());
    let state = http::AppState::new(Arc::clone(&controller), &config.secret_key, Arc::clone(&fatal));

    // the lines are released whichever way serving ends
    let served = serve(config.addr, state, fatal).await;
    let released = controller.shutdown(WARNING_FLASH).await;

    let reason = served?;
    released.context("failed to release transport")?;

    anyhow::ensure!(
        reason != ShutdownReason::TransportFault,
        "stopped after a transport fault"
    );

    info!("bye");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args: Args = argh::from_env();

    match args.command {
        Command::Serve(args) => {
            let config = Config::from_env(args)?;
            debug!(addr = %config.addr, transport = %config.transport, pins = ?config.pins, "resolved config");

            tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()?
                .block_on(run_server(config))
        }
    }
}
