//! `identity_http` server entry point.

use clap::Parser;
use identity_core::init_logging;
use identity_http::config::ServerArgs;
use identity_http::{app, AppState};
use log::info;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = ServerArgs::parse();

    let log_dir = args.resolved_log_dir()?;
    init_logging(args.log_level(), &log_dir.to_string_lossy())?;

    let state = AppState::new(args.db.clone());
    // Fail before binding when the database cannot be opened or migrated.
    state.check_store()?;

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    info!(
        "event=server_start module=http status=ok bind={} db={}",
        args.bind,
        args.db.display()
    );
    println!("identity_http listening on http://{}", args.bind);

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("event=server_stop module=http status=ok");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        log::error!(
            "event=server_stop module=http status=error error_code=signal_failed error={}",
            err
        );
    }
}
