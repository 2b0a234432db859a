pub mod app;

use tracing::{debug, info, warn};

use app::config::{config_path, load_config, save_config};
use app::error::AppError;
use app::logging::init_logging;
use app::state::AppState;

/// Headless daemon: bootstraps the shell, keeps it supervised and logs navigation changes
/// until Ctrl-C.
pub fn run() -> Result<(), AppError> {
    let config = load_config()?;
    init_logging(&config.logging);
    if !config_path().exists() {
        match save_config(&config) {
            Ok(()) => info!(path = %config_path().display(), "wrote default config"),
            Err(err) => warn!(error = %err, "failed to write default config"),
        }
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("tv-sleep")
        .build()
        .map_err(|err| AppError::system(format!("Failed to start runtime: {err}"), ""))?;
    let state = AppState::new(config, runtime.handle().clone())?;
    runtime.block_on(serve(&state))
}

async fn serve(state: &AppState) -> Result<(), AppError> {
    let retry_after = state.config.bootstrap.restart_debounce();
    let mut home = state.home.subscribe();
    let output = state.session.watch_output();
    let mut tail = output.subscribe();

    let connect = async {
        while !state.connect().await {
            warn!(retry_ms = retry_after.as_millis() as u64, "shell bootstrap failed, retrying");
            tokio::time::sleep(retry_after).await;
        }
    };
    let follow_home = async {
        loop {
            let current = *home.borrow_and_update();
            let live_shell = state.session.has_live_process().await;
            info!(home = ?current, live_shell, "navigation state");
            if home.changed().await.is_err() {
                break;
            }
        }
    };

    let follow_output = async {
        while tail.changed().await.is_ok() {
            let latest = tail.borrow_and_update().clone();
            if let Some(line) = latest.lines().last() {
                debug!(line, "shell output");
            }
        }
    };

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.map_err(|err| AppError::system(format!("Failed to listen for Ctrl-C: {err}"), ""))?;
            info!("shutting down");
        }
        _ = async { tokio::join!(connect, follow_home, follow_output) } => {}
    }

    state.shutdown().await;
    Ok(())
}
