use linger::prelude::*;

/// Exit status on an invalid combination of flags.
const EXIT_CONFIG: i32 = 1;
/// Exit status when binding fails.
const EXIT_BIND: i32 = 2;
/// Exit status when the transport lacks a required capability.
const EXIT_CAPABILITY: i32 = 3;

#[tokio::main]
async fn main() {
    env_logger::Builder::new()
        .parse_filters("info")
        .parse_env("LINGER_LOG")
        .init();

    let matches = config::command().get_matches();
    let config = match config::from_matches(&matches) {
        Ok(config) => Arc::new(config),
        Err(err) => {
            error!("Invalid configuration: {err}");
            std::process::exit(EXIT_CONFIG);
        }
    };
    debug!("Using {config:?}");

    tokio::select! {
        result = run(config) => {
            // `run` only returns on errors.
            let Err(err) = result else { return };
            error!("{err}");
            std::process::exit(match err {
                Error::Bind(..) => EXIT_BIND,
                Error::Capability => EXIT_CAPABILITY,
            });
        }
        () = ctrl_c() => info!("Shutting down"),
    }
}

/// Resolves on Ctrl-C. Never resolves if the signal can't be listened for.
async fn ctrl_c() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for Ctrl-C: {err}");
        std::future::pending::<()>().await;
    }
}
