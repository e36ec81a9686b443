//! `cytodeploy` -- one-shot bootstrap and launch of the cytotoxic scheduler.
//!
//! Checks the host for Python 3, uv, Node.js and pm2, installs what is
//! missing, prepares the app directory and virtual environment, starts the
//! app under pm2 and confirms it came up. Safe to re-run.
//!
//! Operator messages go to stdout; structured logs go to stderr and are
//! filtered with `RUST_LOG`.
//!
//! # Environment variables
//!
//! | Variable                 | Required | Default                      | Description                              |
//! |--------------------------|----------|------------------------------|------------------------------------------|
//! | `APP_DIR`                | no       | resolved from executable     | Application root                         |
//! | `PROCESS_NAME`           | no       | `cytotoxic-scheduler`        | Supervised process name                  |
//! | `APP_PORT`               | no       | `8501`                       | Port the app listens on                  |
//! | `APP_ADDRESS`            | no       | `0.0.0.0`                    | Bind address for a generated descriptor  |
//! | `DESCRIPTOR_FILE`        | no       | `ecosystem.config.json`      | pm2 descriptor, relative to the app root |
//! | `DESCRIPTOR_PLACEHOLDER` | no       | `/path/to/allergy-cytotoxic` | Path token replaced in the descriptor    |
//! | `VERIFY_DELAY_SECS`      | no       | `3`                          | Wait before the post-launch check        |
//! | `INSTALL_TIMEOUT_SECS`   | no       | `600`                        | Limit for each install or sync command   |

use std::process::ExitCode;

use cytodeploy_core::config::DeployConfig;
use cytodeploy_core::console::Console;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cytodeploy=info,cytodeploy_core=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match DeployConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "Invalid configuration");
            Console::stdout().error(e.to_string());
            return ExitCode::from(e.exit_code());
        }
    };

    tracing::info!(
        process_name = %config.process_name,
        port = config.port,
        "Starting cytodeploy",
    );

    cytodeploy::run(config, Console::stdout()).await
}
