//! `chatdump` -- dump ICQ chat history into a document store.
//!
//! Reads its configuration from the environment (and an optional `.env`
//! file); see [`DumperConfig::from_env`] for the full list of variables.
//!
//! # Environment variables
//!
//! | Variable       | Required | Default | Description                          |
//! |----------------|----------|---------|--------------------------------------|
//! | `ICQ_AIMSID`   | yes      | --      | Session id of the dumping account    |
//! | `DATABASE_URL` | no       | --      | Postgres URL; in-memory when unset   |
//! | `ICQ_CHAT`     | no       | `all`   | Chat id to dump, or `all`            |
//! | `RUST_LOG`     | no       | `chatdump=debug` | Log filter                  |

use chatdump_dumper::DumperConfig;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "chatdump=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = DumperConfig::from_env().unwrap_or_else(|e| {
        tracing::error!(error = %e, "Invalid configuration");
        std::process::exit(1);
    });

    tracing::info!(
        chat = ?config.chat,
        api_url = %config.api_url,
        workers = config.worker_count,
        queue_capacity = config.queue_capacity,
        persistent = config.database_url.is_some(),
        "Starting chatdump",
    );

    match chatdump_dumper::run(config).await {
        Ok(summary) if summary.interrupted => {
            tracing::warn!("Dump interrupted before all chats were walked");
        }
        Ok(_) => {}
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Dump failed");
            std::process::exit(1);
        }
    }
}
