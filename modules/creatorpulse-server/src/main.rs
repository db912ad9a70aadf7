use std::process::ExitCode;

use anyhow::Result;
use clap::{error::ErrorKind, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use creatorpulse_common::Config;

mod app;
mod handlers;

use app::{http_router, App};

/// Exit codes per sysexits: usage, data, unavailable, internal.
const EX_USAGE: u8 = 64;
const EX_DATAERR: u8 = 65;
const EX_UNAVAILABLE: u8 = 69;
const EX_SOFTWARE: u8 = 70;

#[derive(Parser)]
#[command(name = "creatorpulse", about = "Multi-platform scraping orchestration plane")]
struct Cli {
    /// Base URL of a running server, for the operational subcommands.
    #[arg(long, global = true, default_value = "http://127.0.0.1:8080")]
    server_url: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP server, workers, and sweepers.
    Serve,
    /// Operate on a named job queue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
    /// Webhook maintenance.
    Webhook {
        #[command(subcommand)]
        action: WebhookAction,
    },
    /// API key lifecycle.
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },
    /// Show aggregated health.
    Health,
    /// Show gateway, pipeline, and queue metrics.
    Metrics,
}

#[derive(Subcommand)]
enum QueueAction {
    Pause { name: String },
    Resume { name: String },
    Clean { name: String },
}

#[derive(Subcommand)]
enum WebhookAction {
    /// Re-drive dead-lettered webhook events.
    RetryDlq,
}

#[derive(Subcommand)]
enum KeyAction {
    Create {
        name: String,
        /// Comma-separated permissions, e.g. tiktok:get,instagram:get
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,
    },
    Rotate {
        id: String,
    },
    Revoke {
        id: String,
        #[arg(long)]
        reason: Option<String>,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err)
            if matches!(
                err.kind(),
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion
            ) =>
        {
            let _ = err.print();
            return ExitCode::SUCCESS;
        }
        Err(err) => {
            let _ = err.print();
            return ExitCode::from(EX_USAGE);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("creatorpulse=info".parse().expect("static directive")),
        )
        .init();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(err) => {
            eprintln!("failed to start runtime: {err}");
            return ExitCode::from(EX_SOFTWARE);
        }
    };

    match cli.command {
        Command::Serve => runtime.block_on(serve()),
        command => runtime.block_on(client_command(&cli.server_url, command)),
    }
}

async fn serve() -> ExitCode {
    let config = match Config::server_from_env() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("invalid configuration: {err}");
            return ExitCode::from(EX_DATAERR);
        }
    };
    config.log_redacted();

    let app = match App::build_postgres(config.clone()).await {
        Ok(app) => app,
        Err(err) => {
            eprintln!("failed to reach the datastore: {err}");
            return ExitCode::from(EX_UNAVAILABLE);
        }
    };
    let _background = app.spawn_background();

    let addr = format!("{}:{}", config.host, config.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("failed to bind {addr}: {err}");
            return ExitCode::from(EX_UNAVAILABLE);
        }
    };
    info!(addr = %addr, "Server listening");

    match axum::serve(listener, http_router(app)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("server failed: {err}");
            ExitCode::from(EX_SOFTWARE)
        }
    }
}

async fn client_command(server_url: &str, command: Command) -> ExitCode {
    let client = reqwest::Client::new();
    let result = match command {
        Command::Serve => unreachable!("handled by caller"),
        Command::Queue { action } => match action {
            QueueAction::Pause { name } => {
                post_json(&client, &format!("{server_url}/admin/queues/{name}/pause")).await
            }
            QueueAction::Resume { name } => {
                post_json(&client, &format!("{server_url}/admin/queues/{name}/resume")).await
            }
            QueueAction::Clean { name } => {
                post_json(&client, &format!("{server_url}/admin/queues/{name}/clean")).await
            }
        },
        Command::Webhook { action } => match action {
            WebhookAction::RetryDlq => {
                post_json(&client, &format!("{server_url}/admin/webhooks/retry-dlq")).await
            }
        },
        Command::Key { action } => match action {
            KeyAction::Create { name, permissions } => {
                post_body(
                    &client,
                    &format!("{server_url}/admin/keys"),
                    serde_json::json!({"name": name, "permissions": permissions}),
                )
                .await
            }
            KeyAction::Rotate { id } => {
                post_json(&client, &format!("{server_url}/admin/keys/{id}/rotate")).await
            }
            KeyAction::Revoke { id, reason } => {
                post_body(
                    &client,
                    &format!("{server_url}/admin/keys/{id}/revoke"),
                    serde_json::json!({"reason": reason}),
                )
                .await
            }
        },
        Command::Health => get_json(&client, &format!("{server_url}/health")).await,
        Command::Metrics => get_json(&client, &format!("{server_url}/metrics")).await,
    };

    match result {
        Ok((status, body)) => {
            println!("{}", serde_json::to_string_pretty(&body).unwrap_or_default());
            exit_for_status(status)
        }
        Err(err) => {
            eprintln!("request failed: {err}");
            ExitCode::from(EX_UNAVAILABLE)
        }
    }
}

async fn get_json(
    client: &reqwest::Client,
    url: &str,
) -> Result<(u16, serde_json::Value)> {
    let resp = client.get(url).send().await?;
    decode(resp).await
}

async fn post_json(
    client: &reqwest::Client,
    url: &str,
) -> Result<(u16, serde_json::Value)> {
    let resp = client.post(url).send().await?;
    decode(resp).await
}

async fn post_body(
    client: &reqwest::Client,
    url: &str,
    body: serde_json::Value,
) -> Result<(u16, serde_json::Value)> {
    let resp = client.post(url).json(&body).send().await?;
    decode(resp).await
}

async fn decode(resp: reqwest::Response) -> Result<(u16, serde_json::Value)> {
    let status = resp.status().as_u16();
    let body = resp.json().await.unwrap_or(serde_json::Value::Null);
    Ok((status, body))
}

fn exit_for_status(status: u16) -> ExitCode {
    match status {
        200..=299 => ExitCode::SUCCESS,
        503 => ExitCode::from(EX_UNAVAILABLE),
        400..=499 => ExitCode::from(EX_DATAERR),
        _ => ExitCode::from(EX_SOFTWARE),
    }
}
