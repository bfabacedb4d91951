//! papo - interactive chat client
//!
//! Reads lines from stdin; a prefix symbol selects the action (`$` text,
//! `!` file, `#` user destination, `@` group destination, `/` named
//! command), anything else is sent as text. Inbound messages are rendered
//! by the receive pipeline as they arrive.

use anyhow::{Context, Result};
use papo::broker::BrokerConnection;
use papo::chat::commands::{self, Command, GROUP_SYMBOL, USER_SYMBOL};
use papo::chat::{AdminClient, ChatClient, Config};
use std::io::Write as _;
use tokio::io::{AsyncBufReadExt, BufReader};

const LOGIN_PROMPT: &str = "<< ";
const PROMPT: &str = ">> ";

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = Config::from_env();

    let conn = BrokerConnection::connect(config.broker_addr())
        .await
        .with_context(|| format!("failed to connect to broker at {}", config.broker_addr()))?;
    let admin = AdminClient::new(
        &config.host,
        config.admin_port,
        &config.vhost,
        &config.user,
        &config.password,
    )
    .context("failed to build admin client")?;

    std::fs::create_dir_all(&config.download_dir)
        .with_context(|| format!("failed to create {}", config.download_dir.display()))?;

    let client = ChatClient::new(conn, admin, config.download_dir.clone());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print_prompt(&client)?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if !client.is_logged_in() {
            match client.login(line).await {
                Ok(()) => println!("Logged in as {line}"),
                Err(e) => eprintln!("{e}"),
            }
            continue;
        }

        let command: Command = commands::parse(line);
        if !commands::execute(&client, command).await {
            break;
        }
    }

    println!("Exited");
    Ok(())
}

fn print_prompt(client: &ChatClient) -> Result<()> {
    let prompt = if client.is_logged_in() {
        let snapshot = client.snapshot();
        let destination = snapshot
            .destination_label()
            .replacen("user=", &USER_SYMBOL.to_string(), 1)
            .replacen("group=", &GROUP_SYMBOL.to_string(), 1);
        format!("{}{}{}", snapshot.user, destination, PROMPT)
    } else {
        LOGIN_PROMPT.to_string()
    };

    print!("{prompt}");
    std::io::stdout().flush()?;
    Ok(())
}
