//! # tinyrpc CLI Entry Point
//!
//! ## Usage
//!
//! ```bash
//! # Serve the demo Arith service over TCP
//! tinyrpc serve -b 127.0.0.1:9999
//!
//! # Serve it through the HTTP gateway instead
//! tinyrpc serve -b 127.0.0.1:9998 --http
//!
//! # Make a call (outputs raw JSON)
//! tinyrpc call -d tcp@127.0.0.1:9999 Arith.Sum -a '{"num1": 3, "num2": 4}'
//! TINYRPC_ADDR=http@127.0.0.1:9998 tinyrpc call Arith.Mul -a '{"num1": 3, "num2": 4}'
//!
//! # Call every server
//! tinyrpc broadcast -s tcp@127.0.0.1:9001 -s tcp@127.0.0.1:9002 Arith.Sum -a '{"num1": 1, "num2": 2}'
//! ```

use anyhow::Result;
use argh::FromArgs;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tinyrpc_cli::{arith, cli_options, resolve_addr};
use tinyrpc_client::Client;
use tinyrpc_server::{HttpGateway, Server};
use tinyrpc_xclient::{MultiServersDiscovery, SelectMode, XClient};
use tokio::net::TcpListener;

#[derive(FromArgs)]
/// tinyrpc - a minimal RPC framework
struct Cli {
    #[argh(subcommand)]
    command: Commands,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Commands {
    Serve(ServeArgs),
    Call(CallArgs),
    Broadcast(BroadcastArgs),
}

#[derive(FromArgs)]
#[argh(subcommand, name = "serve")]
/// serve the demo Arith service
struct ServeArgs {
    /// address to bind to
    ///
    /// Defaults to "127.0.0.1:9999".
    #[argh(option, short = 'b', default = "\"127.0.0.1:9999\".into()")]
    bind: String,

    /// serve through the HTTP gateway (CONNECT tunnel + debug page)
    #[argh(switch)]
    http: bool,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "call")]
/// make a single RPC call and print the JSON reply
struct CallArgs {
    /// target as tcp@host:port or http@host:port, defaults to $TINYRPC_ADDR
    #[argh(option, short = 'd')]
    addr: Option<String>,

    /// method to call, as Service.Method
    #[argh(positional)]
    method: String,

    /// JSON arguments, defaults to `null`
    #[argh(option, short = 'a', long = "args", default = "\"null\".into()")]
    args: String,

    /// server-side handling timeout in milliseconds, 0 disables it
    #[argh(option, default = "0")]
    handle_timeout_ms: u64,

    /// client-side deadline in milliseconds, 0 disables it
    #[argh(option, default = "0")]
    timeout_ms: u64,
}

#[derive(FromArgs)]
#[argh(subcommand, name = "broadcast")]
/// call every listed server and print one reply
struct BroadcastArgs {
    /// server as tcp@host:port or http@host:port, repeatable
    #[argh(option, short = 's')]
    server: Vec<String>,

    /// method to call, as Service.Method
    #[argh(positional)]
    method: String,

    /// JSON arguments, defaults to `null`
    #[argh(option, short = 'a', long = "args", default = "\"null\".into()")]
    args: String,

    /// server-side handling timeout in milliseconds, 0 disables it
    #[argh(option, default = "0")]
    handle_timeout_ms: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli: Cli = argh::from_env();

    // call and broadcast keep stdout clean for piping
    if matches!(cli.command, Commands::Serve(_)) {
        let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    match cli.command {
        Commands::Serve(args) => run_serve(args).await,
        Commands::Call(args) => run_call(args).await,
        Commands::Broadcast(args) => run_broadcast(args).await,
    }
}

async fn run_serve(args: ServeArgs) -> Result<()> {
    let server = Server::new();
    server.register(arith::service()?)?;

    let listener = TcpListener::bind(&args.bind)
        .await
        .map_err(|e| anyhow::anyhow!("Failed to bind to {}: {}", args.bind, e))?;

    if args.http {
        tracing::info!("Serving over HTTP on {}", args.bind);
        HttpGateway::new(server).run(listener).await?;
    } else {
        tracing::info!("Serving over TCP on {}", args.bind);
        server.accept(listener).await?;
    }
    Ok(())
}

fn parse_args(args: &str) -> Result<Value> {
    serde_json::from_str(args).map_err(|e| anyhow::anyhow!("Invalid JSON in args: {}", e))
}

async fn run_call(args: CallArgs) -> Result<()> {
    let addr = resolve_addr(args.addr)?;
    let call_args = parse_args(&args.args)?;

    let client = Client::xdial(&addr, cli_options(args.handle_timeout_ms)).await?;
    let reply: Value = client
        .call_timeout(
            args.method.as_str(),
            &call_args,
            Duration::from_millis(args.timeout_ms),
        )
        .await?;
    let _ = client.close().await;

    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}

async fn run_broadcast(args: BroadcastArgs) -> Result<()> {
    let call_args = parse_args(&args.args)?;

    let discovery = Arc::new(MultiServersDiscovery::new(args.server));
    let xclient = XClient::new(discovery, SelectMode::RoundRobin, cli_options(args.handle_timeout_ms));
    let reply: Value = xclient.broadcast(&args.method, &call_args).await?;
    xclient.close().await?;

    println!("{}", serde_json::to_string(&reply)?);
    Ok(())
}
