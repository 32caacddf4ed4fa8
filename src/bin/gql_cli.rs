//! gql-cli: run a GraphQL operation from the command line
//!
//! Usage:
//!   gql-cli query <url> <query> [--variables <json>]       Query over HTTP
//!   gql-cli mutate <url> <query> [--variables <json>]      Mutation over HTTP
//!   gql-cli subscribe <url> <query> [--variables <json>]   Subscription over graphql-ws
//!
//! Every envelope is printed as one JSON line. Set `RUST_LOG=gql_transport=debug`
//! (and `GQL_WS_LOG=1` for frame dumps) to see the protocol.

use std::sync::Arc;

use anyhow::{bail, Context};
use gql_transport::response::Response;
use gql_transport::transport::HttpTransport;
use gql_transport::types::{OperationResponse, Request};
use gql_transport::ws::{WsConfig, WsTransport};
use gql_transport::Transport;
use serde_json::{Map, Value};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let result = match args[1].as_str() {
        "query" | "mutate" | "subscribe" => run(&args[1], &args[2..]).await,
        "version" | "--version" | "-V" => {
            println!("gql-cli {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        "help" | "--help" | "-h" => {
            print_usage();
            Ok(())
        }
        other => {
            eprintln!("Unknown command: {other}");
            eprintln!();
            print_usage();
            std::process::exit(1);
        }
    };

    if let Err(e) = result {
        eprintln!("error: {e:#}");
        std::process::exit(1);
    }
}

fn print_usage() {
    println!(
        r#"gql-cli: GraphQL transport command line tool

USAGE:
    gql-cli <COMMAND> <URL> <QUERY> [OPTIONS]

COMMANDS:
    query       Run a query over HTTP
    mutate      Run a mutation over HTTP
    subscribe   Run a subscription over WebSocket (graphql-ws) until it completes or Ctrl-C
    version     Show version information
    help        Show this help message

OPTIONS:
    --variables <json>      Variables object, e.g. '{{"name":"test"}}'
    --operation-name <name> Operation name to send

ENVIRONMENT:
    GQL_HTTP_TIMEOUT_SECS       HTTP timeout (default 30)
    GQL_WS_TIMEOUT_SECS         WebSocket read/write timeout (default 60)
    GQL_WS_RETRY_TIMEOUT_SECS   How long to keep redialing (default 300)
    GQL_WS_LOG                  Log every WebSocket frame at debug level
    RUST_LOG                    Log filter"#
    );
}

struct Invocation {
    url: String,
    request: Request,
}

fn parse(command: &str, args: &[String]) -> anyhow::Result<Invocation> {
    let (url, query) = match args {
        [url, query, ..] => (url.clone(), query.clone()),
        _ => bail!("{command} needs <url> and <query>"),
    };

    let mut request = match command {
        "mutate" => Request::mutation(query),
        "subscribe" => Request::subscription(query),
        _ => Request::query(query),
    };

    let mut rest = args[2..].iter();
    while let Some(flag) = rest.next() {
        match flag.as_str() {
            "--variables" => {
                let raw = rest.next().context("--variables needs a value")?;
                let vars: Map<String, Value> =
                    serde_json::from_str(raw).context("--variables must be a JSON object")?;
                request = request.with_variables(vars);
            }
            "--operation-name" => {
                let name = rest.next().context("--operation-name needs a value")?;
                request = request.with_operation_name(name.clone());
            }
            other => bail!("unknown option: {other}"),
        }
    }

    Ok(Invocation { url, request })
}

async fn run(command: &str, args: &[String]) -> anyhow::Result<()> {
    let Invocation { url, request } = parse(command, args)?;

    if command != "subscribe" {
        let transport = HttpTransport::new(&url)?;
        let res = transport.request(request).await?;
        while res.next().await {
            print_envelope(&res.current())?;
        }
        if let Some(e) = res.err() {
            return Err(e.into());
        }
        return Ok(());
    }

    let ws = WsTransport::new(WsConfig::new(url))?;
    let handle = ws.start();

    let ctx = CancellationToken::new();
    let interrupt = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            interrupt.cancel();
        }
    });

    let client = gql_transport::Client::new(Arc::new(ws.clone()));
    let res = client.subscribe(request.with_context(ctx)).await?;
    while res.next().await {
        print_envelope(&res.current())?;
    }
    let terminal = res.err();

    ws.close().await?;
    handle.wait().await?;

    match terminal {
        Some(e) => Err(e.into()),
        None => Ok(()),
    }
}

fn print_envelope(envelope: &OperationResponse) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string(envelope)?);
    Ok(())
}
