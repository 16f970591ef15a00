//! Loopback demo.
//!
//! Registers a `DEMO:loopback` access point on an in-process bus, serves it
//! from a background thread and talks to it as a client:
//!
//!   cargo run -p xpa-demo-loopback
//!   cargo run -p xpa-demo-loopback -- --method local --json
//!
//! The server answers `get version`, `get counter` and `get stored`; `set
//! store` keeps the payload and `set quit` stops the server loop.

use std::sync::Arc;
use std::thread;

use anyhow::Context;
use clap::Parser;
use parking_lot::Mutex;
use serde::Serialize;
use tracing_subscriber::EnvFilter;
use xpa_client::{Connection, ListOptions, Payload, RequestOptions};
use xpa_core::{Config, Method, Reply, Shape, Status};
use xpa_server::{Engine, ReceiveCallback, SendBuffer, SendCallback, ServerContext, StopToken};
use xpa_transport_local::LocalBus;

#[derive(Parser, Debug)]
#[command(name = "xpa-loopback", about = "Serve and query an XPA access point in one process")]
struct Args {
    /// Address form given to servers (inet or local).
    #[arg(long, env = "XPA_METHOD", default_value = "inet")]
    method: Method,

    #[arg(long, default_value = "DEMO")]
    class: String,

    #[arg(long, default_value = "loopback")]
    name: String,

    /// Print listings and answers as JSON.
    #[arg(long)]
    json: bool,
}

#[derive(Serialize)]
struct Answer {
    server: String,
    message: String,
    data: String,
}

fn answers(reply: &mut Reply) -> anyhow::Result<Vec<Answer>> {
    let mut out = Vec::with_capacity(reply.len());
    for i in 0..reply.len() {
        let mut entry = reply.entry(i)?;
        out.push(Answer {
            server: entry.server().into_owned(),
            message: entry.message().trim_end().to_string(),
            data: entry.text(),
        });
    }
    Ok(out)
}

fn print(json: bool, label: &str, reply: &mut Reply) -> anyhow::Result<()> {
    let answers = answers(reply)?;
    if json {
        println!("{}", serde_json::to_string(&answers)?);
        return Ok(());
    }
    for answer in answers {
        if answer.message.is_empty() {
            println!("{label}: {} -> {:?}", answer.server, answer.data);
        } else {
            println!("{label}: {} -> {}", answer.server, answer.message);
        }
    }
    Ok(())
}

/// State behind the demo access point.
#[derive(Default)]
struct Demo {
    counter: u64,
    stored: String,
}

fn send(state: &mut Demo, server: &ServerContext<'_>, params: &str, buf: &mut SendBuffer<'_>) -> Status {
    match params.trim() {
        "version" => buf.store_text(env!("CARGO_PKG_VERSION")),
        "counter" => {
            state.counter += 1;
            buf.store_text(&state.counter.to_string());
        }
        "stored" => buf.store_text(&state.stored),
        other => {
            server.error(&format!("unknown command \"{other}\""));
            return Status::Failure;
        }
    }
    Status::Success
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("xpa_loopback=info".parse()?)
                .add_directive("xpa_transport_local=info".parse()?),
        )
        .init();

    let args = Args::parse();
    let config = Arc::new(Config::new());
    let bus = LocalBus::builder()
        .config(config.clone())
        .method(args.method)
        .build();

    let stop = StopToken::new();
    let state = Arc::new(Mutex::new(Demo::default()));
    let engine = Engine::new(Arc::new(bus.endpoint()));
    let server = engine
        .server(
            &args.class,
            &args.name,
            "get: version|counter|stored; set: store|quit",
            Some(SendCallback::new(state.clone(), |state, server, params, buf| {
                send(&mut state.lock(), server, params, buf)
            })),
            Some(ReceiveCallback::new((state, stop.clone()), |data, _, params, buf| {
                let (state, stop) = data;
                match params.trim() {
                    "store" => state.lock().stored = buf.text().into_owned(),
                    "quit" => stop.stop(),
                    _ => {}
                }
                Status::Success
            })),
        )
        .context("registering the demo access point")?;
    tracing::info!(address = ?server.method(), "serving {}:{}", args.class, args.name);

    let server_loop = {
        let stop = stop.clone();
        thread::spawn(move || {
            let result = engine.mainloop_until(&stop);
            drop(server);
            result
        })
    };

    let conn = Connection::open(Arc::new(bus.clone()))?.with_config(config);
    let target = format!("{}:{}", args.class, args.name);

    let listing = conn.list(|_| true, &ListOptions::default())?;
    if args.json {
        println!("{}", serde_json::to_string(&listing)?);
    } else {
        for apt in &listing {
            println!("list: {apt}");
        }
    }

    let options = RequestOptions::new();
    for command in ["version", "counter", "counter"] {
        print(args.json, "get", &mut conn.get(target.as_str(), &[command], &options)?)?;
    }
    conn.set(target.as_str(), &["store"], "hello from the client", &options.clone().throw_errors(true))?;
    let stored = conn
        .get_as::<u8, _>(&Shape::Text, target.as_str(), &["stored"], &options)?
        .into_text()
        .unwrap_or_default();
    println!("stored: {stored}");
    print(args.json, "get", &mut conn.get(target.as_str(), &["bogus"], &options)?)?;
    print(args.json, "help", &mut conn.get(target.as_str(), &["-help"], &options)?)?;

    conn.set(target.as_str(), &["quit"], Payload::Empty, &options)?;
    server_loop
        .join()
        .map_err(|_| anyhow::anyhow!("server thread panicked"))??;
    tracing::info!(sessions = bus.open_sessions(), "done");
    Ok(())
}
