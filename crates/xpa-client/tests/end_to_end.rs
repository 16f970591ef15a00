//! Client and server talking through the in-process bus, with the server
//! loop on its own thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};

use xpa_client::{Connection, NO_ARGS, Payload, RequestOptions, Select, Target};
use xpa_core::{Config, Error, Extraction, Shape, Status};
use xpa_server::{Engine, ReceiveCallback, Registry, SendCallback, Server, StopToken};
use xpa_transport_local::LocalBus;

struct Fixture {
    bus: LocalBus,
    engine: Engine,
    servers: Vec<Server>,
}

impl Fixture {
    fn new() -> Self {
        let bus = LocalBus::builder()
            .config(Arc::new(Config::isolated()))
            .owner("tester")
            .build();
        let engine = Engine::with_registry(Arc::new(bus.endpoint()), Arc::new(Registry::new()));
        Self {
            bus,
            engine,
            servers: Vec::new(),
        }
    }

    fn send(mut self, class: &str, name: &str, callback: SendCallback) -> Self {
        let server = self
            .engine
            .server(class, name, "help text", Some(callback), None)
            .unwrap();
        self.servers.push(server);
        self
    }

    fn receive(mut self, class: &str, name: &str, callback: ReceiveCallback) -> Self {
        let server = self
            .engine
            .server(class, name, "help text", None, Some(callback))
            .unwrap();
        self.servers.push(server);
        self
    }

    fn connect(&self) -> Connection {
        Connection::open(Arc::new(self.bus.clone()))
            .unwrap()
            .with_config(self.bus.config().clone())
    }

    /// Run the server loop until `stop` fires.
    fn run(self, stop: StopToken) -> (LocalBus, JoinHandle<()>) {
        let Fixture {
            bus,
            engine,
            servers,
        } = self;
        let handle = thread::spawn(move || {
            engine.mainloop_until(&stop).unwrap();
            drop(servers);
        });
        (bus, handle)
    }
}

fn text(reply_text: &str) -> SendCallback {
    let reply_text = reply_text.to_string();
    SendCallback::from_fn(move |_, _, buf| {
        buf.store_text(&reply_text);
        Status::Success
    })
}

#[test]
fn typed_get_returns_stored_integer() {
    let fixture = Fixture::new().send(
        "TEST",
        "test1",
        SendCallback::from_fn(|_, params, buf| {
            if params == "version" {
                buf.store_value(42i32);
            }
            Status::Success
        }),
    );
    let conn = fixture.connect();
    let stop = StopToken::new();
    let (_bus, server) = fixture.run(stop.clone());

    let version = conn
        .get_as::<i32, _>(&Shape::Vector, "TEST:test1", &["version"], &RequestOptions::new())
        .unwrap()
        .into_vector()
        .unwrap();
    assert_eq!(version, vec![42]);

    stop.stop();
    server.join().unwrap();
}

#[test]
fn quit_command_stops_mainloop() {
    let stop = StopToken::new();
    let fixture = Fixture::new().receive(
        "TEST",
        "test1",
        ReceiveCallback::new(stop.clone(), |stop, _, params, _| {
            if params == "quit" {
                stop.stop();
            }
            Status::Success
        }),
    );
    let conn = fixture.connect();
    let (_bus, server) = fixture.run(stop.clone());

    let reply = conn
        .set("TEST:test1", &["quit"], Payload::Empty, &RequestOptions::new())
        .unwrap();
    assert_eq!(reply.len(), 1);
    server.join().unwrap();
    assert!(stop.is_stopped());
}

#[test]
fn set_delivers_text_and_arguments() {
    let seen = Arc::new(parking_lot::Mutex::new(Vec::new()));
    let fixture = Fixture::new().receive(
        "T",
        "x",
        ReceiveCallback::new(seen.clone(), |seen, _, params, buf| {
            seen.lock().push((params.to_string(), buf.text().into_owned()));
            Status::Success
        }),
    );
    let conn = fixture.connect();
    let stop = StopToken::new();
    let (_bus, server) = fixture.run(stop.clone());

    let reply = conn
        .set("T:x", &["file", "a.fits"], "payload", &RequestOptions::new())
        .unwrap();
    assert!(!reply.has_errors());
    assert!(reply.server(0).unwrap().starts_with("T:x "));
    stop.stop();
    server.join().unwrap();
    assert_eq!(
        *seen.lock(),
        vec![("file a.fits".to_string(), "payload".to_string())]
    );
}

#[test]
fn application_errors_are_opt_in() {
    let fixture = Fixture::new().send(
        "T",
        "x",
        SendCallback::from_fn(|server, _, _| {
            server.error("disk full");
            Status::Failure
        }),
    );
    let conn = fixture.connect();
    let stop = StopToken::new();
    let (_bus, server) = fixture.run(stop.clone());

    let mut reply = conn.get("T:x", NO_ARGS, &RequestOptions::new()).unwrap();
    assert!(reply.has_errors());
    let entry = reply.entry(0).unwrap();
    assert!(entry.has_error());
    assert!(!entry.has_message());
    assert!(entry.error_text().unwrap().starts_with("disk full ("));
    assert_eq!(entry.data_len(), 0);

    let err = conn
        .get("T:x", NO_ARGS, &RequestOptions::new().throw_errors(true))
        .unwrap_err();
    match err {
        Error::Application { server, message } => {
            assert!(server.starts_with("T:x"));
            assert!(message.starts_with("disk full"));
        }
        other => panic!("unexpected error {other:?}"),
    }
    stop.stop();
    server.join().unwrap();
}

#[test]
fn templates_fan_out_up_to_nmax() {
    let fixture = Fixture::new()
        .send("T", "a", text("a"))
        .send("T", "b", text("b"))
        .send("U", "c", text("c"));
    let conn = fixture.connect();
    let stop = StopToken::new();
    let (_bus, server) = fixture.run(stop.clone());

    let template = Target::Template("t:*".to_string());
    let mut reply = conn.get(template.clone(), NO_ARGS, &RequestOptions::new()).unwrap();
    assert_eq!(reply.len(), 2);
    let mut texts: Vec<String> = (0..reply.len())
        .map(|i| reply.entry(i).unwrap().text())
        .collect();
    texts.sort();
    assert_eq!(texts, ["a", "b"]);

    let reply = conn
        .get(template, NO_ARGS, &RequestOptions::new().nmax(1))
        .unwrap();
    assert_eq!(reply.len(), 1);

    stop.stop();
    server.join().unwrap();
}

#[test]
fn patterns_must_resolve_to_one_server() {
    let fixture = Fixture::new().send("T", "a", text("a")).send("T", "b", text("b"));
    let conn = fixture.connect();
    let stop = StopToken::new();
    let (_bus, server) = fixture.run(stop.clone());

    let err = conn.get("T:*", NO_ARGS, &RequestOptions::new()).unwrap_err();
    assert_eq!(
        err,
        Error::Ambiguous {
            pattern: "T:*".to_string(),
            count: 2
        }
    );
    let err = conn.get("Q:*", NO_ARGS, &RequestOptions::new()).unwrap_err();
    assert!(matches!(err, Error::NoMatch { .. }));

    let mut reply = conn
        .get("T:*", NO_ARGS, &RequestOptions::new().select(Select::First))
        .unwrap();
    assert_eq!(reply.entry(0).unwrap().text(), "a");

    stop.stop();
    server.join().unwrap();
}

#[test]
fn extraction_take_and_copy() {
    let fixture = Fixture::new().send("T", "x", text("payload"));
    let conn = fixture.connect();
    let stop = StopToken::new();
    let (bus, server) = fixture.run(stop.clone());

    let mut reply = conn.get("T:x", NO_ARGS, &RequestOptions::new()).unwrap();
    {
        let mut entry = reply.entry(0).unwrap();
        assert_eq!(entry.bytes(Extraction::Copy), b"payload");
        assert_eq!(entry.bytes(Extraction::Copy), b"payload");
        assert_eq!(entry.bytes(Extraction::Take), b"payload");
        assert!(entry.bytes(Extraction::Take).is_empty());
    }
    drop(reply);
    assert_eq!(bus.heap().outstanding(), 0);

    stop.stop();
    server.join().unwrap();
}

#[test]
fn shaped_get_checks_size() {
    let fixture = Fixture::new().send(
        "T",
        "x",
        SendCallback::from_fn(|_, _, buf| {
            buf.store_values(&[1i32, 2, 3, 4, 5]);
            Status::Success
        }),
    );
    let conn = fixture.connect();
    let stop = StopToken::new();
    let (_bus, server) = fixture.run(stop.clone());

    let array = conn
        .get_as::<i32, _>(&Shape::Array(vec![2, 2]), "T:x", NO_ARGS, &RequestOptions::new())
        .unwrap()
        .into_array()
        .unwrap();
    assert_eq!(array.get(&[1, 1]), Some(4));

    let err = conn
        .get_as::<i32, _>(&Shape::Array(vec![3, 2]), "T:x", NO_ARGS, &RequestOptions::new())
        .unwrap_err();
    assert_eq!(
        err,
        Error::Size {
            needed: 24,
            available: 20
        }
    );

    stop.stop();
    server.join().unwrap();
}

#[test]
fn help_and_temporary_connections() {
    let fixture = Fixture::new().send("T", "x", text("unused"));
    let conn = Connection::temporary(Arc::new(fixture.bus.clone()))
        .with_config(fixture.bus.config().clone());
    let stop = StopToken::new();
    let (bus, server) = fixture.run(stop.clone());

    let help = conn
        .get_as::<u8, _>(&Shape::Text, "T:x", &["-help"], &RequestOptions::new())
        .unwrap()
        .into_text()
        .unwrap();
    assert_eq!(help, "help text\n");
    assert_eq!(bus.open_sessions(), 0);

    stop.stop();
    server.join().unwrap();
}

#[test]
fn typed_get_without_answer_fails() {
    let fixture = Fixture::new().send("T", "x", text("x"));
    let conn = fixture.connect();
    let err = conn
        .get_as::<u8, _>(
            &Shape::Bytes,
            Target::Template("Q:*".to_string()),
            NO_ARGS,
            &RequestOptions::new(),
        )
        .unwrap_err();
    assert!(matches!(err, Error::EmptyReply { .. }));
}

#[test]
fn closed_connection_is_refused() {
    let fixture = Fixture::new();
    let conn = fixture.connect();
    conn.close();
    let err = conn
        .get(Target::Template("T:*".to_string()), NO_ARGS, &RequestOptions::new())
        .unwrap_err();
    assert!(matches!(err, Error::Connection { .. }));
}
