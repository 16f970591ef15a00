//! Name-server listings and access-point resolution.

use std::sync::Arc;

use xpa_client::{Connection, ListOptions, OnMalformed, Select};
use xpa_core::{Access, Config, Error, Method, Status};
use xpa_server::{Engine, ReceiveCallback, Registry, SendCallback, Server};
use xpa_transport_local::LocalBus;

fn bus(method: Method) -> LocalBus {
    LocalBus::builder()
        .config(Arc::new(Config::isolated()))
        .method(method)
        .owner("tester")
        .build()
}

fn register(engine: &Engine, class: &str, name: &str, get: bool, set: bool) -> Server {
    let send = get.then(|| SendCallback::from_fn(|_, _, _| Status::Success));
    let recv = set.then(|| ReceiveCallback::from_fn(|_, _, _| Status::Success));
    engine.server(class, name, "", send, recv).unwrap()
}

fn connect(bus: &LocalBus) -> Connection {
    Connection::open(Arc::new(bus.clone()))
        .unwrap()
        .with_config(bus.config().clone())
}

#[test]
fn list_returns_registered_access_points() {
    let bus = bus(Method::Inet);
    let engine = Engine::with_registry(Arc::new(bus.endpoint()), Arc::new(Registry::new()));
    let _a = register(&engine, "DS9", "ds9", true, true);
    let _b = register(&engine, "DS9", "ro", true, false);
    let _c = register(&engine, "FOO", "bar", false, true);
    let conn = connect(&bus);

    let all = conn.list(|_| true, &ListOptions::default()).unwrap();
    assert_eq!(all.len(), 3);
    assert!(all.iter().all(|apt| apt.owner() == "tester"));
    assert_eq!(all[1].access(), Access::GET | Access::INFO);
    assert_eq!(all[2].access(), Access::SET | Access::INFO);

    let ds9 = conn
        .list(|apt| apt.matches("ds9:*"), &ListOptions::default())
        .unwrap();
    assert_eq!(ds9.len(), 2);

    let local = ListOptions {
        method: Some(Method::Local),
        ..ListOptions::default()
    };
    assert!(conn.list(|_| true, &local).unwrap().is_empty());
}

#[test]
fn find_and_address() {
    let bus = bus(Method::Local);
    let engine = Engine::with_registry(Arc::new(bus.endpoint()), Arc::new(Registry::new()));
    let one = register(&engine, "DS9", "one", true, true);
    let _two = register(&engine, "DS9", "two", true, true);
    let conn = connect(&bus);

    let found = conn.find("DS9:one", &Select::Error).unwrap().unwrap();
    assert_eq!(found.method(), Some(Method::Local));
    assert_eq!(Some(found.address().to_string()), one.method());
    assert_eq!(conn.find("DS9:none", &Select::Error).unwrap(), None);

    assert!(matches!(
        conn.find("DS9:*", &Select::Error),
        Err(Error::Ambiguous { count: 2, .. })
    ));
    let last = conn
        .find("DS9:*", &Select::with(|candidates| candidates.last().cloned()))
        .unwrap()
        .unwrap();
    assert_eq!(last.name(), "two");
    assert!(matches!(
        conn.find("DS9:*", &Select::with(|_| None)),
        Err(Error::Ambiguous { .. })
    ));

    assert_eq!(conn.address("DS9:one").unwrap(), found.address());
    assert_eq!(conn.address("10.0.0.1:5000").unwrap(), "10.0.0.1:5000");
    assert!(matches!(conn.address("DS9:*"), Err(Error::Ambiguous { .. })));
    assert!(matches!(conn.address("NOPE:*"), Err(Error::NoMatch { .. })));
}

#[test]
fn closed_servers_leave_the_listing() {
    let bus = bus(Method::Inet);
    let engine = Engine::with_registry(Arc::new(bus.endpoint()), Arc::new(Registry::new()));
    let server = register(&engine, "T", "x", true, false);
    let conn = connect(&bus);
    let options = ListOptions {
        on_malformed: OnMalformed::Fail,
        ..ListOptions::default()
    };
    assert_eq!(conn.list(|_| true, &options).unwrap().len(), 1);
    server.close();
    assert!(conn.list(|_| true, &options).unwrap().is_empty());
}
