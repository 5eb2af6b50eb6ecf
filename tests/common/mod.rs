#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;

use filedrop::transport::{MemoryTransport, RequestId, RequestKind, Response, ServerConfig, TransportEvent};
use filedrop::{EventKind, File, ItemStatus, Options, Outcome, Pending, Pond};

/// A pond wired to an in-memory network, recording public event kinds.
pub struct Harness {
    pub pond: Pond,
    pub net: MemoryTransport,
    pub events: Rc<RefCell<Vec<EventKind>>>,
}

impl Harness {
    pub fn new(options: Options) -> Self {
        let net = MemoryTransport::new();
        let mut pond = Pond::new(options, Box::new(net.clone()), Some(11)).expect("valid options");
        let events = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&events);
        pond.on(move |event| log.borrow_mut().push(event.kind));
        Self { pond, net, events }
    }

    /// One host turn: deliver events, render a resting frame, deliver again.
    pub fn tick(&mut self) {
        self.pond.advance(0);
        self.pond.frame(true);
        self.pond.advance(0);
    }

    pub fn uploads(&self) -> Vec<RequestId> {
        self.net.ids_of(RequestKind::Process)
    }

    pub fn answer(&mut self, id: RequestId, body: &str) {
        self.pond
            .on_transport(id, TransportEvent::Load(Response::load(200, body.to_string())));
    }

    pub fn refuse(&mut self, id: RequestId, code: u16) {
        self.pond
            .on_transport(id, TransportEvent::Error(Response::error(code, "server said no")));
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.borrow().iter().filter(|seen| **seen == kind).count()
    }

    pub fn status_of(&self, name: &str) -> Option<ItemStatus> {
        self.pond
            .get_files()
            .into_iter()
            .find(|file| file.filename() == name)
            .map(|file| file.status)
    }
}

/// Options for a pond that uploads to a test server without the minimum
/// upload duration.
pub fn server_options() -> Options {
    Options {
        server: Some(ServerConfig::from_url("https://uploads.test/")),
        allow_minimum_upload_duration: false,
        ..Options::default()
    }
}

pub fn text_file(name: &str) -> File {
    File::new(name, format!("content of {name}").into_bytes())
}

/// The outcome of a pending result, if it settled already.
pub fn settled<T>(pending: &mut Pending<T>) -> Option<Outcome<T>> {
    pending.try_recv().ok().flatten()
}
