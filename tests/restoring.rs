mod common;

use common::{server_options, settled, Harness};
use filedrop::transport::{Endpoint, RequestKind, ServerConfig};
use filedrop::{AddRequest, EventKind, ItemOrigin, ItemStatus, Options, Source};

fn with_remove_endpoint() -> Options {
    Options {
        server: Some(ServerConfig {
            remove: Some(Endpoint::path("remove")),
            ..ServerConfig::from_url("https://uploads.test/")
        }),
        ..server_options()
    }
}

fn persisted(h: &mut Harness, reference: &str) -> filedrop::ItemId {
    h.pond
        .add_file_with(AddRequest::new(Source::parse(reference)).with_origin(ItemOrigin::Local));
    let load = h.net.ids_of(RequestKind::Load)[0];
    h.answer(load, "stored bytes");
    h.pond.get_file_at(0).expect("loaded").id
}

#[test]
fn failed_fetch_can_be_retried() {
    let mut h = Harness::new(Options::default());
    let mut added = h.pond.add_file("https://example.com/cat.png");
    assert_eq!(h.status_of("cat.png"), Some(ItemStatus::Loading));

    h.refuse(h.net.ids_of(RequestKind::Fetch)[0], 503);
    h.tick();
    assert_eq!(h.status_of("cat.png"), Some(ItemStatus::LoadError));
    assert!(settled(&mut added).is_none(), "add waits for a retry");

    let id = h.pond.get_file_at(0).expect("kept").id;
    h.pond.retry_load(&id);
    assert_eq!(h.status_of("cat.png"), Some(ItemStatus::Loading));
    let fetches = h.net.ids_of(RequestKind::Fetch);
    assert_eq!(fetches.len(), 2);

    h.answer(fetches[1], "meow");
    let handle = settled(&mut added).expect("settled").expect("loaded on retry");
    assert_eq!(handle.status, ItemStatus::Idle);
    assert_eq!(handle.file_size(), Some(4));
}

#[test]
fn limbo_file_is_restored_as_uploaded() {
    let mut h = Harness::new(server_options());
    let mut added = h
        .pond
        .add_file_with(AddRequest::new(Source::parse("srv-9")).with_origin(ItemOrigin::Limbo));

    let restore = h.net.ids_of(RequestKind::Restore);
    assert_eq!(restore.len(), 1);
    h.answer(restore[0], "draft");
    h.tick();

    let handle = settled(&mut added).expect("settled").expect("restored");
    assert_eq!(handle.status, ItemStatus::ProcessingComplete);
    assert_eq!(handle.server_id.as_deref(), Some("srv-9"));
    assert!(h.uploads().is_empty(), "restored files are not uploaded again");
    assert_eq!(h.count(EventKind::ProcessFile), 1);
}

#[test]
fn persisted_file_is_removed_on_the_server() {
    let mut h = Harness::new(with_remove_endpoint());
    let id = persisted(&mut h, "doc-1");
    assert_eq!(h.status_of("doc-1"), Some(ItemStatus::Idle));

    let mut removed = h.pond.remove_file(&id, false);
    let remove = h.net.ids_of(RequestKind::Remove);
    assert_eq!(remove.len(), 1);
    assert!(settled(&mut removed).is_none(), "removal waits for the server");

    h.answer(remove[0], "");
    h.tick();
    assert!(settled(&mut removed).expect("settled").is_ok());
    assert!(h.pond.get_files().is_empty());
}

#[test]
fn refused_server_removal_keeps_the_file() {
    let mut h = Harness::new(with_remove_endpoint());
    let id = persisted(&mut h, "doc-1");

    let mut removed = h.pond.remove_file(&id, false);
    h.refuse(h.net.ids_of(RequestKind::Remove)[0], 500);
    h.tick();

    let failure = settled(&mut removed).expect("settled").expect_err("server refused");
    assert_eq!(failure.error.code, 500);
    assert_eq!(h.pond.get_files().len(), 1);
    assert_eq!(h.status_of("doc-1"), Some(ItemStatus::Idle));
}
