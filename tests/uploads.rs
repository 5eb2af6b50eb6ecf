mod common;

use common::{server_options, settled, text_file, Harness};
use filedrop::transport::{RequestKind, ResponseKind};
use filedrop::{AddRequest, EventKind, ItemStatus, Options};

fn multi(max_parallel_uploads: usize) -> Options {
    Options {
        allow_multiple: true,
        max_parallel_uploads,
        ..server_options()
    }
}

#[test]
fn three_files_share_two_upload_slots() {
    let mut h = Harness::new(multi(2));
    let mut added = h.pond.add_files(
        ["a.txt", "b.txt", "c.txt"]
            .into_iter()
            .map(|name| AddRequest::new(text_file(name).into()))
            .collect(),
    );

    let handles = settled(&mut added).expect("settled").expect("all added");
    let names: Vec<&str> = handles.iter().map(|handle| handle.filename()).collect();
    assert_eq!(names, vec!["a.txt", "b.txt", "c.txt"]);

    h.tick();
    assert_eq!(h.uploads().len(), 2);
    let statuses: Vec<ItemStatus> = h.pond.get_files().into_iter().map(|file| file.status).collect();
    assert_eq!(statuses.iter().filter(|s| **s == ItemStatus::Processing).count(), 2);
    assert_eq!(statuses.iter().filter(|s| **s == ItemStatus::ProcessingQueued).count(), 1);

    let first = h.uploads()[0];
    h.answer(first, "srv-1");
    h.tick();
    assert_eq!(h.uploads().len(), 3, "freed slot goes to the queued file");

    for id in h.uploads().into_iter().skip(1) {
        h.answer(id, "srv-n");
    }
    h.tick();

    assert!(h
        .pond
        .get_files()
        .iter()
        .all(|file| file.status == ItemStatus::ProcessingComplete));
    assert_eq!(h.count(EventKind::ProcessFile), 3);
    assert_eq!(h.count(EventKind::ProcessFiles), 1);
}

#[test]
fn queued_files_start_in_request_order() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..multi(1)
    });
    for name in ["a.txt", "b.txt", "c.txt"] {
        h.pond.add_file(text_file(name));
    }
    let ids: Vec<_> = h.pond.get_files().into_iter().map(|file| (file.filename().to_string(), file.id)).collect();
    let id = |name: &str| ids.iter().find(|(n, _)| n == name).map(|(_, id)| id.clone()).expect("file exists");

    h.pond.process_file(&id("c.txt"));
    h.pond.process_file(&id("a.txt"));
    h.pond.process_file(&id("b.txt"));
    h.tick();

    assert_eq!(h.status_of("c.txt"), Some(ItemStatus::Processing));
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::ProcessingQueued));
    assert_eq!(h.status_of("b.txt"), Some(ItemStatus::ProcessingQueued));

    h.answer(h.uploads()[0], "srv-c");
    h.tick();
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::Processing));
    assert_eq!(h.status_of("b.txt"), Some(ItemStatus::ProcessingQueued));

    h.answer(h.uploads()[1], "srv-a");
    h.tick();
    assert_eq!(h.status_of("b.txt"), Some(ItemStatus::Processing));
}

#[test]
fn processing_resolves_with_server_id() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..server_options()
    });
    h.pond.add_file(text_file("a.txt"));
    let id = h.pond.get_file_at(0).expect("added").id;
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::Idle));

    let mut processed = h.pond.process_file(&id);
    h.tick();
    assert!(settled(&mut processed).is_none());

    h.answer(h.uploads()[0], "srv-7");
    let handle = settled(&mut processed).expect("settled").expect("uploaded");
    assert_eq!(handle.status, ItemStatus::ProcessingComplete);
    assert_eq!(handle.server_id.as_deref(), Some("srv-7"));
}

#[test]
fn aborted_upload_returns_to_idle_without_instant_upload() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..server_options()
    });
    h.pond.add_file(text_file("a.txt"));
    let id = h.pond.get_file_at(0).expect("added").id;
    let mut processed = h.pond.process_file(&id);
    h.tick();
    let upload = h.uploads()[0];

    let mut aborted = h.pond.abort_processing(&id);
    h.tick();

    let handle = settled(&mut aborted).expect("settled").expect("abort acknowledged");
    assert_eq!(handle.status, ItemStatus::Idle);
    let failure = settled(&mut processed).expect("settled").expect_err("upload was aborted");
    assert_eq!(failure.error.kind, ResponseKind::Abort);
    assert_eq!(h.net.aborted(), vec![upload]);
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::Idle));
    assert_eq!(h.count(EventKind::ProcessFileAbort), 1);
}

#[test]
fn aborted_upload_removes_the_file_with_instant_upload() {
    let mut h = Harness::new(server_options());
    h.pond.add_file(text_file("a.txt"));
    h.tick();
    let id = h.pond.get_file_at(0).expect("added").id;
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::Processing));

    h.pond.abort_processing(&id);
    h.tick();

    assert!(h.pond.get_files().is_empty());
    assert_eq!(h.count(EventKind::RemoveFile), 1);
}

#[test]
fn failed_upload_can_be_retried() {
    let mut h = Harness::new(server_options());
    h.pond.add_file(text_file("a.txt"));
    h.tick();
    let id = h.pond.get_file_at(0).expect("added").id;

    h.refuse(h.uploads()[0], 500);
    h.tick();
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::ProcessingError));
    assert_eq!(h.count(EventKind::Error), 1);

    h.pond.retry_processing(&id);
    h.tick();
    assert_eq!(h.uploads().len(), 2);
    h.answer(h.uploads()[1], "srv-2");
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::ProcessingComplete));
}

#[test]
fn unforced_revert_removes_at_once() {
    let mut h = Harness::new(server_options());
    h.pond.add_file(text_file("a.txt"));
    h.tick();
    h.answer(h.uploads()[0], "srv-1");
    let id = h.pond.get_file_at(0).expect("added").id;

    let mut removed = h.pond.remove_file(&id, true);
    h.tick();

    assert!(settled(&mut removed).expect("settled").is_ok());
    assert!(h.pond.get_files().is_empty());
    assert_eq!(h.net.ids_of(RequestKind::Revert).len(), 1);
    assert!(h.net.aborted().is_empty(), "revert keeps running after release");
}

#[test]
fn forced_revert_failure_keeps_the_file() {
    let mut h = Harness::new(Options {
        force_revert: true,
        ..server_options()
    });
    h.pond.add_file(text_file("a.txt"));
    h.tick();
    h.answer(h.uploads()[0], "srv-1");
    let id = h.pond.get_file_at(0).expect("added").id;

    let mut removed = h.pond.remove_file(&id, true);
    h.tick();
    assert!(settled(&mut removed).is_none(), "removal waits for the revert");
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::ProcessingComplete));

    let revert = h.net.ids_of(RequestKind::Revert)[0];
    h.refuse(revert, 500);
    h.tick();

    assert!(settled(&mut removed).expect("settled").is_err());
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::ProcessingRevertError));
}

#[test]
fn forced_revert_success_removes_the_file() {
    let mut h = Harness::new(Options {
        force_revert: true,
        ..server_options()
    });
    h.pond.add_file(text_file("a.txt"));
    h.tick();
    h.answer(h.uploads()[0], "srv-1");
    let id = h.pond.get_file_at(0).expect("added").id;

    let mut removed = h.pond.remove_file(&id, true);
    let revert = h.net.ids_of(RequestKind::Revert)[0];
    h.answer(revert, "");
    h.tick();

    assert!(settled(&mut removed).expect("settled").is_ok());
    assert!(h.pond.get_files().is_empty());
    assert_eq!(h.count(EventKind::ProcessFileRevert), 1);
}

#[test]
fn destroy_settles_everything_in_flight() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..server_options()
    });
    h.pond.add_file(text_file("a.txt"));
    let id = h.pond.get_file_at(0).expect("added").id;
    let mut processed = h.pond.process_file(&id);
    h.tick();
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::Processing));

    h.pond.destroy();
    h.tick();

    assert!(settled(&mut processed).expect("settled").is_err());
    assert_eq!(h.count(EventKind::Destroy), 1);
    assert!(h.pond.get_files().is_empty());
    let mut late = h.pond.add_file(text_file("b.txt"));
    assert!(settled(&mut late).expect("settled").is_err());
}

#[test]
fn raising_the_upload_limit_starts_queued_files() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..multi(1)
    });
    for name in ["a.txt", "b.txt", "c.txt"] {
        h.pond.add_file(text_file(name));
    }
    let id = |h: &Harness, name: &str| {
        h.pond
            .get_files()
            .into_iter()
            .find(|file| file.filename() == name)
            .map(|file| file.id)
            .expect("file exists")
    };

    let (a, b) = (id(&h, "a.txt"), id(&h, "b.txt"));
    h.pond.process_file(&a);
    h.pond.process_file(&b);
    h.tick();
    assert_eq!(h.status_of("b.txt"), Some(ItemStatus::ProcessingQueued));

    h.pond.set_option("max_parallel_uploads", serde_json::json!(2)).expect("valid limit");
    h.tick();
    assert_eq!(h.status_of("b.txt"), Some(ItemStatus::Processing));
    assert_eq!(h.uploads().len(), 2);

    let c = id(&h, "c.txt");
    h.pond.process_file(&c);
    h.tick();
    assert_eq!(h.status_of("c.txt"), Some(ItemStatus::ProcessingQueued));
}

#[test]
fn later_requests_wait_behind_the_queue() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..multi(1)
    });
    for name in ["a.txt", "b.txt", "c.txt", "d.txt"] {
        h.pond.add_file(text_file(name));
    }
    let ids: Vec<_> = h.pond.get_files().into_iter().map(|file| (file.filename().to_string(), file.id)).collect();
    let id = |name: &str| ids.iter().find(|(n, _)| n == name).map(|(_, id)| id.clone()).expect("file exists");

    h.pond.process_file(&id("a.txt"));
    h.pond.process_file(&id("b.txt"));
    h.tick();

    h.pond.set_option("max_parallel_uploads", serde_json::json!(2)).expect("valid limit");
    h.pond.process_file(&id("c.txt"));
    h.pond.process_file(&id("d.txt"));
    h.tick();

    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::Processing));
    assert_eq!(h.status_of("b.txt"), Some(ItemStatus::Processing));
    assert_eq!(h.status_of("c.txt"), Some(ItemStatus::ProcessingQueued));
    assert_eq!(h.status_of("d.txt"), Some(ItemStatus::ProcessingQueued));

    h.answer(h.uploads()[0], "srv-a");
    h.tick();
    assert_eq!(h.status_of("c.txt"), Some(ItemStatus::Processing));
    assert_eq!(h.status_of("d.txt"), Some(ItemStatus::ProcessingQueued));
}

#[test]
fn repeated_abort_emits_once_and_settles_both() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..server_options()
    });
    h.pond.add_file(text_file("a.txt"));
    let id = h.pond.get_file_at(0).expect("added").id;
    h.pond.process_file(&id);
    h.tick();

    let mut first = h.pond.abort_processing(&id);
    let mut second = h.pond.abort_processing(&id);
    h.tick();

    assert!(settled(&mut first).expect("settled").is_ok());
    assert!(settled(&mut second).expect("settled").is_ok());
    assert_eq!(h.count(EventKind::ProcessFileAbort), 1);
    assert_eq!(h.net.aborted().len(), 1);
}

#[test]
fn aborting_a_finished_upload_keeps_it() {
    let mut h = Harness::new(server_options());
    h.pond.add_file(text_file("a.txt"));
    h.tick();
    h.answer(h.uploads()[0], "srv-1");
    let id = h.pond.get_file_at(0).expect("added").id;

    let mut aborted = h.pond.abort_processing(&id);
    h.tick();

    let handle = settled(&mut aborted).expect("settled").expect("nothing to abort");
    assert_eq!(handle.status, ItemStatus::ProcessingComplete);
    assert_eq!(handle.server_id.as_deref(), Some("srv-1"));
    assert!(h.net.ids_of(RequestKind::Revert).is_empty());
    assert_eq!(h.count(EventKind::ProcessFileAbort), 0);
}

#[test]
fn blank_server_id_fails_the_upload() {
    let mut h = Harness::new(Options {
        instant_upload: false,
        ..server_options()
    });
    h.pond.add_file(text_file("a.txt"));
    let id = h.pond.get_file_at(0).expect("added").id;
    let mut processed = h.pond.process_file(&id);
    h.tick();

    h.answer(h.uploads()[0], "");

    let failure = settled(&mut processed).expect("settled").expect_err("no server id");
    assert_eq!(failure.error.text(), "Missing server id");
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::ProcessingError));
    assert_eq!(h.pond.get_file(&id).and_then(|file| file.server_id), None);
}

#[test]
fn single_mode_replacement_reverts_the_uploaded_file() {
    let mut h = Harness::new(server_options());
    h.pond.add_file(text_file("a.txt"));
    h.tick();
    h.answer(h.uploads()[0], "srv-1");
    assert_eq!(h.status_of("a.txt"), Some(ItemStatus::ProcessingComplete));

    let mut replacement = h.pond.add_file(text_file("b.txt"));
    h.tick();

    assert!(settled(&mut replacement).expect("settled").is_ok());
    assert_eq!(h.net.ids_of(RequestKind::Revert).len(), 1);
    let names: Vec<String> = h.pond.get_files().into_iter().map(|file| file.file.name).collect();
    assert_eq!(names, vec!["b.txt"]);
}
