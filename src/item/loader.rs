//! Source-to-file loading.
//!
//! The loader turns a [`Source`] into a concrete [`File`]:
//!
//! - native files load immediately,
//! - base64 data URIs are decoded in place,
//! - anything else is a URL handed to the request the caller picked (fetch,
//!   restore, load or a direct GET).
//!
//! Events follow `Init → Meta? → Progress* → (Load | Error | Abort)`. There
//! is no retry here; retrying means calling [`Loader::load`] again.

use crate::domain::file::{file_name_from_url, guess_mime_type};
use crate::domain::{File, Source};
use crate::infrastructure::{Channel, Runtime};
use crate::transport::{file_info_from_headers, FileInfo, Request, RequestId, Response, TransportEvent};

use super::ItemId;

/// Loader lifecycle event.
#[derive(Debug, Clone, PartialEq)]
pub enum LoaderEvent {
    Init,
    Meta(FileInfo),
    Progress(Option<f64>),
    /// The file is available; `info` merges everything headers announced.
    Load { file: File, info: FileInfo },
    Error(Response),
    Abort,
}

/// Resolves one source at a time for an item.
#[derive(Debug, Default)]
pub struct Loader {
    request: Option<RequestId>,
    info: FileInfo,
    name_hint: String,
}

impl Loader {
    /// Starts loading `source`.
    ///
    /// `request` is the fetch strategy for URL sources; `None` means the URL
    /// cannot be loaded. Any previous request is abandoned first.
    pub fn load(
        &mut self,
        item: &ItemId,
        source: &Source,
        request: Option<Request>,
        rt: &mut Runtime,
    ) -> Vec<LoaderEvent> {
        if let Some(previous) = self.request.take() {
            rt.abort(previous);
        }
        self.info = FileInfo::default();

        let mut events = vec![LoaderEvent::Init];
        match source {
            Source::File(file) => events.push(LoaderEvent::Load {
                file: file.clone(),
                info: FileInfo::default(),
            }),
            Source::DataUri(uri) => match File::from_data_uri(uri) {
                Ok(file) => events.push(LoaderEvent::Load {
                    file,
                    info: FileInfo::default(),
                }),
                Err(reason) => {
                    tracing::debug!(%item, %reason, "data uri rejected");
                    events.push(LoaderEvent::Error(Response::error(400, reason)));
                }
            },
            Source::Remote(reference) => match request {
                Some(request) => {
                    self.name_hint = file_name_from_url(reference);
                    self.request = Some(rt.send(item, Channel::Loader, request));
                }
                None => events.push(LoaderEvent::Error(Response::error(400, "Can't load URL"))),
            },
        }
        events
    }

    /// Returns whether a request is in flight.
    #[must_use]
    pub const fn is_loading(&self) -> bool {
        self.request.is_some()
    }

    /// Handles a transport callback for the in-flight request.
    pub fn on_transport(&mut self, id: RequestId, event: TransportEvent, rt: &mut Runtime) -> Vec<LoaderEvent> {
        if self.request != Some(id) {
            return Vec::new();
        }

        match event {
            TransportEvent::Headers(headers) => {
                let info = file_info_from_headers(&headers);
                if info == FileInfo::default() {
                    return Vec::new();
                }
                self.info = info.clone();
                vec![LoaderEvent::Meta(info)]
            }
            TransportEvent::Progress {
                computable,
                loaded,
                total,
            } => {
                let progress = (computable && total > 0).then(|| (loaded as f64 / total as f64).min(1.0));
                vec![LoaderEvent::Progress(progress)]
            }
            TransportEvent::Load(response) => {
                self.finish(id, rt);
                vec![self.file_from_response(&response)]
            }
            TransportEvent::Error(response) => {
                self.finish(id, rt);
                vec![LoaderEvent::Error(response)]
            }
            TransportEvent::Timeout => {
                self.finish(id, rt);
                vec![LoaderEvent::Error(Response::error(0, "Request timed out"))]
            }
            TransportEvent::Abort => {
                self.finish(id, rt);
                vec![LoaderEvent::Abort]
            }
        }
    }

    /// Aborts the in-flight request. Repeated calls emit nothing.
    pub fn abort(&mut self, rt: &mut Runtime) -> Vec<LoaderEvent> {
        match self.request.take() {
            Some(id) => {
                rt.abort(id);
                vec![LoaderEvent::Abort]
            }
            None => Vec::new(),
        }
    }

    fn finish(&mut self, id: RequestId, rt: &mut Runtime) {
        self.request = None;
        rt.finish(id);
    }

    fn file_from_response(&self, response: &Response) -> LoaderEvent {
        let late = file_info_from_headers(&response.headers);
        let info = FileInfo {
            name: self.info.name.clone().or(late.name),
            size: self.info.size.or(late.size),
            source: self.info.source.clone().or(late.source),
        };

        let name = info.name.clone().unwrap_or_else(|| self.name_hint.clone());
        let mime_type = response
            .headers
            .get("Content-Type")
            .and_then(|value| value.split(';').next())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map_or_else(|| guess_mime_type(&name), str::to_string);

        LoaderEvent::Load {
            file: File::new(name, response.body.clone()).with_mime_type(mime_type),
            info,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{Headers, MemoryTransport, RequestKind};

    fn runtime() -> (MemoryTransport, Runtime) {
        let journal = MemoryTransport::new();
        let rt = Runtime::new(Box::new(journal.clone()), Some(1));
        (journal, rt)
    }

    #[test]
    fn native_file_loads_immediately() {
        let (journal, mut rt) = runtime();
        let file = File::new("a.txt", b"abc".to_vec());
        let events = Loader::default().load(&ItemId::from("i"), &Source::File(file.clone()), None, &mut rt);

        assert_eq!(
            events,
            vec![
                LoaderEvent::Init,
                LoaderEvent::Load {
                    file,
                    info: FileInfo::default()
                }
            ]
        );
        assert!(journal.sent().is_empty());
    }

    #[test]
    fn url_without_strategy_is_a_client_error() {
        let (_, mut rt) = runtime();
        let events = Loader::default().load(&ItemId::from("i"), &Source::parse("https://x.test/a.png"), None, &mut rt);
        let LoaderEvent::Error(response) = &events[1] else {
            panic!("expected error, got {events:?}");
        };
        assert_eq!(response.code, 400);
        assert_eq!(response.text(), "Can't load URL");
    }

    #[test]
    fn remote_load_uses_headers_for_name_and_type() {
        let (journal, mut rt) = runtime();
        let mut loader = Loader::default();
        let item = ItemId::from("i");
        loader.load(&item, &Source::parse("https://x.test/files/42"), Some(Request::fetch("https://x.test/files/42")), &mut rt);
        let (id, request) = journal.take_sent().remove(0);
        assert_eq!(request.kind, RequestKind::Fetch);

        let meta = loader.on_transport(
            id,
            TransportEvent::Headers(Headers::parse("Content-Disposition: inline; filename=\"cat.gif\"\nX-Content-Transfer-Id: tmp-1")),
            &mut rt,
        );
        assert!(matches!(&meta[..], [LoaderEvent::Meta(info)] if info.source.as_deref() == Some("tmp-1")));

        let progress = loader.on_transport(id, TransportEvent::Progress { computable: true, loaded: 5, total: 10 }, &mut rt);
        assert_eq!(progress, vec![LoaderEvent::Progress(Some(0.5))]);

        let mut headers = Headers::new();
        headers.insert("Content-Type", "image/gif; charset=binary");
        let done = loader.on_transport(id, TransportEvent::Load(Response::load(200, "GIF89a").with_headers(headers)), &mut rt);
        let [LoaderEvent::Load { file, info }] = &done[..] else {
            panic!("expected load, got {done:?}");
        };
        assert_eq!(file.name, "cat.gif");
        assert_eq!(file.mime_type, "image/gif");
        assert_eq!(file.size, Some(6));
        assert_eq!(info.source.as_deref(), Some("tmp-1"));
        assert!(!loader.is_loading());
        assert!(rt.route(id).is_none());
    }

    #[test]
    fn abort_is_idempotent() {
        let (journal, mut rt) = runtime();
        let mut loader = Loader::default();
        loader.load(&ItemId::from("i"), &Source::parse("https://x.test/a"), Some(Request::fetch("https://x.test/a")), &mut rt);

        assert_eq!(loader.abort(&mut rt), vec![LoaderEvent::Abort]);
        assert!(loader.abort(&mut rt).is_empty());
        assert_eq!(journal.aborted().len(), 1);

        let (id, _) = journal.sent().remove(0);
        assert!(loader.on_transport(id, TransportEvent::Load(Response::load(200, "")), &mut rt).is_empty());
    }
}
