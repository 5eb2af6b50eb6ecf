//! Key-addressed filter pipeline for plugins.
//!
//! Plugins register interceptors for a fixed set of extension points
//! ([`FilterKey`]). The store invokes them in one of two modes:
//!
//! - [`Filters::apply_filters`]: synchronous fan-out; every matching filter
//!   sees the same input and the ready results are returned (used for vetoes).
//! - [`Filters::apply_filter_chain`]: sequential asynchronous reduction; each
//!   filter receives the previous filter's output, the first failure rejects
//!   the chain, and no matching filters means identity.
//!
//! Registration order is execution order. Registries are owned by one pond,
//! so independent ponds never see each other's filters.
//!
//! # Example
//!
//! ```
//! use filedrop::filter::{FilterContext, FilterKey, FilterValue, Filters};
//! use filedrop::Options;
//! use futures::executor::block_on;
//!
//! let mut filters = Filters::new();
//! filters.add_sync_filter(FilterKey::ShouldPrepareOutput, |_, _| Ok(FilterValue::Bool(true)));
//!
//! let ctx = FilterContext::new(None, Options::default());
//! let out = block_on(filters.apply_filter_chain(FilterKey::ShouldPrepareOutput, FilterValue::Bool(false), ctx));
//! assert_eq!(out.ok().and_then(|v| v.as_bool()), Some(true));
//! ```

use std::fmt;
use std::future::Future;
use std::rc::Rc;

use futures::future::{FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};

use crate::app::Options;
use crate::domain::{File, Source, StatusLabel};
use crate::item::FileHandle;

/// Extension points a filter can attach to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FilterKey {
    /// Veto a candidate before it becomes an item (`Source` → `Bool`).
    AllowHopperItem,
    /// Notification that an item was created (`Item`).
    DidCreateItem,
    /// Transform a freshly loaded file (`File` → `File`).
    LoadFile,
    /// Inspect a loaded item; failure rejects the add (`Item`).
    DidLoadItem,
    /// Veto adding a loaded item (`Item` → `Bool`).
    BeforeAddFile,
    /// Veto removing an item (`Item` → `Bool`).
    BeforeRemoveFile,
    /// Decide whether output should be prepared (`Bool` → `Bool`).
    ShouldPrepareOutput,
    /// Transform the file that gets uploaded (`File` → `File`).
    PrepareOutput,
    /// Final pass over prepared output (`File` → `File`).
    CompletePrepareOutput,
}

/// Value flowing through a filter.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterValue {
    Bool(bool),
    File(File),
    Source(Source),
    Item(FileHandle),
}

impl FilterValue {
    #[must_use]
    pub const fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            Self::File(_) | Self::Source(_) | Self::Item(_) => None,
        }
    }

    #[must_use]
    pub fn into_file(self) -> Option<File> {
        match self {
            Self::File(file) => Some(file),
            Self::Bool(_) | Self::Source(_) | Self::Item(_) => None,
        }
    }
}

/// Read-only context passed to every filter.
#[derive(Debug, Clone)]
pub struct FilterContext {
    /// The item being filtered, when there is one.
    pub item: Option<FileHandle>,
    /// Options in effect when the filter ran.
    pub options: Options,
}

impl FilterContext {
    #[must_use]
    pub const fn new(item: Option<FileHandle>, options: Options) -> Self {
        Self { item, options }
    }
}

/// Rejection raised by a filter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct FilterError {
    pub message: String,
    /// Status pair to show next to the file, if the filter provides one.
    pub status: Option<StatusLabel>,
}

impl FilterError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
        }
    }

    #[must_use]
    pub fn with_status(mut self, status: StatusLabel) -> Self {
        self.status = Some(status);
        self
    }
}

/// Result of one filter or a whole chain.
pub type FilterResult = Result<FilterValue, FilterError>;

/// A registered filter.
pub type FilterFn = Rc<dyn Fn(FilterValue, FilterContext) -> LocalBoxFuture<'static, FilterResult>>;

/// Instance-scoped filter registry.
#[derive(Clone, Default)]
pub struct Filters {
    entries: Vec<(FilterKey, FilterFn)>,
}

impl fmt::Debug for Filters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.entries.iter().map(|(key, _)| key))
            .finish()
    }
}

impl Filters {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an asynchronous filter.
    pub fn add_filter<F, Fut>(&mut self, key: FilterKey, filter: F)
    where
        F: Fn(FilterValue, FilterContext) -> Fut + 'static,
        Fut: Future<Output = FilterResult> + 'static,
    {
        tracing::debug!(?key, "registering filter");
        let wrapped: FilterFn = Rc::new(move |value, ctx| filter(value, ctx).boxed_local());
        self.entries.push((key, wrapped));
    }

    /// Registers a filter that answers immediately.
    pub fn add_sync_filter<F>(&mut self, key: FilterKey, filter: F)
    where
        F: Fn(FilterValue, &FilterContext) -> FilterResult + 'static,
    {
        self.add_filter(key, move |value, ctx| {
            futures::future::ready(filter(value, &ctx))
        });
    }

    /// Returns whether any filter is registered for `key`.
    #[must_use]
    pub fn has(&self, key: FilterKey) -> bool {
        self.entries.iter().any(|(k, _)| *k == key)
    }

    fn matching(&self, key: FilterKey) -> impl Iterator<Item = &FilterFn> {
        self.entries
            .iter()
            .filter(move |(k, _)| *k == key)
            .map(|(_, filter)| filter)
    }

    /// Runs every matching filter on the same input and collects the results
    /// that are available immediately.
    ///
    /// Filters that fail or are still pending contribute nothing.
    #[must_use]
    pub fn apply_filters(&self, key: FilterKey, value: &FilterValue, ctx: &FilterContext) -> Vec<FilterValue> {
        self.matching(key)
            .filter_map(|filter| match filter(value.clone(), ctx.clone()).now_or_never() {
                Some(Ok(result)) => Some(result),
                Some(Err(error)) => {
                    tracing::debug!(?key, %error, "filter rejected during fan-out");
                    None
                }
                None => {
                    tracing::warn!(?key, "asynchronous filter ignored during fan-out");
                    None
                }
            })
            .collect()
    }

    /// Feeds `value` through every matching filter in registration order.
    ///
    /// The returned future owns everything it needs, so it can outlive the
    /// registry borrow and be spawned on an executor.
    #[must_use]
    pub fn apply_filter_chain(
        &self,
        key: FilterKey,
        value: FilterValue,
        ctx: FilterContext,
    ) -> LocalBoxFuture<'static, FilterResult> {
        let chain: Vec<FilterFn> = self.matching(key).cloned().collect();
        async move {
            let mut value = value;
            for filter in chain {
                value = filter(value, ctx.clone()).await?;
            }
            Ok(value)
        }
        .boxed_local()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::executor::block_on;

    fn ctx() -> FilterContext {
        FilterContext::new(None, Options::default())
    }

    fn renamed(file: FilterValue, suffix: &str) -> FilterResult {
        let mut file = file.into_file().ok_or_else(|| FilterError::new("expected a file"))?;
        file.name.push_str(suffix);
        Ok(FilterValue::File(file))
    }

    #[test]
    fn empty_chain_is_identity() {
        let filters = Filters::new();
        let out = block_on(filters.apply_filter_chain(FilterKey::LoadFile, FilterValue::Bool(true), ctx()));
        assert_eq!(out, Ok(FilterValue::Bool(true)));
    }

    #[test]
    fn chain_runs_in_registration_order() {
        let mut filters = Filters::new();
        filters.add_sync_filter(FilterKey::PrepareOutput, |v, _| renamed(v, "-a"));
        filters.add_filter(FilterKey::PrepareOutput, |v, _| async move { renamed(v, "-b") });
        filters.add_sync_filter(FilterKey::LoadFile, |v, _| renamed(v, "-ignored"));

        let file = FilterValue::File(File::new("x", Vec::new()));
        let out = block_on(filters.apply_filter_chain(FilterKey::PrepareOutput, file, ctx()));

        assert_eq!(out.ok().and_then(FilterValue::into_file).map(|f| f.name).as_deref(), Some("x-a-b"));
    }

    #[test]
    fn first_failure_rejects_chain() {
        let mut filters = Filters::new();
        filters.add_sync_filter(FilterKey::DidLoadItem, |_, _| Err(FilterError::new("too large")));
        filters.add_sync_filter(FilterKey::DidLoadItem, |_, _| panic!("must not run"));

        let out = block_on(filters.apply_filter_chain(FilterKey::DidLoadItem, FilterValue::Bool(true), ctx()));
        assert_eq!(out, Err(FilterError::new("too large")));
    }

    #[test]
    fn fan_out_collects_ready_results() {
        let mut filters = Filters::new();
        filters.add_sync_filter(FilterKey::AllowHopperItem, |_, _| Ok(FilterValue::Bool(true)));
        filters.add_sync_filter(FilterKey::AllowHopperItem, |_, _| Ok(FilterValue::Bool(false)));
        filters.add_filter(FilterKey::AllowHopperItem, |_, _| futures::future::pending());

        let source = FilterValue::Source(Source::parse("https://example.com/a.png"));
        let results = filters.apply_filters(FilterKey::AllowHopperItem, &source, &ctx());

        assert_eq!(results, vec![FilterValue::Bool(true), FilterValue::Bool(false)]);
    }
}
