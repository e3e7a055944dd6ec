//! Deferred materialization of large buffers.
//!
//! A [`LazyBuffer`] is either unset, pending on a [`Fetch`] source, or holds
//! its published value. Publication happens at most once; afterwards the
//! buffer only hands out shared references, so a published array can never be
//! mutated in place.

use crate::error::{GmhError, Result};
use parking_lot::Mutex;
use std::fmt;
use std::sync::OnceLock;

/// Something that can produce a buffer on demand.
pub trait Fetch<A>: Send + Sync {
    fn fetch(&self) -> Result<A>;
}

/// Buffer with `Unset | Unmaterialized(source) | Materialized(value)` states
pub struct LazyBuffer<A> {
    value: OnceLock<A>,
    source: Mutex<Option<Box<dyn Fetch<A>>>>,
}

impl<A> LazyBuffer<A> {
    /// A buffer with nothing published and nothing to fetch from.
    pub fn unset() -> Self {
        Self {
            value: OnceLock::new(),
            source: Mutex::new(None),
        }
    }

    /// A buffer that is materialized from the start.
    pub fn ready(value: A) -> Self {
        let buffer = Self::unset();
        let _ = buffer.value.set(value);
        buffer
    }

    /// A buffer that fetches its value on first access.
    pub fn deferred(source: Box<dyn Fetch<A>>) -> Self {
        Self {
            value: OnceLock::new(),
            source: Mutex::new(Some(source)),
        }
    }

    pub fn is_materialized(&self) -> bool {
        self.value.get().is_some()
    }

    /// Whether a value is published or can be fetched.
    pub fn is_set(&self) -> bool {
        self.is_materialized() || self.source.lock().is_some()
    }

    /// The published value, without triggering a fetch.
    pub fn peek(&self) -> Option<&A> {
        self.value.get()
    }

    /// Publish `value`. Fails if the buffer already holds or awaits one.
    pub fn publish(&self, value: A) -> Result<()> {
        let source = self.source.lock();
        if source.is_some() {
            return Err(GmhError::Validation(
                "buffer is already bound to a data source".to_string(),
            ));
        }
        self.value
            .set(value)
            .map_err(|_| GmhError::Validation("buffer is immutable once set".to_string()))
    }

    /// The published value, fetching and publishing it on first access.
    ///
    /// `check` runs on a freshly fetched value before publication; if it fails
    /// the value is discarded and the source stays in place.
    pub fn get_or_fetch<F>(&self, check: F) -> Result<Option<&A>>
    where
        F: FnOnce(&A) -> Result<()>,
    {
        if let Some(value) = self.value.get() {
            return Ok(Some(value));
        }

        let mut source = self.source.lock();
        // another caller may have published while we waited on the lock
        if let Some(value) = self.value.get() {
            return Ok(Some(value));
        }
        let Some(fetcher) = source.as_ref() else {
            return Ok(None);
        };

        let value = fetcher.fetch()?;
        check(&value)?;

        let _ = self.value.set(value);
        // releases the source, and with it any loader handle it kept alive
        *source = None;

        Ok(self.value.get())
    }
}

impl<A> Default for LazyBuffer<A> {
    fn default() -> Self {
        Self::unset()
    }
}

impl<A> fmt::Debug for LazyBuffer<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = if self.is_materialized() {
            "Materialized"
        } else if self.source.lock().is_some() {
            "Unmaterialized"
        } else {
            "Unset"
        };
        f.debug_struct("LazyBuffer").field("state", &state).finish()
    }
}
