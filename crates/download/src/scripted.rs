//! In-memory [`Fetcher`] for tests.
//!
//! Serves one fixed body for every URL, honours open-ended ranges the way a
//! well-behaved server does, and records each request. Builder knobs cover the
//! misbehaving cases: ignored ranges, missing length, forced status codes,
//! slow chunks and a one-shot mid-stream failure.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::{StreamExt, stream},
};

use crate::{
    error::{Error, Result},
    fetch::{FetchResponse, Fetcher},
};

type ChunkHook = Arc<dyn Fn(u64) + Send + Sync>;

pub struct ScriptedFetcher {
    body: Bytes,
    chunk_size: usize,
    status: Option<u16>,
    send_length: bool,
    honor_range: bool,
    content_disposition: Option<String>,
    chunk_delay: Option<Duration>,
    fail_at: Mutex<Option<u64>>,
    on_chunk: Option<ChunkHook>,
    requests: Mutex<Vec<(String, Option<u64>)>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl ScriptedFetcher {
    pub fn new(body: impl Into<Bytes>) -> Self {
        Self {
            body: body.into(),
            chunk_size: 4096,
            status: None,
            send_length: true,
            honor_range: true,
            content_disposition: None,
            chunk_delay: None,
            fail_at: Mutex::new(None),
            on_chunk: None,
            requests: Mutex::new(Vec::new()),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    #[must_use]
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size.max(1);
        self
    }

    /// Answer every request with this status and an empty body.
    #[must_use]
    pub fn status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    #[must_use]
    pub fn without_content_length(mut self) -> Self {
        self.send_length = false;
        self
    }

    /// Answer range requests with a full `200` body.
    #[must_use]
    pub fn ignore_range(mut self) -> Self {
        self.honor_range = false;
        self
    }

    #[must_use]
    pub fn content_disposition(mut self, value: &str) -> Self {
        self.content_disposition = Some(value.to_string());
        self
    }

    #[must_use]
    pub fn chunk_delay(mut self, delay: Duration) -> Self {
        self.chunk_delay = Some(delay);
        self
    }

    /// The first response that reaches `offset` ends with a stream error there.
    #[must_use]
    pub fn fail_once_at(mut self, offset: u64) -> Self {
        self.fail_at = Mutex::new(Some(offset));
        self
    }

    /// Called with the absolute offset of each chunk just before it is yielded.
    #[must_use]
    pub fn on_chunk(mut self, hook: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.on_chunk = Some(Arc::new(hook));
        self
    }

    /// `(url, range_start)` for every request, in order.
    pub fn requests(&self) -> Vec<(String, Option<u64>)> {
        self.requests
            .lock()
            .map(|r| r.clone())
            .unwrap_or_default()
    }

    /// Highest number of bodies that were being streamed at the same time.
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

/// Decrements the in-flight count when the body stream is dropped.
struct InFlight(Arc<AtomicUsize>);

impl Drop for InFlight {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

struct BodyState {
    body: Bytes,
    pos: usize,
    chunk_size: usize,
    delay: Option<Duration>,
    fail_at: Option<u64>,
    on_chunk: Option<ChunkHook>,
    _guard: InFlight,
}

#[async_trait]
impl Fetcher for ScriptedFetcher {
    async fn get(&self, url: &str, range_start: Option<u64>) -> Result<FetchResponse> {
        if let Ok(mut requests) = self.requests.lock() {
            requests.push((url.to_string(), range_start));
        }

        let len = self.body.len() as u64;
        let (status, start) = match (self.status, range_start) {
            (Some(status), _) => (status, len),
            (None, Some(start)) if self.honor_range && start >= len => (416, len),
            (None, Some(start)) if self.honor_range => (206, start),
            (None, _) => (200, 0),
        };

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(Arc::clone(&self.in_flight));

        let fail_at = self.fail_at.lock().ok().and_then(|mut f| f.take());
        let state = BodyState {
            body: self.body.clone(),
            pos: start as usize,
            chunk_size: self.chunk_size,
            delay: self.chunk_delay,
            fail_at,
            on_chunk: self.on_chunk.clone(),
            _guard: guard,
        };

        let body = stream::unfold(state, |mut st| async move {
            if st.pos >= st.body.len() {
                return None;
            }
            if let Some(delay) = st.delay {
                tokio::time::sleep(delay).await;
            }
            if st.fail_at.is_some_and(|at| st.pos as u64 >= at) {
                st.pos = st.body.len();
                return Some((Err(Error::message("connection reset by peer")), st));
            }
            if let Some(hook) = &st.on_chunk {
                hook(st.pos as u64);
            }
            let end = (st.pos + st.chunk_size).min(st.body.len());
            let chunk = st.body.slice(st.pos..end);
            st.pos = end;
            Some((Ok(chunk), st))
        })
        .boxed();

        Ok(FetchResponse {
            status,
            content_length: self.send_length.then_some(len - start),
            content_disposition: self.content_disposition.clone(),
            body,
        })
    }
}
