use std::{
    collections::{HashMap, VecDeque},
    path::{Path, PathBuf},
    sync::{
        Arc, Mutex, MutexGuard,
        atomic::{AtomicBool, Ordering},
    },
};

use {
    relay_channels::{Action, MessageHandle, RelayOutbound},
    relay_common::{ConversationId, RequestId, UserId},
    relay_download::{DownloadEngine, DownloadOutcome, TransferSignals},
    relay_media::ChunkPipeline,
    tokio_util::task::TaskTracker,
    tracing::{debug, info, warn},
};

use crate::{
    error::{Error, Result},
    progress::{RequestStatus, StatusReporter, render},
    quota::QuotaStore,
    request::DownloadRequest,
};

/// Where a new request landed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueuePosition {
    /// The conversation was idle; the transfer is starting now.
    Started,
    /// Number of requests ahead of this one.
    Waiting(usize),
}

#[derive(Debug, Clone, Copy)]
pub struct Enqueued {
    pub id: RequestId,
    pub position: QueuePosition,
    /// Status message that tracks this request.
    pub status: MessageHandle,
}

/// Read-only view of one conversation's queue.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationView {
    pub active: Option<RequestId>,
    pub paused: Option<RequestId>,
    pub queued: Vec<RequestId>,
}

struct Job {
    request: DownloadRequest,
    status: MessageHandle,
}

struct Active {
    id: RequestId,
    signals: TransferSignals,
    stage: Stage,
}

/// Which actions the active request still honours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    /// Bytes are flowing. Pause and cancel both apply.
    Transfer,
    /// The engine stopped on a pause and the worker has not parked it yet.
    /// Only cancel applies.
    Pausing,
    /// Delivering or reporting the outcome. Nothing applies.
    Settling,
}

#[derive(Default)]
struct Conversation {
    queue: VecDeque<Job>,
    /// A worker task owns this conversation.
    working: bool,
    active: Option<Active>,
    /// Suspended request; blocks the queue until resumed or cancelled.
    paused: Option<Job>,
}

impl Conversation {
    fn is_idle(&self) -> bool {
        !self.working && self.paused.is_none()
    }

    fn is_empty(&self) -> bool {
        self.is_idle() && self.queue.is_empty()
    }
}

enum JobEnd {
    Finished,
    Paused,
}

/// Runs queued downloads, one at a time per conversation.
///
/// Each busy conversation gets one worker task that loops over its queue:
/// download, deliver, report, next. A paused transfer parks the worker until
/// the request is resumed or cancelled. Conversations never wait on each
/// other; the quota store is the only shared state.
#[derive(Clone)]
pub struct QueueScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    engine: DownloadEngine,
    pipeline: ChunkPipeline,
    outbound: Arc<dyn RelayOutbound>,
    quota: Arc<dyn QuotaStore>,
    work_dir: PathBuf,
    conversations: Mutex<HashMap<ConversationId, Conversation>>,
    /// Per-conversation turn for enqueues, so reported positions match the
    /// real order without one chat waiting on another's status message.
    enqueue_locks: Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
    tasks: TaskTracker,
    closed: AtomicBool,
}

impl QueueScheduler {
    pub fn new(
        engine: DownloadEngine,
        pipeline: ChunkPipeline,
        outbound: Arc<dyn RelayOutbound>,
        quota: Arc<dyn QuotaStore>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                engine,
                pipeline,
                outbound,
                quota,
                work_dir: work_dir.into(),
                conversations: Mutex::new(HashMap::new()),
                enqueue_locks: Mutex::new(HashMap::new()),
                tasks: TaskTracker::new(),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Queue `url` for `conversation` and post its status message.
    ///
    /// Refused with [`Error::QuotaExceeded`] (after telling the user once)
    /// when `user` has used up today's downloads, and with
    /// [`Error::ShuttingDown`] once [`shutdown`](Self::shutdown) has begun.
    pub async fn enqueue(
        &self,
        conversation: ConversationId,
        user: UserId,
        url: &str,
    ) -> Result<Enqueued> {
        let inner = &self.inner;
        if inner.closed.load(Ordering::SeqCst) {
            return Err(Error::ShuttingDown);
        }

        if let Err(e) = inner.quota.check(user).await {
            if let Error::QuotaExceeded { limit } = e {
                info!(%conversation, %user, limit, "request refused, quota exceeded");
                inner
                    .outbound
                    .send_text(
                        conversation,
                        &format!("⚠️ Daily limit of {limit} downloads reached. Try again tomorrow."),
                    )
                    .await?;
            }
            return Err(e);
        }

        let request = DownloadRequest::new(conversation, user, url, &inner.work_dir);
        let id = request.id;

        let _turn = inner.enqueue_turn(conversation).await;
        let ahead = inner
            .with_existing(conversation, |c| {
                c.queue.len() + usize::from(c.active.is_some() || c.paused.is_some())
            })
            .unwrap_or(0);
        let (text, _) = render(&request.display_name, id, &RequestStatus::Queued {
            position: ahead,
        });
        let status = inner.outbound.send_text(conversation, &text).await?;

        // Shutdown may have drained the queues while the status was sent.
        let job = Job { request, status };
        let admitted = {
            let mut conversations = inner.conversations();
            if inner.closed.load(Ordering::SeqCst) {
                Err(job)
            } else {
                let c = conversations.entry(conversation).or_default();
                c.queue.push_back(job);
                let start = c.is_idle();
                if start {
                    c.working = true;
                }
                Ok(start)
            }
        };
        let start = match admitted {
            Ok(start) => start,
            Err(job) => {
                info!(%conversation, request = %id, "request refused, shutting down");
                inner.reporter(&job).show(&stopped()).await;
                return Err(Error::ShuttingDown);
            },
        };
        info!(%conversation, %user, request = %id, url, ahead, "request queued");

        let position = if start {
            inner.spawn_worker(conversation, None);
            QueuePosition::Started
        } else {
            QueuePosition::Waiting(ahead.max(1))
        };
        Ok(Enqueued {
            id,
            position,
            status,
        })
    }

    /// Apply a control action. Returns `false` when it no longer applies:
    /// the request is not the active or suspended one of `conversation`, or
    /// its transfer has already ended. A cancel still applies while a pause
    /// is being reported.
    pub async fn apply(&self, conversation: ConversationId, action: Action) -> bool {
        let inner = &self.inner;
        let closed = inner.closed.load(Ordering::SeqCst);

        enum Effect {
            Ignored,
            Signalled,
            Resume(Job, TransferSignals),
            Discard(Job),
        }

        let effect = inner
            .with_existing(conversation, |c| match action {
                Action::Pause(id) => match &c.active {
                    Some(active) if active.id == id && active.stage == Stage::Transfer => {
                        active.signals.pause();
                        Effect::Signalled
                    },
                    _ => Effect::Ignored,
                },
                Action::Resume(id) => match c.paused.take_if(|job| job.request.id == id) {
                    Some(job) if !closed && !c.working => {
                        let signals = TransferSignals::new();
                        c.working = true;
                        c.active = Some(Active {
                            id,
                            signals: signals.clone(),
                            stage: Stage::Transfer,
                        });
                        Effect::Resume(job, signals)
                    },
                    Some(job) => {
                        c.paused = Some(job);
                        Effect::Ignored
                    },
                    None => Effect::Ignored,
                },
                Action::Cancel(id) => {
                    if let Some(active) = c
                        .active
                        .as_ref()
                        .filter(|a| a.id == id && a.stage != Stage::Settling)
                    {
                        active.signals.cancel();
                        return Effect::Signalled;
                    }
                    match c.paused.take_if(|job| job.request.id == id) {
                        Some(job) => Effect::Discard(job),
                        None => Effect::Ignored,
                    }
                },
            })
            .unwrap_or(Effect::Ignored);

        match effect {
            Effect::Ignored => {
                debug!(
                    %conversation,
                    action = action.verb(),
                    request = %action.request_id(),
                    "action ignored"
                );
                false
            },
            Effect::Signalled => {
                info!(
                    %conversation,
                    action = action.verb(),
                    request = %action.request_id(),
                    "action applied"
                );
                true
            },
            Effect::Resume(job, signals) => {
                info!(%conversation, request = %job.request.id, "resuming");
                inner.spawn_worker(conversation, Some((job, signals)));
                true
            },
            Effect::Discard(job) => {
                info!(%conversation, request = %job.request.id, "paused request cancelled");
                remove_partial(&job.request.target).await;
                inner.reporter(&job).show(&RequestStatus::Cancelled).await;
                inner.advance(conversation);
                true
            },
        }
    }

    pub fn view(&self, conversation: ConversationId) -> ConversationView {
        self.inner
            .with_existing(conversation, |c| ConversationView {
                active: c.active.as_ref().map(|a| a.id),
                paused: c.paused.as_ref().map(|j| j.request.id),
                queued: c.queue.iter().map(|j| j.request.id).collect(),
            })
            .unwrap_or_default()
    }

    /// Wait until no worker task is running. Paused requests stay paused.
    pub async fn wait_idle(&self) {
        self.inner.tasks.close();
        self.inner.tasks.wait().await;
        self.inner.tasks.reopen();
    }

    /// Stop accepting requests, cancel running transfers and fail everything
    /// still waiting or paused.
    pub async fn shutdown(&self) {
        let inner = &self.inner;
        inner.closed.store(true, Ordering::SeqCst);

        let stranded: Vec<Job> = {
            let mut conversations = inner.conversations();
            let mut stranded = Vec::new();
            for c in conversations.values_mut() {
                if let Some(active) = &c.active {
                    active.signals.cancel();
                }
                stranded.extend(c.paused.take());
                stranded.extend(c.queue.drain(..));
            }
            stranded
        };
        info!(stranded = stranded.len(), "scheduler shutting down");

        for job in stranded {
            remove_partial(&job.request.target).await;
            inner.reporter(&job).show(&stopped()).await;
        }

        inner.tasks.close();
        inner.tasks.wait().await;
    }
}

impl Inner {
    fn conversations(&self) -> MutexGuard<'_, HashMap<ConversationId, Conversation>> {
        self.conversations
            .lock()
            .unwrap_or_else(|e| e.into_inner())
    }

    fn with_conversation<R>(
        &self,
        conversation: ConversationId,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> R {
        f(self.conversations().entry(conversation).or_default())
    }

    fn with_existing<R>(
        &self,
        conversation: ConversationId,
        f: impl FnOnce(&mut Conversation) -> R,
    ) -> Option<R> {
        self.conversations().get_mut(&conversation).map(f)
    }

    /// Wait for this conversation's enqueue turn.
    async fn enqueue_turn(&self, conversation: ConversationId) -> EnqueueTurn<'_> {
        let lock = Arc::clone(
            self.enqueue_locks
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .entry(conversation)
                .or_default(),
        );
        EnqueueTurn {
            locks: &self.enqueue_locks,
            conversation,
            guard: Some(lock.lock_owned().await),
        }
    }

    fn set_stage(&self, conversation: ConversationId, id: RequestId, stage: Stage) {
        self.with_existing(conversation, |c| {
            if let Some(active) = c.active.as_mut().filter(|a| a.id == id) {
                active.stage = stage;
            }
        });
    }

    fn reporter(&self, job: &Job) -> StatusReporter {
        StatusReporter::new(
            Arc::clone(&self.outbound),
            job.status,
            job.request.id,
            job.request.display_name.clone(),
        )
    }

    fn spawn_worker(
        self: &Arc<Self>,
        conversation: ConversationId,
        first: Option<(Job, TransferSignals)>,
    ) {
        let inner = Arc::clone(self);
        self.tasks
            .spawn(async move { inner.run_worker(conversation, first).await });
    }

    /// Start a worker if the conversation is idle with requests waiting.
    fn advance(self: &Arc<Self>, conversation: ConversationId) {
        let closed = self.closed.load(Ordering::SeqCst);
        let start = self
            .with_existing(conversation, |c| {
                let start = !closed && c.is_idle() && !c.queue.is_empty();
                if start {
                    c.working = true;
                }
                start
            })
            .unwrap_or(false);
        if start {
            self.spawn_worker(conversation, None);
        }
    }

    /// Pop the next request and make it active, or release the conversation.
    fn take_next(&self, conversation: ConversationId) -> Option<(Job, TransferSignals)> {
        let closed = self.closed.load(Ordering::SeqCst);
        let mut conversations = self.conversations();
        let c = conversations.get_mut(&conversation)?;

        let job = if closed {
            None
        } else {
            c.queue.pop_front()
        };
        let Some(job) = job else {
            c.working = false;
            c.active = None;
            if c.is_empty() {
                conversations.remove(&conversation);
            }
            return None;
        };

        let signals = TransferSignals::new();
        c.active = Some(Active {
            id: job.request.id,
            signals: signals.clone(),
            stage: Stage::Transfer,
        });
        Some((job, signals))
    }

    async fn run_worker(
        self: Arc<Self>,
        conversation: ConversationId,
        mut next: Option<(Job, TransferSignals)>,
    ) {
        debug!(%conversation, "worker started");
        loop {
            let (job, signals) = match next.take() {
                Some(pair) => pair,
                None => match self.take_next(conversation) {
                    Some(pair) => pair,
                    None => break,
                },
            };

            let end = self.run_job(&job, &signals).await;
            let parked = match end {
                JobEnd::Finished => {
                    self.with_conversation(conversation, |c| c.active = None);
                    false
                },
                JobEnd::Paused => {
                    // A cancel may land while the pause is being rendered.
                    let cancelled = self.with_conversation(conversation, |c| {
                        c.active = None;
                        if signals.is_cancelled() {
                            return Some(job);
                        }
                        c.paused = Some(job);
                        c.working = false;
                        None
                    });
                    match cancelled {
                        Some(job) => {
                            info!(%conversation, request = %job.request.id, "cancelled while pausing");
                            remove_partial(&job.request.target).await;
                            self.reporter(&job).show(&RequestStatus::Cancelled).await;
                            false
                        },
                        None => true,
                    }
                },
            };
            if parked {
                break;
            }
        }
        debug!(%conversation, "worker stopped");
    }

    async fn run_job(&self, job: &Job, signals: &TransferSignals) -> JobEnd {
        let request = &job.request;
        let reporter = self.reporter(job);
        reporter.show(&RequestStatus::Starting).await;

        let outcome = self
            .engine
            .download(&request.url, &request.target, signals, &reporter)
            .await;
        info!(request = %request.id, outcome = outcome.label(), "transfer ended");
        let stage = match outcome {
            DownloadOutcome::Paused(_) => Stage::Pausing,
            _ => Stage::Settling,
        };
        self.set_stage(request.conversation, request.id, stage);

        match outcome {
            DownloadOutcome::Completed { bytes, remote_name } => {
                let name = remote_name.unwrap_or_else(|| request.display_name.clone());
                let reporter = reporter.renamed(name.as_str());
                match self
                    .pipeline
                    .deliver(request.conversation, &request.target, &name, &reporter)
                    .await
                {
                    Ok(delivery) => {
                        if let Err(e) = self.quota.increment(request.user).await {
                            warn!(user = %request.user, error = %e, "quota update failed");
                        }
                        reporter
                            .show(&RequestStatus::Completed {
                                bytes,
                                parts: delivery.parts,
                            })
                            .await;
                    },
                    Err(e) => {
                        reporter
                            .show(&RequestStatus::Failed {
                                reason: e.to_string(),
                            })
                            .await;
                    },
                }
                JobEnd::Finished
            },
            DownloadOutcome::Paused(snapshot) => {
                reporter.show(&RequestStatus::Paused(snapshot)).await;
                JobEnd::Paused
            },
            DownloadOutcome::Cancelled => {
                remove_partial(&request.target).await;
                reporter.show(&RequestStatus::Cancelled).await;
                JobEnd::Finished
            },
            DownloadOutcome::Failed(e) => {
                remove_partial(&request.target).await;
                reporter
                    .show(&RequestStatus::Failed {
                        reason: e.to_string(),
                    })
                    .await;
                JobEnd::Finished
            },
        }
    }
}

/// Holds one conversation's enqueue lock. Dropping it releases the lock and
/// forgets the entry once nobody else is waiting on it.
struct EnqueueTurn<'a> {
    locks: &'a Mutex<HashMap<ConversationId, Arc<tokio::sync::Mutex<()>>>>,
    conversation: ConversationId,
    guard: Option<tokio::sync::OwnedMutexGuard<()>>,
}

impl Drop for EnqueueTurn<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks
            .get(&self.conversation)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            locks.remove(&self.conversation);
        }
    }
}

fn stopped() -> RequestStatus {
    RequestStatus::Failed {
        reason: "relay stopped".into(),
    }
}

async fn remove_partial(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => debug!(path = %path.display(), "partial file removed"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {},
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove partial file"),
    }
}
