//! Per-user daily download limits.

use std::{
    collections::HashMap,
    fs::{File, OpenOptions},
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    sync::Arc,
};

use {
    async_trait::async_trait,
    chrono::{NaiveDate, Utc},
    fd_lock::RwLock,
    relay_common::UserId,
    serde::{Deserialize, Serialize},
    tokio::sync::Mutex,
    tracing::debug,
};

use crate::error::{Context, Error, Result};

/// Shared by every conversation; implementations serialize their own updates.
#[async_trait]
pub trait QuotaStore: Send + Sync {
    /// `Err(Error::QuotaExceeded)` when `user` may not start another download.
    async fn check(&self, user: UserId) -> Result<()>;

    /// Count one delivered download for `user`. Returns today's new total.
    async fn increment(&self, user: UserId) -> Result<u32>;
}

/// No limits.
pub struct Unlimited;

#[async_trait]
impl QuotaStore for Unlimited {
    async fn check(&self, _user: UserId) -> Result<()> {
        Ok(())
    }

    async fn increment(&self, _user: UserId) -> Result<u32> {
        Ok(0)
    }
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct QuotaFile {
    day: Option<NaiveDate>,
    #[serde(default)]
    counts: HashMap<u64, u32>,
}

impl QuotaFile {
    /// Drop yesterday's counts.
    fn roll_over(&mut self, today: NaiveDate) {
        if self.day != Some(today) {
            self.day = Some(today);
            self.counts.clear();
        }
    }
}

type Clock = Arc<dyn Fn() -> NaiveDate + Send + Sync>;

/// Daily counters in a JSON file, reset at UTC midnight.
///
/// The in-process mutex orders load-modify-save cycles; an advisory file lock
/// keeps other processes sharing the file out of a half-written state.
pub struct JsonQuotaStore {
    path: PathBuf,
    daily_limit: u32,
    lock: Mutex<()>,
    today: Clock,
}

impl JsonQuotaStore {
    pub fn new(path: impl Into<PathBuf>, daily_limit: u32) -> Self {
        Self {
            path: path.into(),
            daily_limit,
            lock: Mutex::new(()),
            today: Arc::new(|| Utc::now().date_naive()),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, today: impl Fn() -> NaiveDate + Send + Sync + 'static) -> Self {
        self.today = Arc::new(today);
        self
    }

    async fn load(&self) -> Result<QuotaFile> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || read_locked(&path))
            .await
            .context("quota load task failed")?
    }

    async fn save(&self, file: QuotaFile) -> Result<()> {
        let path = self.path.clone();
        let data = serde_json::to_vec_pretty(&file)?;
        tokio::task::spawn_blocking(move || write_locked(&path, &data))
            .await
            .context("quota save task failed")?
    }
}

#[async_trait]
impl QuotaStore for JsonQuotaStore {
    async fn check(&self, user: UserId) -> Result<()> {
        if self.daily_limit == 0 {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        file.roll_over((self.today)());
        let used = file.counts.get(&user.0).copied().unwrap_or(0);
        if used >= self.daily_limit {
            debug!(%user, used, limit = self.daily_limit, "quota exceeded");
            return Err(Error::QuotaExceeded {
                limit: self.daily_limit,
            });
        }
        Ok(())
    }

    async fn increment(&self, user: UserId) -> Result<u32> {
        let _guard = self.lock.lock().await;
        let mut file = self.load().await?;
        file.roll_over((self.today)());
        let count = file.counts.entry(user.0).or_insert(0);
        *count += 1;
        let count = *count;
        self.save(file).await?;
        debug!(%user, count, "quota incremented");
        Ok(count)
    }
}

fn read_locked(path: &Path) -> Result<QuotaFile> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(QuotaFile::default()),
        Err(e) => return Err(Error::store(path, e)),
    };
    let mut lock = RwLock::new(file);
    let mut guard = lock.write().map_err(|e| Error::store(path, e))?;
    let mut raw = String::new();
    guard
        .read_to_string(&mut raw)
        .map_err(|e| Error::store(path, e))?;
    if raw.trim().is_empty() {
        return Ok(QuotaFile::default());
    }
    Ok(serde_json::from_str(&raw)?)
}

fn write_locked(path: &Path, data: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| Error::store(parent, e))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .read(true)
        .write(true)
        .open(path)
        .map_err(|e| Error::store(path, e))?;
    let mut lock = RwLock::new(file);
    let mut guard = lock.write().map_err(|e| Error::store(path, e))?;
    guard.set_len(0).map_err(|e| Error::store(path, e))?;
    guard
        .seek(SeekFrom::Start(0))
        .map_err(|e| Error::store(path, e))?;
    guard.write_all(data).map_err(|e| Error::store(path, e))?;
    guard.sync_all().map_err(|e| Error::store(path, e))?;
    Ok(())
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        std::sync::atomic::{AtomicU32, Ordering},
    };

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 10, d).unwrap()
    }

    #[tokio::test]
    async fn limit_is_enforced_per_user() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQuotaStore::new(dir.path().join("quota.json"), 2).with_clock(|| day(16));
        let alice = UserId(1);
        let bob = UserId(2);

        store.check(alice).await.unwrap();
        assert_eq!(store.increment(alice).await.unwrap(), 1);
        assert_eq!(store.increment(alice).await.unwrap(), 2);
        assert!(matches!(
            store.check(alice).await,
            Err(Error::QuotaExceeded { limit: 2 })
        ));
        store.check(bob).await.unwrap();
    }

    #[tokio::test]
    async fn counts_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/quota.json");
        {
            let store = JsonQuotaStore::new(&path, 1).with_clock(|| day(16));
            store.increment(UserId(5)).await.unwrap();
        }
        let store = JsonQuotaStore::new(&path, 1).with_clock(|| day(16));
        assert!(store.check(UserId(5)).await.is_err());
    }

    #[tokio::test]
    async fn counts_reset_on_a_new_day() {
        let dir = tempfile::tempdir().unwrap();
        let today = Arc::new(AtomicU32::new(16));
        let clock = Arc::clone(&today);
        let store = JsonQuotaStore::new(dir.path().join("quota.json"), 1)
            .with_clock(move || day(clock.load(Ordering::SeqCst)));

        store.increment(UserId(9)).await.unwrap();
        assert!(store.check(UserId(9)).await.is_err());

        today.store(17, Ordering::SeqCst);
        store.check(UserId(9)).await.unwrap();
        assert_eq!(store.increment(UserId(9)).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn zero_limit_means_unlimited() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonQuotaStore::new(dir.path().join("quota.json"), 0);
        for _ in 0..3 {
            store.increment(UserId(1)).await.unwrap();
        }
        store.check(UserId(1)).await.unwrap();
    }

    #[tokio::test]
    async fn concurrent_increments_are_not_lost() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(JsonQuotaStore::new(dir.path().join("quota.json"), 100));
        let tasks: Vec<_> = (0..10)
            .map(|_| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.increment(UserId(3)).await.unwrap() })
            })
            .collect();
        for task in tasks {
            task.await.unwrap();
        }
        assert_eq!(store.increment(UserId(3)).await.unwrap(), 11);
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("quota.json");
        std::fs::write(&path, "{not json").unwrap();
        let store = JsonQuotaStore::new(&path, 1);
        assert!(matches!(store.check(UserId(1)).await, Err(Error::Json(_))));
    }

    #[tokio::test]
    async fn unlimited_never_refuses() {
        for _ in 0..5 {
            Unlimited.increment(UserId(1)).await.unwrap();
        }
        Unlimited.check(UserId(1)).await.unwrap();
    }
}
