use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use tokio::{
    fs::OpenOptions,
    io::AsyncWriteExt,
    sync::{Mutex, MutexGuard},
};

use crate::bet::{Bet, BetParseErr};

#[derive(thiserror::Error, Debug)]
pub enum StorageErr {
    #[error("{0}")]
    Io(#[from] tokio::io::Error),

    #[error("corrupted record on line {line}: {reason}")]
    Corrupted { line: usize, reason: BetParseErr },
}

/// Persists bets and answers which of them won the draw
#[async_trait]
pub trait BetStore: Send + Sync {
    /// Stores all the bets, they must be persisted once this returns successfully
    async fn store(&mut self, bets: Vec<Bet>) -> Result<(), StorageErr>;

    /// Returns an identifier for every winning bet placed through the agency
    async fn winners_for_agency(&self, agency: u32) -> Result<Vec<String>, StorageErr>;
}

/// The one lock every connection goes through to reach the store
///
/// the lock is held only for the duration of a single call.
#[derive(Debug)]
pub struct SharedStore<S> {
    inner: Arc<Mutex<S>>,
}

impl<S> Clone for SharedStore<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S: BetStore> SharedStore<S> {
    pub fn new(store: S) -> Self {
        Self {
            inner: Arc::new(Mutex::new(store)),
        }
    }

    pub async fn store(&self, bets: Vec<Bet>) -> Result<(), StorageErr> {
        self.inner.lock().await.store(bets).await
    }

    pub async fn winners_for_agency(&self, agency: u32) -> Result<Vec<String>, StorageErr> {
        self.inner.lock().await.winners_for_agency(agency).await
    }

    /// Direct access to the underlying store
    pub async fn lock(&self) -> MutexGuard<'_, S> {
        self.inner.lock().await
    }
}

/// Keeps every bet as a line in a CSV file
///
/// a bet wins when its number matches the winning number,
/// winners are reported by their document.
#[derive(Debug)]
pub struct CsvStore {
    path: PathBuf,
    winning_number: u32,
}

impl CsvStore {
    pub fn new(path: impl Into<PathBuf>, winning_number: u32) -> Self {
        Self {
            path: path.into(),
            winning_number,
        }
    }
}

#[async_trait]
impl BetStore for CsvStore {
    async fn store(&mut self, bets: Vec<Bet>) -> Result<(), StorageErr> {
        // a single write per batch
        let mut content = String::new();
        for bet in bets.iter() {
            content.push_str(&bet.to_string());
            content.push('\n');
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        file.write_all(content.as_bytes()).await?;
        file.flush().await?;
        file.sync_data().await?;

        Ok(())
    }

    async fn winners_for_agency(&self, agency: u32) -> Result<Vec<String>, StorageErr> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            // nothing was ever stored
            Err(err) if err.kind() == tokio::io::ErrorKind::NotFound => return Ok(vec![]),
            Err(err) => return Err(err.into()),
        };

        let mut winners = vec![];
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            let bet = line
                .parse::<Bet>()
                .map_err(|reason| StorageErr::Corrupted {
                    line: idx + 1,
                    reason,
                })?;

            if bet.agency == agency && bet.has_number(self.winning_number) {
                winners.push(bet.document);
            }
        }

        Ok(winners)
    }
}

/// Same semantics as [`CsvStore`], without touching the disk
#[derive(Debug, Default)]
pub struct MemoryStore {
    bets: Vec<Bet>,
    winning_number: u32,
    store_calls: usize,
}

impl MemoryStore {
    pub fn new(winning_number: u32) -> Self {
        Self {
            winning_number,
            ..Default::default()
        }
    }

    pub fn bets(&self) -> &[Bet] {
        &self.bets
    }

    pub fn store_calls(&self) -> usize {
        self.store_calls
    }
}

#[async_trait]
impl BetStore for MemoryStore {
    async fn store(&mut self, bets: Vec<Bet>) -> Result<(), StorageErr> {
        self.store_calls += 1;
        self.bets.extend(bets);

        Ok(())
    }

    async fn winners_for_agency(&self, agency: u32) -> Result<Vec<String>, StorageErr> {
        Ok(self
            .bets
            .iter()
            .filter(|bet| bet.agency == agency && bet.has_number(self.winning_number))
            .map(|bet| bet.document.clone())
            .collect())
    }
}
