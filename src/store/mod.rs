//! Storage seam for the single-table design.
//!
//! Every entity lives in one table keyed by `PK`/`SK`, with two global
//! secondary indexes (`GSI1`, `GSI2`). [`Store`] exposes exactly the
//! operations the table client needs; [`dynamo::DynamoStore`] talks to
//! DynamoDB and [`memory::MemoryStore`] keeps everything in process.

pub mod dynamo;
pub mod memory;

use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue as Av;
use futures::stream::{self, BoxStream, StreamExt, TryStreamExt};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;

pub use crate::error::StoreError;

/// A stored record: attribute name to tagged value.
pub type Item = HashMap<String, Av>;

/// Lazy sequence of items; pages are fetched as the stream is polled.
pub type ItemStream<'a> = BoxStream<'a, Result<Item, StoreError>>;

pub const PK: &str = "PK";
pub const SK: &str = "SK";
pub const GSI1_PK: &str = "GSI1PK";
pub const GSI1_SK: &str = "GSI1SK";
pub const GSI2_PK: &str = "GSI2PK";
pub const GSI2_SK: &str = "GSI2SK";
pub const TYPE: &str = "Type";

/// BatchWriteItem accepts at most 25 requests per call.
pub const BATCH_WRITE_LIMIT: usize = 25;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }

    pub fn to_item(&self) -> Item {
        HashMap::from([
            (PK.to_string(), Av::S(self.pk.clone())),
            (SK.to_string(), Av::S(self.sk.clone())),
        ])
    }

    /// Reads the primary key back out of a full item.
    pub fn of(item: &Item) -> Option<Key> {
        let pk = item.get(PK).and_then(|v| v.as_s().ok())?;
        let sk = item.get(SK).and_then(|v| v.as_s().ok())?;
        Some(Key::new(pk.clone(), sk.clone()))
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} / {}", self.pk, self.sk)
    }
}

/// Which key pair a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Index {
    Primary,
    Gsi1,
    Gsi2,
}

impl Index {
    pub fn name(self) -> Option<&'static str> {
        match self {
            Index::Primary => None,
            Index::Gsi1 => Some("GSI1"),
            Index::Gsi2 => Some("GSI2"),
        }
    }

    pub fn partition_attr(self) -> &'static str {
        match self {
            Index::Primary => PK,
            Index::Gsi1 => GSI1_PK,
            Index::Gsi2 => GSI2_PK,
        }
    }

    pub fn sort_attr(self) -> &'static str {
        match self {
            Index::Primary => SK,
            Index::Gsi1 => GSI1_SK,
            Index::Gsi2 => GSI2_SK,
        }
    }
}

/// One page of a query or scan plus the token for the next one.
#[derive(Debug, Default)]
pub struct Page {
    pub items: Vec<Item>,
    pub next: Option<Item>,
}

/// Turns a page fetcher into a lazy item stream.
///
/// `fetch` is called with `None` first, then with each continuation token
/// until a page comes back without one. Tokens are single use, so the
/// stream cannot be restarted part way through.
pub fn paginate<'a, F, Fut>(fetch: F) -> ItemStream<'a>
where
    F: FnMut(Option<Item>) -> Fut + Send + 'a,
    Fut: Future<Output = Result<Page, StoreError>> + Send + 'a,
{
    enum Cursor {
        Start,
        After(Item),
        Done,
    }

    stream::try_unfold((fetch, Cursor::Start), |(mut fetch, cursor)| async move {
        let token = match cursor {
            Cursor::Start => None,
            Cursor::After(token) => Some(token),
            Cursor::Done => return Ok(None),
        };
        let page = fetch(token).await?;
        let cursor = match page.next {
            Some(token) => Cursor::After(token),
            None => Cursor::Done,
        };
        let items = stream::iter(page.items.into_iter().map(Ok::<Item, StoreError>));
        Ok::<_, StoreError>(Some((items, (fetch, cursor))))
    })
    .try_flatten()
    .boxed()
}

/// Submits `items` in chunks of [`BATCH_WRITE_LIMIT`], one chunk at a time.
/// Stops at the first failing chunk; earlier chunks stay written.
pub async fn write_chunks<F, Fut>(items: Vec<Item>, mut submit: F) -> Result<(), StoreError>
where
    F: FnMut(Vec<Item>) -> Fut,
    Fut: Future<Output = Result<(), StoreError>>,
{
    for chunk in items.chunks(BATCH_WRITE_LIMIT) {
        submit(chunk.to_vec()).await?;
    }
    Ok(())
}

/// The storage operations the table client is built on.
///
/// Writes carry their key inside the item (`PK`/`SK`). Conditional
/// operations check only for the key's existence; there is no versioning.
#[async_trait]
pub trait Store: Send + Sync {
    /// Create; fails with `AlreadyExists` if the key is taken.
    async fn put_if_absent(&self, item: Item) -> Result<(), StoreError>;

    /// Unconditional upsert. Only rollups are written this way.
    async fn put_overwrite(&self, item: Item) -> Result<(), StoreError>;

    /// Replace an existing item; fails with `NotFound` otherwise.
    async fn put_if_exists(&self, item: Item) -> Result<(), StoreError>;

    async fn delete_if_exists(&self, key: &Key) -> Result<(), StoreError>;

    /// Unconditional puts, submitted sequentially in chunks of
    /// [`BATCH_WRITE_LIMIT`]. Chunks written before a failure stay written.
    async fn batch_put(&self, items: Vec<Item>) -> Result<(), StoreError>;

    /// Every item whose partition attribute for `index` equals `partition`,
    /// ordered by the index sort key.
    fn query<'a>(&'a self, index: Index, partition: &str, ascending: bool) -> ItemStream<'a>;

    /// Every item whose `Type` attribute equals `type_filter`.
    fn scan<'a>(&'a self, type_filter: &str) -> ItemStream<'a>;

    /// Atomically adds `delta` to a numeric attribute and returns the new value.
    async fn increment_counter(
        &self,
        key: &Key,
        attribute: &str,
        delta: i64,
    ) -> Result<i64, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn numbered(n: usize) -> Item {
        HashMap::from([("n".to_string(), Av::N(n.to_string()))])
    }

    #[tokio::test]
    async fn paginate_follows_tokens_until_exhausted() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let items: Vec<Item> = paginate(move |token: Option<Item>| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move {
                let start = token
                    .and_then(|t| t.get("n").and_then(|v| v.as_n().ok()).cloned())
                    .and_then(|n| n.parse::<usize>().ok())
                    .unwrap_or(0);
                let end = (start + 2).min(5);
                Ok(Page {
                    items: (start..end).map(numbered).collect(),
                    next: (end < 5).then(|| numbered(end)),
                })
            }
        })
        .try_collect()
        .await
        .unwrap();

        assert_eq!(items.len(), 5);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn paginate_is_lazy() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = calls.clone();
        let mut items = paginate(move |_token: Option<Item>| {
            seen.fetch_add(1, Ordering::SeqCst);
            async move {
                Ok(Page {
                    items: vec![numbered(0), numbered(1)],
                    next: Some(numbered(2)),
                })
            }
        });

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        items.next().await.unwrap().unwrap();
        items.next().await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn paginate_surfaces_page_errors() {
        let result: Result<Vec<Item>, StoreError> = paginate(|_token: Option<Item>| async {
            Err(StoreError::unavailable("query", "throttled"))
        })
        .try_collect()
        .await;
        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
    }

    #[tokio::test]
    async fn batches_are_cut_at_the_write_limit() {
        let mut sizes = Vec::new();
        write_chunks((0..26).map(numbered).collect(), |chunk| {
            sizes.push(chunk.len());
            async { Ok::<(), StoreError>(()) }
        })
        .await
        .unwrap();
        assert_eq!(sizes, [25, 1]);
    }

    #[tokio::test]
    async fn failed_chunk_keeps_earlier_chunks_and_skips_later_ones() {
        let mut written: Vec<Item> = Vec::new();
        let mut calls = 0;
        let result = write_chunks((0..51).map(numbered).collect(), |chunk| {
            calls += 1;
            let outcome = if calls == 2 {
                Err(StoreError::unavailable("batch_write_item", "2 items unprocessed"))
            } else {
                written.extend(chunk);
                Ok(())
            };
            async move { outcome }
        })
        .await;

        assert!(matches!(result, Err(StoreError::Unavailable { .. })));
        assert_eq!(calls, 2);
        assert_eq!(written.len(), 25);
        assert_eq!(written[24], numbered(24));
    }

    #[test]
    fn key_round_trips_through_item() {
        let key = Key::new("PAGE#/blog", "#PAGE");
        assert_eq!(Key::of(&key.to_item()), Some(key));
    }
}
