use async_trait::async_trait;
use aws_sdk_dynamodb::types::AttributeValue as Av;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use super::{paginate, write_chunks, Index, Item, ItemStream, Key, Page, Store, StoreError, TYPE};

#[derive(Default)]
pub struct MemoryStore {
    items: Mutex<BTreeMap<Key, Item>>,
    page_size: Option<usize>,
    offline: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queries and scans return at most `size` items per page.
    pub fn with_page_size(size: usize) -> Self {
        Self {
            page_size: Some(size.max(1)),
            ..Self::default()
        }
    }

    /// While offline every call fails with `Unavailable`.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn get(&self, key: &Key) -> Option<Item> {
        self.lock().get(key).cloned()
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<Key, Item>> {
        self.items.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(&self, op: &'static str) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StoreError::unavailable(op, "store is offline"));
        }
        Ok(())
    }

    fn key_of(item: &Item) -> Result<Key, StoreError> {
        Key::of(item).ok_or_else(|| StoreError::unavailable("put_item", "item has no PK/SK"))
    }

    /// Serves one page out of `matches`, resuming after the token's key.
    fn page(&self, matches: Vec<(Key, Item)>, token: Option<Item>) -> Page {
        let start = token
            .as_ref()
            .and_then(Key::of)
            .and_then(|after| matches.iter().position(|(k, _)| *k == after))
            .map_or(0, |i| i + 1);
        let rest = &matches[start.min(matches.len())..];
        let take = self.page_size.unwrap_or(rest.len()).min(rest.len());
        let next = (take < rest.len() && take > 0).then(|| rest[take - 1].0.to_item());
        Page {
            items: rest[..take].iter().map(|(_, item)| item.clone()).collect(),
            next,
        }
    }
}

fn s<'i>(item: &'i Item, attr: &str) -> Option<&'i str> {
    item.get(attr).and_then(|v| v.as_s().ok()).map(String::as_str)
}

#[async_trait]
impl Store for MemoryStore {
    async fn put_if_absent(&self, item: Item) -> Result<(), StoreError> {
        self.check("put_item")?;
        let key = Self::key_of(&item)?;
        let mut items = self.lock();
        if items.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        items.insert(key, item);
        Ok(())
    }

    async fn put_overwrite(&self, item: Item) -> Result<(), StoreError> {
        self.check("put_item")?;
        let key = Self::key_of(&item)?;
        self.lock().insert(key, item);
        Ok(())
    }

    async fn put_if_exists(&self, item: Item) -> Result<(), StoreError> {
        self.check("put_item")?;
        let key = Self::key_of(&item)?;
        let mut items = self.lock();
        match items.get_mut(&key) {
            Some(slot) => {
                *slot = item;
                Ok(())
            }
            None => Err(StoreError::NotFound(key)),
        }
    }

    async fn delete_if_exists(&self, key: &Key) -> Result<(), StoreError> {
        self.check("delete_item")?;
        match self.lock().remove(key) {
            Some(_) => Ok(()),
            None => Err(StoreError::NotFound(key.clone())),
        }
    }

    async fn batch_put(&self, items: Vec<Item>) -> Result<(), StoreError> {
        write_chunks(items, |chunk| async move {
            self.check("batch_write_item")?;
            let keyed = chunk
                .into_iter()
                .map(|item| Ok((Self::key_of(&item)?, item)))
                .collect::<Result<Vec<_>, StoreError>>()?;
            self.lock().extend(keyed);
            Ok::<(), StoreError>(())
        })
        .await
    }

    fn query<'a>(&'a self, index: Index, partition: &str, ascending: bool) -> ItemStream<'a> {
        let partition = partition.to_string();
        paginate(move |token: Option<Item>| {
            let result = self.check("query").map(|_| {
                let mut matches: Vec<(Key, Item)> = self
                    .lock()
                    .iter()
                    .filter(|(_, item)| s(item, index.partition_attr()) == Some(partition.as_str()))
                    .map(|(k, item)| (k.clone(), item.clone()))
                    .collect();
                matches.sort_by(|(ka, a), (kb, b)| {
                    s(a, index.sort_attr())
                        .cmp(&s(b, index.sort_attr()))
                        .then_with(|| ka.cmp(kb))
                });
                if !ascending {
                    matches.reverse();
                }
                self.page(matches, token)
            });
            async move { result }
        })
    }

    fn scan<'a>(&'a self, type_filter: &str) -> ItemStream<'a> {
        let type_filter = type_filter.to_string();
        paginate(move |token: Option<Item>| {
            let result = self.check("scan").map(|_| {
                let matches: Vec<(Key, Item)> = self
                    .lock()
                    .iter()
                    .filter(|(_, item)| s(item, TYPE) == Some(type_filter.as_str()))
                    .map(|(k, item)| (k.clone(), item.clone()))
                    .collect();
                self.page(matches, token)
            });
            async move { result }
        })
    }

    async fn increment_counter(
        &self,
        key: &Key,
        attribute: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        self.check("update_item")?;
        let mut items = self.lock();
        let item = items
            .get_mut(key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;
        let current = item
            .get(attribute)
            .and_then(|v| v.as_n().ok())
            .and_then(|n| n.parse::<i64>().ok())
            .ok_or_else(|| {
                StoreError::unavailable("update_item", format!("{attribute} is not a number"))
            })?;
        let updated = current + delta;
        item.insert(attribute.to_string(), Av::N(updated.to_string()));
        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{GSI1_PK, GSI1_SK, PK};
    use futures::TryStreamExt;

    fn item(pk: &str, sk: &str, kind: &str) -> Item {
        let mut item = Key::new(pk, sk).to_item();
        item.insert(TYPE.to_string(), Av::S(kind.to_string()));
        item
    }

    fn indexed(pk: &str, sk: &str, gsi_pk: &str, gsi_sk: &str) -> Item {
        let mut item = item(pk, sk, "visit");
        item.insert(GSI1_PK.to_string(), Av::S(gsi_pk.to_string()));
        item.insert(GSI1_SK.to_string(), Av::S(gsi_sk.to_string()));
        item
    }

    #[tokio::test]
    async fn conditional_writes() {
        let store = MemoryStore::new();
        store.put_if_absent(item("A", "1", "x")).await.unwrap();
        assert_eq!(
            store.put_if_absent(item("A", "1", "x")).await,
            Err(StoreError::AlreadyExists(Key::new("A", "1")))
        );
        assert_eq!(
            store.put_if_exists(item("B", "1", "x")).await,
            Err(StoreError::NotFound(Key::new("B", "1")))
        );
        store.delete_if_exists(&Key::new("A", "1")).await.unwrap();
        assert!(store.delete_if_exists(&Key::new("A", "1")).await.is_err());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn batch_failure_keeps_the_chunks_before_it() {
        let store = MemoryStore::new();
        let mut items: Vec<Item> = (0..51)
            .map(|i| item("A", &format!("{i:02}"), "x"))
            .collect();
        items[30].remove(PK);

        assert!(store.batch_put(items).await.is_err());
        assert_eq!(store.len(), 25);
        assert!(store.get(&Key::new("A", "24")).is_some());
        assert!(store.get(&Key::new("A", "25")).is_none());
    }

    #[tokio::test]
    async fn gsi_query_orders_by_index_sort_key_across_pages() {
        let store = MemoryStore::with_page_size(2);
        store
            .batch_put(vec![
                indexed("V#1", "c", "PAGE#/", "VISIT#3"),
                indexed("V#2", "a", "PAGE#/", "VISIT#1"),
                indexed("V#3", "b", "PAGE#/", "VISIT#2"),
                indexed("V#4", "d", "PAGE#/other", "VISIT#0"),
            ])
            .await
            .unwrap();

        let found: Vec<Item> = store
            .query(Index::Gsi1, "PAGE#/", true)
            .try_collect()
            .await
            .unwrap();
        let order: Vec<&str> = found.iter().filter_map(|i| s(i, GSI1_SK)).collect();
        assert_eq!(order, ["VISIT#1", "VISIT#2", "VISIT#3"]);

        let newest_first: Vec<Item> = store
            .query(Index::Gsi1, "PAGE#/", false)
            .try_collect()
            .await
            .unwrap();
        assert_eq!(s(&newest_first[0], GSI1_SK), Some("VISIT#3"));
    }

    #[tokio::test]
    async fn scan_filters_on_type() {
        let store = MemoryStore::with_page_size(1);
        store.put_overwrite(item("A", "1", "visit")).await.unwrap();
        store.put_overwrite(item("B", "1", "session")).await.unwrap();
        store.put_overwrite(item("C", "1", "visit")).await.unwrap();
        let visits: Vec<Item> = store.scan("visit").try_collect().await.unwrap();
        assert_eq!(visits.len(), 2);
    }

    #[tokio::test]
    async fn counters_require_the_item() {
        let store = MemoryStore::new();
        let mut visitor = item("VISITOR#1", "#VISITOR", "visitor");
        visitor.insert("NumberSessions".to_string(), Av::N("1".to_string()));
        store.put_if_absent(visitor).await.unwrap();

        let key = Key::new("VISITOR#1", "#VISITOR");
        assert_eq!(store.increment_counter(&key, "NumberSessions", 2).await, Ok(3));
        assert_eq!(store.increment_counter(&key, "NumberSessions", -1).await, Ok(2));
        assert!(matches!(
            store
                .increment_counter(&Key::new("VISITOR#2", "#VISITOR"), "NumberSessions", 1)
                .await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn offline_store_is_unavailable() {
        let store = MemoryStore::new();
        store.set_offline(true);
        let err = store.put_overwrite(item("A", "1", "x")).await.unwrap_err();
        assert!(matches!(err, StoreError::Unavailable { .. }));
    }
}
