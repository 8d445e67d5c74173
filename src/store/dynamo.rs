use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_dynamodb as ddb;
use aws_sdk_dynamodb::error::{DisplayErrorContext, ProvideErrorMetadata}; // for .code()
use ddb::types::{AttributeValue as Av, PutRequest, ReturnValue, WriteRequest};

use super::{paginate, write_chunks, Index, Item, ItemStream, Key, Page, Store, StoreError};
use super::{PK, TYPE};
use crate::config::Config;

const CONDITION_FAILED: &str = "ConditionalCheckFailedException";

#[derive(Clone)]
pub struct DynamoStore {
    ddb: ddb::Client,
    table: String,
}

impl DynamoStore {
    pub async fn new(config: &Config) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = ddb::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }
        Self::from_client(ddb::Client::from_conf(builder.build()), &config.table_name)
    }

    pub fn from_client(ddb: ddb::Client, table: impl Into<String>) -> Self {
        Self {
            ddb,
            table: table.into(),
        }
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    fn failed<E>(&self, op: &'static str, err: E) -> StoreError
    where
        E: ProvideErrorMetadata + std::error::Error,
    {
        let code = err.code().unwrap_or("unknown");
        let msg = err.message().unwrap_or("");
        tracing::error!(table=%self.table, op, err_code=%code, err_msg=%msg, "DDB call failed");
        StoreError::unavailable(op, DisplayErrorContext(&err).to_string())
    }

    async fn put(&self, item: Item, condition: Option<&str>) -> Result<(), StoreError> {
        let key = Key::of(&item);
        let r = self
            .ddb
            .put_item()
            .table_name(&self.table)
            .set_item(Some(item))
            .set_condition_expression(condition.map(str::to_string))
            .set_expression_attribute_names(
                condition.map(|_| [("#pk".to_string(), PK.to_string())].into()),
            )
            .send()
            .await;

        match r {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(CONDITION_FAILED) => {
                let key = key.unwrap_or_else(|| Key::new("", ""));
                Err(match condition {
                    Some(c) if c.starts_with("attribute_not_exists") => {
                        StoreError::AlreadyExists(key)
                    }
                    _ => StoreError::NotFound(key),
                })
            }
            Err(e) => Err(self.failed("put_item", e)),
        }
    }
}

#[async_trait]
impl Store for DynamoStore {
    async fn put_if_absent(&self, item: Item) -> Result<(), StoreError> {
        self.put(item, Some("attribute_not_exists(#pk)")).await
    }

    async fn put_overwrite(&self, item: Item) -> Result<(), StoreError> {
        self.put(item, None).await
    }

    async fn put_if_exists(&self, item: Item) -> Result<(), StoreError> {
        self.put(item, Some("attribute_exists(#pk)")).await
    }

    async fn delete_if_exists(&self, key: &Key) -> Result<(), StoreError> {
        let r = self
            .ddb
            .delete_item()
            .table_name(&self.table)
            .set_key(Some(key.to_item()))
            .condition_expression("attribute_exists(#pk)")
            .expression_attribute_names("#pk", PK)
            .send()
            .await;

        match r {
            Ok(_) => Ok(()),
            Err(e) if e.code() == Some(CONDITION_FAILED) => Err(StoreError::NotFound(key.clone())),
            Err(e) => Err(self.failed("delete_item", e)),
        }
    }

    async fn batch_put(&self, items: Vec<Item>) -> Result<(), StoreError> {
        write_chunks(items, |chunk| async move {
            let requests = chunk
                .into_iter()
                .map(|item| {
                    PutRequest::builder()
                        .set_item(Some(item))
                        .build()
                        .map(|put| WriteRequest::builder().put_request(put).build())
                })
                .collect::<Result<Vec<_>, _>>()
                .map_err(|e| StoreError::unavailable("batch_write_item", e.to_string()))?;

            let out = self
                .ddb
                .batch_write_item()
                .request_items(&self.table, requests)
                .send()
                .await
                .map_err(|e| self.failed("batch_write_item", e))?;

            let unprocessed = out
                .unprocessed_items
                .as_ref()
                .and_then(|u| u.get(&self.table))
                .map_or(0, Vec::len);
            if unprocessed > 0 {
                tracing::warn!(table=%self.table, unprocessed, "BatchWriteItem left items unprocessed");
                return Err(StoreError::unavailable(
                    "batch_write_item",
                    format!("{unprocessed} items unprocessed"),
                ));
            }
            Ok::<(), StoreError>(())
        })
        .await
    }

    fn query<'a>(&'a self, index: Index, partition: &str, ascending: bool) -> ItemStream<'a> {
        let partition = partition.to_string();
        paginate(move |token: Option<Item>| {
            let request = self
                .ddb
                .query()
                .table_name(&self.table)
                .set_index_name(index.name().map(str::to_string))
                .key_condition_expression("#pk = :pk")
                .expression_attribute_names("#pk", index.partition_attr())
                .expression_attribute_values(":pk", Av::S(partition.clone()))
                .scan_index_forward(ascending)
                .set_exclusive_start_key(token);
            async move {
                let out = request.send().await.map_err(|e| self.failed("query", e))?;
                Ok(Page {
                    items: out.items.unwrap_or_default(),
                    next: out.last_evaluated_key.filter(|k| !k.is_empty()),
                })
            }
        })
    }

    fn scan<'a>(&'a self, type_filter: &str) -> ItemStream<'a> {
        let type_filter = type_filter.to_string();
        paginate(move |token: Option<Item>| {
            let request = self
                .ddb
                .scan()
                .table_name(&self.table)
                .filter_expression("#t = :t")
                .expression_attribute_names("#t", TYPE)
                .expression_attribute_values(":t", Av::S(type_filter.clone()))
                .set_exclusive_start_key(token);
            async move {
                let out = request.send().await.map_err(|e| self.failed("scan", e))?;
                Ok(Page {
                    items: out.items.unwrap_or_default(),
                    next: out.last_evaluated_key.filter(|k| !k.is_empty()),
                })
            }
        })
    }

    async fn increment_counter(
        &self,
        key: &Key,
        attribute: &str,
        delta: i64,
    ) -> Result<i64, StoreError> {
        let r = self
            .ddb
            .update_item()
            .table_name(&self.table)
            .set_key(Some(key.to_item()))
            .update_expression("SET #c = #c + :d")
            .condition_expression("attribute_exists(#pk)")
            .expression_attribute_names("#c", attribute)
            .expression_attribute_names("#pk", PK)
            .expression_attribute_values(":d", Av::N(delta.to_string()))
            .return_values(ReturnValue::UpdatedNew)
            .send()
            .await;

        match r {
            Ok(out) => out
                .attributes
                .as_ref()
                .and_then(|a| a.get(attribute))
                .and_then(|v| v.as_n().ok())
                .and_then(|n| n.parse::<i64>().ok())
                .ok_or_else(|| {
                    StoreError::unavailable("update_item", format!("{attribute} missing from reply"))
                }),
            Err(e) if e.code() == Some(CONDITION_FAILED) => Err(StoreError::NotFound(key.clone())),
            Err(e) => Err(self.failed("update_item", e)),
        }
    }
}
