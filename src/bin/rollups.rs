use lambda_runtime::{service_fn, Error, LambdaEvent};
use serde_json::{json, Value as Json};
use std::collections::BTreeSet;
use tracing_subscriber::EnvFilter;

use sitestats::client::TableClient;
use sitestats::config::Config;
use sitestats::store::dynamo::DynamoStore;
use sitestats::store::Store;

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .init();

    let config = Config::from_env()?;
    let client = TableClient::new(DynamoStore::new(&config).await);

    let client_for_service = client.clone();
    lambda_runtime::run(service_fn(move |event: LambdaEvent<Json>| {
        let client = client_for_service.clone();
        async move { handler(event, &client).await }
    }))
    .await
}

async fn handler<S: Store>(event: LambdaEvent<Json>, client: &TableClient<S>) -> Result<Json, Error> {
    let slugs = visit_slugs(&event.payload);
    if slugs.is_empty() {
        return Ok(json!({ "message": "no new visits" }));
    }

    let mut rollups = 0;
    let mut failed = Vec::new();
    for slug in &slugs {
        match client.recompute_page(slug).await {
            Ok(written) => rollups += written.len(),
            Err(e) => {
                tracing::error!(%slug, err=%e, retryable=e.is_retryable(), "rollup failed");
                failed.push(slug.clone());
            }
        }
    }
    Ok(json!({
        "message": format!("updated {} of {} pages", slugs.len() - failed.len(), slugs.len()),
        "pages": slugs,
        "rollups": rollups,
        "failed": failed,
    }))
}

/// Slugs of the visits written in a stream batch. Other item types and
/// removals are skipped.
fn visit_slugs(event: &Json) -> BTreeSet<String> {
    let records = match event.get("Records").and_then(|r| r.as_array()) {
        Some(records) => records,
        None => return BTreeSet::new(),
    };
    records
        .iter()
        .filter_map(|rec| rec.get("dynamodb")?.get("NewImage"))
        .filter(|image| image.pointer("/Type/S").and_then(|t| t.as_str()) == Some("visit"))
        .filter_map(|image| image.pointer("/Slug/S")?.as_str())
        .map(str::to_string)
        .collect()
}
