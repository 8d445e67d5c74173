use aws_config::BehaviorVersion;
use aws_lambda_events::event::s3::S3Event;
use chrono::Utc;
use lambda_runtime::{run, service_fn, Error, LambdaEvent};
use tracing_subscriber::EnvFilter;

use sitestats::client::TableClient;
use sitestats::config::Config;
use sitestats::export::parse_object;
use sitestats::geo::IpifyLookup;
use sitestats::ingest::{IngestReport, Pipeline};
use sitestats::store::dynamo::DynamoStore;

#[derive(Clone)]
struct Ctx {
    client: TableClient<DynamoStore>,
    s3: aws_sdk_s3::Client,
    lookup: Option<IpifyLookup>,
    bucket: String,
    config: Config,
}

impl Ctx {
    async fn new() -> Result<Self, sitestats::Error> {
        let config = Config::from_env()?;
        let bucket = config
            .bucket
            .clone()
            .ok_or_else(|| sitestats::Error::Config("BUCKET_NAME is not set".into()))?;
        let sdk_config = aws_config::load_defaults(BehaviorVersion::latest()).await;
        Ok(Self {
            client: TableClient::new(DynamoStore::new(&config).await),
            s3: aws_sdk_s3::Client::new(&sdk_config),
            lookup: config.ipify_key.as_deref().map(IpifyLookup::new),
            bucket,
            config,
        })
    }
}

/// S3 event keys arrive form-encoded.
fn object_key(raw: &str) -> String {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|k| k.into_owned())
        .unwrap_or(spaced)
}

async fn handler(event: LambdaEvent<S3Event>, ctx: &Ctx) -> Result<IngestReport, Error> {
    let mut total = IngestReport::default();

    for record in event.payload.records {
        let (Some(bucket), Some(raw_key)) = (record.s3.bucket.name, record.s3.object.key) else {
            tracing::warn!("S3 record without bucket or key");
            continue;
        };
        if bucket != ctx.bucket {
            tracing::warn!(%bucket, expected=%ctx.bucket, "ignoring object from another bucket");
            continue;
        }
        let key = object_key(&raw_key);

        let object = ctx
            .s3
            .get_object()
            .bucket(&bucket)
            .key(&key)
            .send()
            .await
            .map_err(|e| Error::from(format!("s3 get {bucket}/{key}: {e}")))?;
        let body = object
            .body
            .collect()
            .await
            .map_err(|e| Error::from(format!("s3 read {bucket}/{key}: {e}")))?
            .into_bytes();

        let rows = parse_object(&key, body)?;
        tracing::info!(%key, rows = rows.len(), "ingesting export");

        let mut pipeline = Pipeline::new(&ctx.client, ctx.config.idle_threshold);
        if let Some(lookup) = &ctx.lookup {
            pipeline = pipeline.with_lookup(lookup);
        }
        total += pipeline.ingest(&rows, Utc::now()).await?;
    }

    Ok(total)
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .without_time()
        .init();

    let ctx = Ctx::new().await?;

    let ctx_for_service = ctx.clone();
    run(service_fn(move |event: LambdaEvent<S3Event>| {
        let ctx = ctx_for_service.clone();
        async move { handler(event, &ctx).await }
    }))
    .await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn object_keys_are_decoded() {
        assert_eq!(object_key("exports/2021-01-01+day.csv"), "exports/2021-01-01 day.csv");
        assert_eq!(object_key("exports/a%2Bb.csv"), "exports/a+b.csv");
    }
}
