//! Real S3-compatible backend, grounded on the bucket-gateway pattern: load
//! credentials and region into an `aws_config` loader, force path-style
//! addressing for non-AWS endpoints, and map SDK errors onto the engine's
//! error taxonomy instead of leaking `aws_sdk_s3` types.

use crate::connection::ConnectionInfo;
use crate::retry::with_retries;
use crate::{
    normalize_metadata, DeleteOutcome, GetResult, HeadResult, ListEntry, ListOptions, ListPage,
    ObjectClient, PutOptions, PutResult,
};
use async_trait::async_trait;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use objectdb_cost::{CostAccountant, StoreCommand};
use objectdb_errors::{ErrorContext, ObjectDbError, ObjectDbResult};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub struct S3ObjectClient {
    client: Client,
    bucket: String,
    prefix: String,
    cost: Arc<CostAccountant>,
}

impl S3ObjectClient {
    pub async fn new(info: ConnectionInfo, cost: Arc<CostAccountant>) -> ObjectDbResult<Self> {
        let mut loader = aws_config::defaults(aws_config::BehaviorVersion::latest())
            .region(aws_config::Region::new("us-east-1".to_string()));

        if let Some(endpoint) = info.endpoint_url() {
            loader = loader.endpoint_url(endpoint);
        }

        let creds = aws_sdk_s3::config::Credentials::new(
            &info.access_key,
            &info.secret_key,
            None,
            None,
            "objectdb-connection-string",
        );
        loader = loader.credentials_provider(creds);

        let sdk_config = loader.load().await;
        let force_path_style = info.scheme != crate::connection::Scheme::S3 || info.host != "aws";
        let s3_config = aws_sdk_s3::config::Builder::from(&sdk_config)
            .force_path_style(force_path_style)
            .build();

        Ok(Self { client: Client::from_conf(s3_config), bucket: info.bucket, prefix: info.prefix, cost })
    }

    fn full_key(&self, key: &str) -> String {
        if self.prefix.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.prefix, key)
        }
    }
}

fn is_retryable_service_error(err: &ObjectDbError) -> bool {
    matches!(err, ObjectDbError::StoreUnavailable { .. })
}

#[async_trait]
impl ObjectClient for S3ObjectClient {
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        metadata: HashMap<String, String>,
        options: PutOptions,
    ) -> ObjectDbResult<PutResult> {
        let full_key = self.full_key(key);
        let metadata = normalize_metadata(&metadata);
        let request_bytes = body.len() as u64;
        let retryable_put = options.if_match.is_none();

        let attempt = || {
            let body = body.clone();
            let metadata = metadata.clone();
            let options = options.clone();
            async move {
                let mut req = self
                    .client
                    .put_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .body(ByteStream::from(body))
                    .set_content_type(options.content_type.clone());
                for (k, v) in &metadata {
                    req = req.metadata(k, v);
                }
                if let Some(if_match) = &options.if_match {
                    req = if if_match == "*" { req.if_none_match("*") } else { req.if_match(if_match) };
                }

                debug!(bucket = %self.bucket, key = %full_key, "s3 put_object");
                req.send().await.map_err(|err| map_sdk_error("put_object", err))
            }
        };

        let result = if retryable_put {
            with_retries(attempt, is_retryable_service_error).await
        } else {
            attempt().await
        };

        self.cost.report(StoreCommand::Put, request_bytes, 0);
        let output = result.map_err(|err| match err {
            ObjectDbError::StoreUnavailable { context, .. } if options.if_match.is_some() => {
                ObjectDbError::StoreRejected {
                    message: "precondition failed or store unavailable".into(),
                    context,
                }
            }
            other => other,
        })?;

        Ok(PutResult { etag: output.e_tag().unwrap_or_default().to_string(), version_id: output.version_id().map(String::from) })
    }

    async fn get_object(&self, key: &str) -> ObjectDbResult<GetResult> {
        let full_key = self.full_key(key);
        let result = with_retries(
            || async {
                self.client.get_object().bucket(&self.bucket).key(&full_key).send().await.map_err(|err| {
                    if err.as_service_error().map(|e| e.is_no_such_key()).unwrap_or(false) {
                        ObjectDbError::NotFound { context: ErrorContext::new() }
                    } else {
                        map_sdk_error("get_object", err)
                    }
                })
            },
            is_retryable_service_error,
        )
        .await?;

        let metadata = result.metadata().cloned().unwrap_or_default();
        let etag = result.e_tag().unwrap_or_default().to_string();
        let last_modified = result
            .last_modified()
            .and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), 0));

        let body = result
            .body
            .collect()
            .await
            .map_err(|err| ObjectDbError::StoreUnavailable {
                message: format!("failed to read response body: {err}"),
                context: ErrorContext::new(),
                source: Some(anyhow::anyhow!(err.to_string())),
            })?
            .into_bytes()
            .to_vec();

        let response_bytes = body.len() as u64;
        self.cost.report(StoreCommand::Get, 0, response_bytes);
        Ok(GetResult { body, metadata, etag, last_modified })
    }

    async fn head_object(&self, key: &str) -> ObjectDbResult<HeadResult> {
        let full_key = self.full_key(key);
        let result = with_retries(
            || async {
                self.client.head_object().bucket(&self.bucket).key(&full_key).send().await.map_err(|err| {
                    if err.as_service_error().map(|e| e.is_not_found()).unwrap_or(false) {
                        ObjectDbError::NotFound { context: ErrorContext::new() }
                    } else {
                        map_sdk_error("head_object", err)
                    }
                })
            },
            is_retryable_service_error,
        )
        .await?;

        self.cost.report(StoreCommand::Head, 0, 0);
        Ok(HeadResult {
            metadata: result.metadata().cloned().unwrap_or_default(),
            etag: result.e_tag().unwrap_or_default().to_string(),
            content_length: result.content_length().unwrap_or(0) as u64,
            last_modified: result.last_modified().and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), 0)),
        })
    }

    async fn delete_object(&self, key: &str) -> ObjectDbResult<()> {
        let full_key = self.full_key(key);
        with_retries(
            || async {
                self.client
                    .delete_object()
                    .bucket(&self.bucket)
                    .key(&full_key)
                    .send()
                    .await
                    .map_err(|err| map_sdk_error("delete_object", err))
            },
            is_retryable_service_error,
        )
        .await?;
        self.cost.report(StoreCommand::Delete, 0, 0);
        Ok(())
    }

    async fn list_objects(&self, prefix: &str, options: ListOptions) -> ObjectDbResult<ListPage> {
        let full_prefix = self.full_key(prefix);
        let result = with_retries(
            || async {
                let mut req = self
                    .client
                    .list_objects_v2()
                    .bucket(&self.bucket)
                    .prefix(&full_prefix)
                    .max_keys(options.page_size.unwrap_or(1000) as i32);
                if let Some(token) = &options.continuation_token {
                    req = req.continuation_token(token);
                }
                req.send().await.map_err(|err| map_sdk_error("list_objects_v2", err))
            },
            is_retryable_service_error,
        )
        .await?;

        self.cost.report(StoreCommand::List, 0, 0);
        let keys = result
            .contents()
            .iter()
            .map(|obj| ListEntry {
                key: obj.key().unwrap_or_default().to_string(),
                size: obj.size().unwrap_or(0) as u64,
                etag: obj.e_tag().unwrap_or_default().to_string(),
                last_modified: obj.last_modified().and_then(|dt| chrono::DateTime::from_timestamp(dt.secs(), 0)),
            })
            .collect();

        Ok(ListPage { keys, next_token: result.next_continuation_token().map(String::from) })
    }

    async fn delete_objects(&self, keys: &[String]) -> ObjectDbResult<Vec<DeleteOutcome>> {
        let mut outcomes = Vec::with_capacity(keys.len());
        for key in keys {
            let outcome = match self.delete_object(key).await {
                Ok(()) => DeleteOutcome { key: key.clone(), deleted: true, error: None },
                Err(err) => DeleteOutcome { key: key.clone(), deleted: false, error: Some(err.to_string()) },
            };
            outcomes.push(outcome);
        }
        self.cost.report(StoreCommand::DeleteBatch, 0, 0);
        Ok(outcomes)
    }
}

/// 4xx other than 404 (already handled by callers) bubbles as `StoreRejected`;
/// everything else — timeouts, connection failures, 5xx — as `StoreUnavailable`.
fn map_sdk_error<E, R>(operation: &str, err: aws_sdk_s3::error::SdkError<E, R>) -> ObjectDbError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    warn!(operation, error = %err, "s3 operation failed");
    let status = err.raw_response().map(|r| r.status().as_u16());
    match status {
        Some(code) if (400..500).contains(&code) => ObjectDbError::StoreRejected {
            message: format!("{operation}: {err}"),
            context: ErrorContext::new(),
        },
        _ => ObjectDbError::StoreUnavailable {
            message: format!("{operation}: {err}"),
            context: ErrorContext::new(),
            source: Some(anyhow::anyhow!(err.to_string())),
        },
    }
}
