//! Lazy, restartable paginated iteration (spec §4.5 `stream({pageSize})`).
//!
//! Wraps `list_objects` pagination directly rather than buffering the whole
//! resource: each `next()` call only fetches and decodes one more page once
//! its buffer is drained. Finite — a fully-drained iterator returns `None`
//! forever until `reset()`.

use std::collections::VecDeque;
use std::sync::Arc;

use objectdb_client::ListOptions;
use objectdb_errors::ObjectDbResult;

use crate::record::Record;
use crate::resource::Resource;

pub struct StreamingIterator {
    resource: Arc<Resource>,
    page_size: u32,
    prefix: String,
    buffer: VecDeque<Record>,
    next_token: Option<String>,
    started: bool,
    exhausted: bool,
}

impl StreamingIterator {
    pub fn new(resource: Arc<Resource>, page_size: u32) -> Self {
        let prefix = format!("resource={}/data/id=", resource.name);
        Self { resource, page_size, prefix, buffer: VecDeque::new(), next_token: None, started: false, exhausted: false }
    }

    /// Rewinds to the beginning; the next `next()` call re-fetches the first
    /// page.
    pub fn reset(&mut self) {
        self.buffer.clear();
        self.next_token = None;
        self.started = false;
        self.exhausted = false;
    }

    async fn fill_buffer(&mut self) -> ObjectDbResult<()> {
        if self.exhausted || !self.buffer.is_empty() {
            return Ok(());
        }
        if self.started && self.next_token.is_none() {
            self.exhausted = true;
            return Ok(());
        }
        self.started = true;

        let page = self
            .resource
            .client_list(&self.prefix, ListOptions { continuation_token: self.next_token.clone(), page_size: Some(self.page_size) })
            .await?;

        let ids: Vec<String> =
            page.keys.iter().filter_map(|entry| entry.key.strip_prefix(&self.prefix).map(str::to_string)).collect();
        let resource = self.resource.clone();
        let outcome = crate::batch::run_batch(ids, self.page_size.max(1) as usize, false, move |id: String| {
            let resource = resource.clone();
            Box::pin(async move { resource.fetch_and_decode_pub(&id).await.map(|record| (id, record)) })
        })
        .await;
        if let Some(err) = outcome.failures.into_iter().next() {
            return Err(err);
        }
        let mut records = outcome.successes;
        records.sort_by(|(a, _), (b, _)| a.cmp(b));
        self.buffer.extend(records.into_iter().map(|(_, record)| record));
        self.next_token = page.next_token;
        if self.next_token.is_none() && self.buffer.is_empty() {
            self.exhausted = true;
        }
        Ok(())
    }

    /// Returns the next record, or `None` once the resource's entire primary
    /// prefix has been exhausted.
    pub async fn next(&mut self) -> Option<ObjectDbResult<Record>> {
        if let Some(record) = self.buffer.pop_front() {
            return Some(Ok(record));
        }
        if let Err(err) = self.fill_buffer().await {
            return Some(Err(err));
        }
        self.buffer.pop_front().map(Ok)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use objectdb_client::{FakeObjectClient, ObjectClient};
    use objectdb_cost::CostAccountant;
    use objectdb_events::EventBus;
    use objectdb_schema::{AttributeValue, FieldSpec, SchemaDef};
    use std::collections::HashMap;

    fn schema_def() -> SchemaDef {
        [("status".to_string(), FieldSpec::new("string|required"))].into_iter().collect()
    }

    async fn seeded_resource(n: usize) -> Arc<Resource> {
        let client: Arc<dyn ObjectClient> = Arc::new(FakeObjectClient::new(Arc::new(CostAccountant::default())));
        let res = Arc::new(
            Resource::new(client, EventBus::new(), b"key".to_vec(), crate::resource::ResourceConfig::new("orders"), &schema_def())
                .unwrap(),
        );
        for i in 0..n {
            let mut attrs = HashMap::new();
            attrs.insert("status".to_string(), AttributeValue::Str(format!("s{i}")));
            res.insert(attrs.into_iter().collect(), None, None, None).await.unwrap();
        }
        res
    }

    #[tokio::test]
    async fn stream_yields_every_record_exactly_once() {
        let res = seeded_resource(5).await;
        let mut stream = res.stream(2);
        let mut seen = Vec::new();
        while let Some(record) = stream.next().await {
            seen.push(record.unwrap().id);
        }
        seen.sort();
        let mut expected: Vec<String> =
            res.list(100, 0, &crate::filter::Filter::new(), None).await.unwrap().into_iter().map(|r| r.id).collect();
        expected.sort();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn stream_is_finite_then_restartable() {
        let res = seeded_resource(2).await;
        let mut stream = res.stream(10);
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_some());
        assert!(stream.next().await.is_none());
        assert!(stream.next().await.is_none());

        stream.reset();
        assert!(stream.next().await.is_some());
    }
}
