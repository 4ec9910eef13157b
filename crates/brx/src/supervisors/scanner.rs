// ai
//! 🔭 The scanner: "what's in the bucket?", answered one stream record at a time.
//!
//! 🎬 *[COLD OPEN: a list worker and a publish worker, connected by a channel.]*
//! *[the list worker pages. the publish worker publishes. when both are done,]*
//! *[the scanner writes one last sticky note: DRPS3-FinalMarker. then it flushes.]*
//!
//! 🧠 Knowledge graph:
//! - ListWorker → `async_channel::bounded(queue_capacity)` → PublishWorker
//! - the terminal marker goes out only if BOTH workers succeeded. A half-listed bucket
//!   with a marker at the end would tell the consumers "done" when it isn't.
//! - `scan()` returns only after `flush()` returned: "enumerated" means "durably queued".
//! - no ordering across objects, no dedupe. The consumers cope with both.

use anyhow::{Context, Result};
use bytes::Bytes;
use tracing::info;

use super::workers::{ListWorker, PublishReport, PublishWorker, Worker};
use crate::backends::ObjectStoreBackend;
use crate::common::{ObjectDescriptor, TERMINAL_KEY};
use crate::progress::ScanProgress;
use crate::stream::{ProducerBackend, StreamProducer};

/// 🔭 Enumerates one source bucket onto the stream.
#[derive(Debug)]
pub(crate) struct Scanner {
    source: ObjectStoreBackend,
    producer: ProducerBackend,
    bucket: String,
    queue_capacity: usize,
}

impl Scanner {
    pub(crate) fn new(
        source: ObjectStoreBackend,
        producer: ProducerBackend,
        bucket: impl Into<String>,
        queue_capacity: usize,
    ) -> Self {
        Self {
            source,
            producer,
            bucket: bucket.into(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// 🚀 List everything, publish everything, then the marker, then flush.
    /// Returns how many objects were published.
    pub(crate) async fn scan(self) -> Result<u64> {
        info!("🔭 Scanning s3://{} onto the stream", self.bucket);
        let the_progress = ScanProgress::new(&self.bucket);
        let (tx, rx) = async_channel::bounded(self.queue_capacity);

        let the_lister = ListWorker::new(tx, self.source, self.bucket.as_str()).start();
        let the_publisher = PublishWorker::new(rx, self.producer, the_progress.clone()).start();
        let (the_listed, the_published) = tokio::join!(the_lister, the_publisher);

        // 💀 a publisher failure is the root cause; the lister only noticed the closed channel
        let PublishReport {
            mut producer,
            published,
        } = the_published.context("💀 PublishWorker panicked. It was fine. And then it wasn't.")??;
        let the_pages = the_listed.context("💀 ListWorker panicked mid-page")??;

        let the_marker = ObjectDescriptor::terminal().encode()?;
        producer
            .put_record(TERMINAL_KEY, Bytes::from(the_marker))
            .await
            .context("💀 Every object made it onto the stream except the final marker. So close.")?;
        producer
            .flush()
            .await
            .context("💀 Could not flush the stream after the scan")?;

        the_progress.finish();
        info!(
            "✅ Scan of s3://{} done: {published} object(s) over {the_pages} page(s), marker sent",
            self.bucket
        );
        Ok(published)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backends::{InMemoryObjectStore, StoreFault};
    use crate::stream::InMemoryStream;

    async fn bucket_with(count: usize) -> InMemoryObjectStore {
        let store = InMemoryObjectStore::new();
        for index in 0..count {
            store
                .insert_object("src", &format!("obj-{index:03}"), vec![b'x'; index + 1])
                .await;
        }
        store
    }

    fn descriptors(records: &[crate::stream::StreamRecord]) -> Vec<ObjectDescriptor> {
        records
            .iter()
            .map(|record| ObjectDescriptor::decode(&record.data).expect("decode"))
            .collect()
    }

    #[tokio::test]
    async fn the_one_where_every_page_is_published_and_the_marker_goes_last() {
        let store = bucket_with(7).await;
        store.set_page_size(3).await;
        let stream = InMemoryStream::new(1);

        let published = Scanner::new(
            ObjectStoreBackend::InMemory(store),
            ProducerBackend::InMemory(stream.clone()),
            "src",
            2,
        )
        .scan()
        .await
        .expect("scan");

        assert_eq!(published, 7);
        let records = stream.records("shardId-000000000000").await;
        let seen = descriptors(&records);
        assert_eq!(seen.len(), 8);
        assert!(seen.last().is_some_and(ObjectDescriptor::is_terminal));
        assert_eq!(seen.iter().filter(|d| d.is_terminal()).count(), 1);
        // 📏 key and size survive the trip
        assert!(seen.contains(&ObjectDescriptor::new("obj-004", 5)));
        // 🔑 partition key is the object key
        assert_eq!(records[0].partition_key, seen[0].key);
    }

    #[tokio::test]
    async fn the_one_where_a_very_long_key_is_published_whole() {
        let store = InMemoryObjectStore::new();
        let the_long_key = format!("{}/payload.bin", "nested".repeat(160));
        store.insert_object("src", &the_long_key, b"tiny".to_vec()).await;
        let stream = InMemoryStream::new(1);

        Scanner::new(
            ObjectStoreBackend::InMemory(store),
            ProducerBackend::InMemory(stream.clone()),
            "src",
            2,
        )
        .scan()
        .await
        .expect("a key far past 256 characters must not sink the scan");

        let records = stream.records("shardId-000000000000").await;
        let seen = descriptors(&records);
        // ✅ the descriptor keeps the full key; only the routing key is shortened
        assert_eq!(seen[0], ObjectDescriptor::new(the_long_key.as_str(), 4));
        assert_eq!(records[0].partition_key.chars().count(), 256);
        assert!(seen[1].is_terminal());
    }

    #[tokio::test]
    async fn the_one_where_a_failed_page_means_no_marker() {
        let store = bucket_with(5).await;
        store.set_page_size(2).await;
        store.arm_fault(StoreFault::ListObjects { page: 2 }).await;
        let stream = InMemoryStream::new(1);

        let result = Scanner::new(
            ObjectStoreBackend::InMemory(store),
            ProducerBackend::InMemory(stream.clone()),
            "src",
            10,
        )
        .scan()
        .await;

        let err = result.expect_err("the scan should abort");
        assert!(format!("{err:#}").contains("page 2"));
        let seen = descriptors(&stream.records("shardId-000000000000").await);
        assert!(seen.iter().all(|d| !d.is_terminal()));
    }

    #[tokio::test]
    async fn the_one_where_a_closed_stream_fails_the_scan() {
        let store = bucket_with(3).await;
        let stream = InMemoryStream::new(1);
        stream.close().await;

        let result = Scanner::new(
            ObjectStoreBackend::InMemory(store),
            ProducerBackend::InMemory(stream.clone()),
            "src",
            1,
        )
        .scan()
        .await;

        assert!(result.is_err());
        assert_eq!(stream.total_records().await, 0);
    }
}
