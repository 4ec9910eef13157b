//! 🎬 *[a channel fills with pages. somewhere, a stream waits.]*
//! *[the clock on the wall reads 2:47am.]*
//!
//! 📤 The PublishWorker: patient, tireless, and deeply unbothered by the chaos
//! happening upstream. It receives pages. It turns every object into a descriptor.
//! It puts descriptors on the stream. It asks no questions.
//!
//! ⚠️ It does NOT write the terminal marker. The marker means "the listing finished",
//! and only the scanner knows whether it did.

use anyhow::{Context, Result};
use async_channel::Receiver;
use bytes::Bytes;
use tokio::task::JoinHandle;
use tracing::debug;

use super::Worker;
use crate::backends::ObjectSummary;
use crate::common::ObjectDescriptor;
use crate::progress::ScanProgress;
use crate::stream::{ProducerBackend, StreamProducer, partition_key_for};

/// 📤 What the publisher hands back: the producer (so the scanner can finish the job)
/// and how many descriptors went out.
#[derive(Debug)]
pub(in crate::supervisors) struct PublishReport {
    pub(in crate::supervisors) producer: ProducerBackend,
    pub(in crate::supervisors) published: u64,
}

#[derive(Debug)]
pub(in crate::supervisors) struct PublishWorker {
    rx: Receiver<Vec<ObjectSummary>>,
    producer: ProducerBackend,
    progress: ScanProgress,
}

impl PublishWorker {
    pub(in crate::supervisors) fn new(
        rx: Receiver<Vec<ObjectSummary>>,
        producer: ProducerBackend,
        progress: ScanProgress,
    ) -> Self {
        // 🔧 Three fields. One purpose. Zero drama.
        Self { rx, producer, progress }
    }
}

impl Worker for PublishWorker {
    type Output = PublishReport;

    fn start(mut self) -> JoinHandle<Result<PublishReport>> {
        tokio::spawn(async move {
            debug!("📥 PublishWorker started draining channel...");
            let mut the_published = 0u64;
            while let Ok(page) = self.rx.recv().await {
                for object in page {
                    let the_payload = ObjectDescriptor::new(object.key.as_str(), object.size).encode()?;
                    // -- 🔑 partition key = object key (shortened past 256 chars), so the stream
                    // spreads objects across shards
                    self.producer
                        .put_record(&partition_key_for(&object.key), Bytes::from(the_payload))
                        .await
                        .context(format!(
                            "💀 PublishWorker could not put '{}' on the stream",
                            object.key
                        ))?;
                    the_published += 1;
                    self.progress.advance(1);
                }
            }
            // Channel is empty and closed
            debug!("🏁 PublishWorker: channel closed after {the_published} descriptor(s)");
            Ok(PublishReport {
                producer: self.producer,
                published: the_published,
            })
        })
    }
}
