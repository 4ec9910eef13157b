//! 📋 The ListWorker: pages through the source bucket and drops every page into a channel.
//!
//! 🎬 *[a clerk with a very long ledger. page 1. page 2. page 4,812.]*
//! *[the clerk does not read the entries. the clerk only turns pages.]*

use anyhow::{Context, Result};
use async_channel::Sender;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::Worker;
use crate::backends::{ObjectStore, ObjectStoreBackend, ObjectSummary};

/// 📋 Lists one bucket to exhaustion. A failed page ends the scan; there is no resume.
#[derive(Debug)]
pub(in crate::supervisors) struct ListWorker {
    tx: Sender<Vec<ObjectSummary>>,
    source: ObjectStoreBackend,
    bucket: String,
}

impl ListWorker {
    pub(in crate::supervisors) fn new(
        tx: Sender<Vec<ObjectSummary>>,
        source: ObjectStoreBackend,
        bucket: impl Into<String>,
    ) -> Self {
        Self {
            tx,
            source,
            bucket: bucket.into(),
        }
    }
}

impl Worker for ListWorker {
    /// 🔢 Pages listed.
    type Output = u64;

    fn start(self) -> JoinHandle<Result<u64>> {
        tokio::spawn(async move {
            debug!("📋 ListWorker started on s3://{}", self.bucket);
            let mut the_token: Option<String> = None;
            let mut the_pages = 0u64;
            loop {
                let the_page = self
                    .source
                    .list_objects(&self.bucket, the_token.take())
                    .await
                    .context(format!(
                        "💀 Listing s3://{} died on page {}. The scan is over; start it again.",
                        self.bucket,
                        the_pages + 1
                    ))?;
                the_pages += 1;
                trace!("📄 page {the_pages}: {} object(s)", the_page.objects.len());

                if !the_page.objects.is_empty() {
                    self.tx.send(the_page.objects).await.context(
                        "💀 ListWorker had a page ready but the publisher stopped listening",
                    )?;
                }
                match the_page.next_token {
                    Some(token) => the_token = Some(token),
                    None => break,
                }
            }
            // -- 🏁 dropping self.tx here closes the channel; the publisher takes it from there
            debug!("🏁 ListWorker: {} page(s) of s3://{} listed", the_pages, self.bucket);
            Ok(the_pages)
        })
    }
}
