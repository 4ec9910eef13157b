// ai
//! 🌊☁️ Kinesis transport: producer, shard lister, shard reader.
//!
//! 🎬 COLD OPEN: INT. A KINESIS SHARD. IT HAS SEEN THINGS. IT RETAINS THEM FOR 24 HOURS.
//!
//! 🧠 Knowledge graph:
//! - producing: records buffer locally, then go out in `PutRecords` calls of at most 500.
//!   Kinesis may accept some and reject others in the same call (`FailedRecordCount`),
//!   so `flush` resends only the rejected ones, a bounded number of times.
//! - listing: `ListShards`, paged with `NextToken` (and, per the API's quirks, the
//!   stream name must NOT be repeated on follow-up pages).
//! - reading: `GetShardIterator` (TRIM_HORIZON or AFTER_SEQUENCE_NUMBER) then a chain of
//!   `GetRecords`. A missing `NextShardIterator` means the shard is closed and drained.
//!   An expired iterator is re-opened after the last sequence number we handed out.

use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_kinesis::primitives::Blob;
use aws_sdk_kinesis::types::{PutRecordsRequestEntry, PutRecordsResultEntry, ShardIteratorType};
use bytes::Bytes;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::backends::load_aws_config;
use crate::stream::{
    ShardPosition, ShardReader, ShardReaderBackend, ShardSource, StreamProducer, StreamRecord,
};

// 📦 PutRecords hard limit
const MAX_PUT_RECORDS_BATCH: usize = 500;
// 🔁 how many times a partially rejected batch gets resent before we call it
const MAX_PUT_ATTEMPTS: u32 = 5;
// 🏷️ max length of a lease table name, courtesy of DynamoDB
const MAX_TABLE_NAME_LEN: usize = 255;

/// 🔧 Where the stream lives and how greedily to read it.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct KinesisStreamConfig {
    pub stream_name: String,
    /// 🌎 Defaults to the job's source region when absent.
    #[serde(default)]
    pub region: Option<String>,
    /// 🧪 LocalStack and friends.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    /// 🏷️ Lease table name. Defaults to `DRPS3-KinesisApp-<stream_name>`.
    #[serde(default)]
    pub lease_table: Option<String>,
    /// 📦 `GetRecords` limit per call.
    #[serde(default = "default_batch_limit")]
    pub batch_limit: i32,
}

fn default_batch_limit() -> i32 {
    1000
}

impl KinesisStreamConfig {
    /// 🏷️ The lease table name actually used: the override, or the conventional one,
    /// cut down to what DynamoDB will accept.
    pub fn lease_table_name(&self) -> String {
        let the_name = self
            .lease_table
            .clone()
            .unwrap_or_else(|| format!("DRPS3-KinesisApp-{}", self.stream_name));
        the_name.chars().take(MAX_TABLE_NAME_LEN).collect()
    }
}

/// 🚀 One Kinesis client per config.
pub async fn kinesis_client(config: &KinesisStreamConfig, fallback_region: &str) -> aws_sdk_kinesis::Client {
    let the_region = config.region.as_deref().unwrap_or(fallback_region);
    let the_aws_config = load_aws_config(the_region, config.endpoint_url.as_deref()).await;
    aws_sdk_kinesis::Client::new(&the_aws_config)
}

// ============================================================
//  📤 producer
// ============================================================

/// 📤 Buffers records and ships them with `PutRecords`.
#[derive(Debug)]
pub struct KinesisProducer {
    client: aws_sdk_kinesis::Client,
    stream_name: String,
    buffer: Vec<(String, Bytes)>,
}

impl KinesisProducer {
    pub fn new(client: aws_sdk_kinesis::Client, stream_name: impl Into<String>) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
            buffer: Vec::with_capacity(MAX_PUT_RECORDS_BATCH),
        }
    }

    /// 📦 Send one batch, resending only what Kinesis rejected.
    async fn send_batch(&self, mut pending: Vec<(String, Bytes)>) -> Result<()> {
        for the_attempt in 1..=MAX_PUT_ATTEMPTS {
            let the_entries = pending
                .iter()
                .map(|(partition_key, data)| {
                    PutRecordsRequestEntry::builder()
                        .partition_key(partition_key)
                        .data(Blob::new(data.to_vec()))
                        .build()
                        .context("💀 Could not build a PutRecords entry. The builder has standards.")
                })
                .collect::<Result<Vec<_>>>()?;

            let the_response = self
                .client
                .put_records()
                .stream_name(&self.stream_name)
                .set_records(Some(the_entries))
                .send()
                .await
                .context(format!(
                    "💀 PutRecords to stream '{}' failed outright ({} records).",
                    self.stream_name,
                    pending.len()
                ))?;

            if the_response.failed_record_count().unwrap_or(0) == 0 {
                return Ok(());
            }

            pending = still_rejected(pending, the_response.records());
            warn!(
                "🐢 Kinesis rejected {} records on attempt {the_attempt}/{MAX_PUT_ATTEMPTS}. Resending.",
                pending.len()
            );
            tokio::time::sleep(Duration::from_millis(100 * u64::from(the_attempt))).await;
        }
        anyhow::bail!(
            "💀 {} records were still rejected by stream '{}' after {MAX_PUT_ATTEMPTS} attempts.",
            pending.len(),
            self.stream_name
        )
    }
}

/// 🔍 The entries to resend after a partially failed `PutRecords`. Results line up 1:1
/// with the request and an error code marks a reject. An entry with no result at all
/// is resent too; losing it silently would lose an object.
fn still_rejected(
    pending: Vec<(String, Bytes)>,
    results: &[PutRecordsResultEntry],
) -> Vec<(String, Bytes)> {
    pending
        .into_iter()
        .enumerate()
        .filter(|(idx, _)| {
            results
                .get(*idx)
                .is_none_or(|result| result.error_code().is_some())
        })
        .map(|(_, entry)| entry)
        .collect()
}

#[async_trait]
impl StreamProducer for KinesisProducer {
    async fn put_record(&mut self, partition_key: &str, data: Bytes) -> Result<()> {
        self.buffer.push((partition_key.to_string(), data));
        if self.buffer.len() >= MAX_PUT_RECORDS_BATCH {
            self.flush().await?;
        }
        Ok(())
    }

    async fn flush(&mut self) -> Result<()> {
        while !self.buffer.is_empty() {
            let the_take = self.buffer.len().min(MAX_PUT_RECORDS_BATCH);
            let the_batch: Vec<_> = self.buffer.drain(..the_take).collect();
            debug!("📤 PutRecords: {} records → '{}'", the_batch.len(), self.stream_name);
            self.send_batch(the_batch).await?;
        }
        Ok(())
    }
}

// ============================================================
//  📥 shard source & reader
// ============================================================

#[derive(Debug, Clone)]
pub struct KinesisShardSource {
    client: aws_sdk_kinesis::Client,
    stream_name: String,
    batch_limit: i32,
}

impl KinesisShardSource {
    pub fn new(client: aws_sdk_kinesis::Client, stream_name: impl Into<String>, batch_limit: i32) -> Self {
        Self {
            client,
            stream_name: stream_name.into(),
            batch_limit,
        }
    }

    async fn shard_iterator(&self, shard_id: &str, position: &ShardPosition) -> Result<Option<String>> {
        let the_request = self
            .client
            .get_shard_iterator()
            .stream_name(&self.stream_name)
            .shard_id(shard_id);
        let the_request = match position {
            ShardPosition::TrimHorizon => the_request.shard_iterator_type(ShardIteratorType::TrimHorizon),
            ShardPosition::After(sequence_number) => the_request
                .shard_iterator_type(ShardIteratorType::AfterSequenceNumber)
                .starting_sequence_number(sequence_number),
        };
        let the_response = the_request.send().await.context(format!(
            "💀 GetShardIterator failed for {shard_id} of '{}' at {:?}.",
            self.stream_name, position
        ))?;
        Ok(the_response.shard_iterator().map(str::to_string))
    }
}

#[async_trait]
impl ShardSource for KinesisShardSource {
    async fn list_shards(&self) -> Result<Vec<String>> {
        let mut the_shards = Vec::new();
        let mut the_next_token: Option<String> = None;
        loop {
            let the_request = self.client.list_shards();
            let the_request = match the_next_token.take() {
                Some(token) => the_request.next_token(token),
                None => the_request.stream_name(&self.stream_name),
            };
            let the_response = the_request
                .send()
                .await
                .context(format!("💀 ListShards failed for stream '{}'.", self.stream_name))?;
            the_shards.extend(
                the_response
                    .shards()
                    .iter()
                    .map(|shard| shard.shard_id().to_string()),
            );
            match the_response.next_token() {
                Some(token) => the_next_token = Some(token.to_string()),
                None => break,
            }
        }
        Ok(the_shards)
    }

    async fn open_shard(&self, shard_id: &str, position: ShardPosition) -> Result<ShardReaderBackend> {
        let the_iterator = self.shard_iterator(shard_id, &position).await?;
        Ok(ShardReaderBackend::Kinesis(KinesisShardReader {
            source: self.clone(),
            shard_id: shard_id.to_string(),
            iterator: the_iterator,
            last_sequence_number: match position {
                ShardPosition::After(sequence_number) => Some(sequence_number),
                ShardPosition::TrimHorizon => None,
            },
        }))
    }
}

/// 📖 Follows the iterator chain of one shard.
#[derive(Debug)]
pub struct KinesisShardReader {
    source: KinesisShardSource,
    shard_id: String,
    iterator: Option<String>,
    last_sequence_number: Option<String>,
}

#[async_trait]
impl ShardReader for KinesisShardReader {
    async fn next_batch(&mut self) -> Result<Option<Vec<StreamRecord>>> {
        let Some(the_iterator) = self.iterator.clone() else {
            return Ok(None);
        };

        let the_result = self
            .source
            .client
            .get_records()
            .shard_iterator(the_iterator)
            .limit(self.source.batch_limit)
            .send()
            .await;

        let the_response = match the_result {
            Ok(response) => response,
            Err(err)
                if err
                    .as_service_error()
                    .is_some_and(|service_err| service_err.is_expired_iterator_exception()) =>
            {
                // ⏰ iterators die after 5 minutes of neglect. reopen where we left off.
                warn!("⏰ Shard iterator for {} expired. Reopening.", self.shard_id);
                let the_position = ShardPosition::from_checkpoint(self.last_sequence_number.clone());
                self.iterator = self.source.shard_iterator(&self.shard_id, &the_position).await?;
                return Ok(Some(Vec::new()));
            }
            Err(err) => {
                return Err(err).context(format!(
                    "💀 GetRecords failed for {} of '{}'.",
                    self.shard_id, self.source.stream_name
                ));
            }
        };

        let the_records: Vec<StreamRecord> = the_response
            .records()
            .iter()
            .map(|record| StreamRecord {
                sequence_number: record.sequence_number().to_string(),
                partition_key: record.partition_key().to_string(),
                data: Bytes::copy_from_slice(record.data().as_ref()),
            })
            .collect();
        if let Some(last) = the_records.last() {
            self.last_sequence_number = Some(last.sequence_number.clone());
        }
        self.iterator = the_response.next_shard_iterator().map(str::to_string);

        if the_records.is_empty() && self.iterator.is_none() {
            return Ok(None);
        }
        Ok(Some(the_records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn the_one_where_the_lease_table_name_fits_in_dynamodb() {
        let config: KinesisStreamConfig = toml::from_str(r#"stream_name = "replication""#).expect("parse");
        assert_eq!(config.lease_table_name(), "DRPS3-KinesisApp-replication");
        assert_eq!(config.batch_limit, 1000);

        let long = KinesisStreamConfig {
            stream_name: "s".repeat(300),
            ..config
        };
        assert_eq!(long.lease_table_name().chars().count(), 255);
        assert!(long.lease_table_name().starts_with("DRPS3-KinesisApp-sss"));
    }

    fn accepted(sequence_number: &str) -> PutRecordsResultEntry {
        PutRecordsResultEntry::builder()
            .shard_id("shardId-000000000000")
            .sequence_number(sequence_number)
            .build()
    }

    fn rejected(code: &str) -> PutRecordsResultEntry {
        PutRecordsResultEntry::builder()
            .error_code(code)
            .error_message("Rate exceeded for shard shardId-000000000000")
            .build()
    }

    fn entries(keys: &[&str]) -> Vec<(String, Bytes)> {
        keys.iter()
            .map(|key| (key.to_string(), Bytes::from(format!("{{\"key\":\"{key}\"}}"))))
            .collect()
    }

    #[test]
    fn the_one_where_only_the_rejected_records_get_resent() {
        let the_results = [
            accepted("001"),
            rejected("ProvisionedThroughputExceededException"),
            accepted("003"),
            rejected("InternalFailure"),
        ];

        let resend = still_rejected(entries(&["a", "b", "c", "d"]), &the_results);

        let the_keys: Vec<&str> = resend.iter().map(|(key, _)| key.as_str()).collect();
        assert_eq!(the_keys, vec!["b", "d"]);
        assert_eq!(resend[0].1, Bytes::from(r#"{"key":"b"}"#));
    }

    #[test]
    fn the_one_where_a_missing_result_counts_as_a_reject() {
        let resend = still_rejected(entries(&["a", "b", "c"]), &[accepted("001")]);
        assert_eq!(resend, entries(&["b", "c"]));

        assert!(still_rejected(entries(&["a"]), &[accepted("001")]).is_empty());
    }
}
