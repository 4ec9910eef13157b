// AI
//! 📊 progress.rs — "Did it copy?" — every replication, every time, forever.
//!
//! 🚀 Two things live here: a spinner that counts objects while the scanner lists the
//! bucket, and a pile of lock-free counters the replicator bumps for every object it
//! touches. At the end, the counters become a table so comfy it has lumbar support.
//!
//! ⚠️  Warning: Watching the spinner will not make the bucket list faster.
//! S3 pages at its own pace. We've asked. It said no.
//!
//! 🦆 The duck has nothing to do with this module. It's just vibing.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use comfy_table::{Cell, CellAlignment, ContentArrangement, Table, presets::UTF8_FULL};
use indicatif::{ProgressBar, ProgressStyle};

// -- 📏 one mebibyte — not a megabyte, pedants. there's a difference and I will die on this hill.
const MIB: u64 = 1024 * 1024;
const GIB: u64 = 1024 * MIB;

/// 📦 Bytes → something a human can read without counting digits.
/// Because "1073741824 bytes" is a war crime in a UI.
pub(crate) fn format_bytes(bytes: u64) -> String {
    if bytes >= GIB {
        format!("{:.2} GiB", bytes as f64 / GIB as f64)
    } else if bytes >= MIB {
        format!("{:.2} MiB", bytes as f64 / MIB as f64)
    } else if bytes >= 1024 {
        format!("{:.2} KiB", bytes as f64 / 1024.0)
    } else {
        // -- 🐛 raw bytes mode. small objects need love too.
        format!("{} bytes", bytes)
    }
}

/// 🔢 Formats a number with commas for the 3 people in the audience who like readability.
/// "1000000 objects" → "1,000,000 objects" — you're welcome, eyes.
pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + s.len() / 3);
    for (i, c) in s.chars().enumerate() {
        if i > 0 && (s.len() - i) % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result
}

/// ⏱️ Formats a Duration into MM:SS or HH:MM:SS.
/// If it shows HH:MM:SS, you should probably call your mom. It's been a while.
pub(crate) fn format_duration(duration: Duration) -> String {
    let total_secs = duration.as_secs();
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    if hours > 0 {
        format!("{:02}:{:02}:{:02}", hours, minutes, seconds)
    } else {
        format!("{:02}:{:02}", minutes, seconds)
    }
}

#[derive(Debug, Default)]
struct Counters {
    copied_in_memory: AtomicU64,
    copied_multipart: AtomicU64,
    parts_uploaded: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    malformed: AtomicU64,
    bytes_copied: AtomicU64,
}

/// 📊 What happened to every object this process touched. Clone freely; every clone
/// bumps the same counters.
#[derive(Debug, Clone, Default)]
pub struct ReplicationStats {
    counters: Arc<Counters>,
}

/// 📸 A frozen copy of [`ReplicationStats`] at one instant.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub copied_in_memory: u64,
    pub copied_multipart: u64,
    pub parts_uploaded: u64,
    pub skipped: u64,
    pub failed: u64,
    pub malformed: u64,
    pub bytes_copied: u64,
}

impl ReplicationStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_in_memory(&self, bytes: u64) {
        self.counters.copied_in_memory.fetch_add(1, Ordering::Relaxed);
        self.counters.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_multipart(&self, parts: u64, bytes: u64) {
        self.counters.copied_multipart.fetch_add(1, Ordering::Relaxed);
        self.counters.parts_uploaded.fetch_add(parts, Ordering::Relaxed);
        self.counters.bytes_copied.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn record_skipped(&self) {
        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_failed(&self) {
        self.counters.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_malformed(&self) {
        self.counters.malformed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let c = &self.counters;
        StatsSnapshot {
            copied_in_memory: c.copied_in_memory.load(Ordering::Relaxed),
            copied_multipart: c.copied_multipart.load(Ordering::Relaxed),
            parts_uploaded: c.parts_uploaded.load(Ordering::Relaxed),
            skipped: c.skipped.load(Ordering::Relaxed),
            failed: c.failed.load(Ordering::Relaxed),
            malformed: c.malformed.load(Ordering::Relaxed),
            bytes_copied: c.bytes_copied.load(Ordering::Relaxed),
        }
    }
}

/// 🍽️ The end-of-run report card, as a table.
///
/// ```text
/// ┌──────────────────────┬──────────┐
/// │ copied (in memory)   │ 1,204    │
/// │ copied (multipart)   │ 12       │
/// │ ...                  │ ...      │
/// └──────────────────────┴──────────┘
/// ```
pub fn render_summary(snapshot: &StatsSnapshot, elapsed: Duration) -> String {
    let mut table = Table::new();
    table.load_preset(UTF8_FULL);
    table.set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["🪣 replication", "count"]);

    let rows = [
        ("copied (in memory)", format_number(snapshot.copied_in_memory)),
        (
            "copied (multipart)",
            format!(
                "{} ({} parts)",
                format_number(snapshot.copied_multipart),
                format_number(snapshot.parts_uploaded)
            ),
        ),
        ("skipped (too large)", format_number(snapshot.skipped)),
        ("failed", format_number(snapshot.failed)),
        ("malformed records", format_number(snapshot.malformed)),
        ("bytes copied", format_bytes(snapshot.bytes_copied)),
        ("elapsed", format_duration(elapsed)),
    ];
    for (label, value) in rows {
        table.add_row(vec![
            Cell::new(label),
            Cell::new(value).set_alignment(CellAlignment::Right),
        ]);
    }
    table.to_string()
}

/// 🌀 A spinner that counts objects as the scanner finds them. Clones share one spinner.
#[derive(Clone)]
pub(crate) struct ScanProgress {
    spinner: ProgressBar,
}

impl std::fmt::Debug for ScanProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // -- 🎭 ProgressBar is a diva and doesn't derive Debug
        f.debug_struct("ScanProgress")
            .field("position", &self.spinner.position())
            .finish()
    }
}

impl ScanProgress {
    pub(crate) fn new(bucket: &str) -> Self {
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::default_spinner()
                .template("{spinner:.cyan} {msg} [{elapsed_precise}] {pos} objects")
                // -- 🐛 hardcoded template, but we still don't unwrap in the hot path. fallback to plain.
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(format!("scanning s3://{bucket}"));
        spinner.enable_steady_tick(Duration::from_millis(120));
        Self { spinner }
    }

    pub(crate) fn advance(&self, objects: u64) {
        self.spinner.inc(objects);
    }

    pub(crate) fn finish(&self) {
        self.spinner.finish_with_message(format!(
            "scanned {} objects",
            format_number(self.spinner.position())
        ));
    }
}
