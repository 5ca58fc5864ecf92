#![forbid(unsafe_code)]

use std::fmt::Write as _;
use std::path::Path;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

const LAST_RUN_FILE: &str = "lx_migrate_last_run.txt";

#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct MigrationSummary {
    pub anchors_total: usize,
    pub anchors_migrated: usize,
    pub anchors_skipped: usize,
    pub messages_created: usize,
    pub messages_skipped: usize,
    pub messages_failed: usize,
    pub snapshots_created: usize,
    pub snapshots_skipped: usize,
    pub snapshots_failed: usize,
}

impl MigrationSummary {
    pub fn render(&self, dry_run: bool) -> String {
        let mut out = String::new();
        let verb = if dry_run { "would migrate" } else { "migrated" };
        let _ = writeln!(
            out,
            "anchors: {} total, {} {verb}, {} skipped",
            self.anchors_total, self.anchors_migrated, self.anchors_skipped
        );
        let _ = writeln!(
            out,
            "messages: {} created, {} already present, {} failed",
            self.messages_created, self.messages_skipped, self.messages_failed
        );
        let _ = writeln!(
            out,
            "snapshots: {} created, {} already present, {} failed",
            self.snapshots_created, self.snapshots_skipped, self.snapshots_failed
        );
        out
    }
}

/// Best-effort mirror of the run summary next to the database, so the last
/// outcome survives a scrolled-away terminal. Never fails the run.
pub(crate) fn write_last_run(storage_dir: &Path, rendered: &str, dry_run: bool) {
    let mut out = String::new();
    let _ = writeln!(out, "ts={}", ts_ms_to_rfc3339(now_ms()));
    let _ = writeln!(out, "pid={}", std::process::id());
    let _ = writeln!(out, "dry_run={dry_run}");
    out.push_str(rendered);
    let _ = std::fs::write(storage_dir.join(LAST_RUN_FILE), out);
}

pub(crate) fn now_ms() -> i64 {
    let nanos = OffsetDateTime::now_utc().unix_timestamp_nanos();
    let ms = nanos / 1_000_000i128;
    if ms <= 0 {
        0
    } else if ms >= i64::MAX as i128 {
        i64::MAX
    } else {
        ms as i64
    }
}

pub(crate) fn ts_ms_to_rfc3339(ts_ms: i64) -> String {
    let nanos = (ts_ms as i128) * 1_000_000i128;
    let dt = OffsetDateTime::from_unix_timestamp_nanos(nanos).unwrap_or(OffsetDateTime::UNIX_EPOCH);
    dt.format(&Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}
