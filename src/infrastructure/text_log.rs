// Text log store - redundant append-only CSV files with hourly rotation and daily maintenance
use crate::domain::reading::{ChannelId, Reading, TextLogRecord, CELSIUS};
use crate::infrastructure::config::TextLogSettings;
use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Local, NaiveDate, NaiveDateTime, SecondsFormat};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

pub const HEADER: &str = "timestamp,channel,temperature,calibrated_temp,unit";

struct OpenHourFile {
    key: String,
    path: PathBuf,
    file: File,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Consolidated {
    pub date: NaiveDate,
    pub hourly_files: usize,
    pub records: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MaintenanceReport {
    pub consolidated: Vec<Consolidated>,
    pub removed_hourly: usize,
    pub removed_daily: usize,
    pub compressed: usize,
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TextLogStats {
    pub hourly_files: usize,
    pub daily_files: usize,
    pub compressed_files: usize,
    pub total_bytes: u64,
    pub oldest_date: Option<NaiveDate>,
    pub newest_date: Option<NaiveDate>,
}

/// On-disk layout under the root directory:
///
/// - `raw/{YYYY-MM-DD}_{HH}.txt`: one file per hour, appended as readings arrive
/// - `daily/{YYYY-MM-DD}.txt`: hourly files of a completed day merged in hour order
/// - `compressed/{YYYY-MM-DD}.txt.gz`: gzipped daily files past the compression age
/// - `exports/export_{YYYYMMDD}_{YYYYMMDD}.csv`
///
/// Every file starts with [`HEADER`]. Only one hourly file is open at a time.
/// Appends, maintenance, queries and exports all run under the writer lock.
pub struct TextLogStore {
    raw_dir: PathBuf,
    daily_dir: PathBuf,
    compressed_dir: PathBuf,
    exports_dir: PathBuf,
    settings: TextLogSettings,
    writer: Mutex<Option<OpenHourFile>>,
}

impl TextLogStore {
    pub fn open(root: &Path, settings: TextLogSettings) -> Result<Self> {
        let store = Self {
            raw_dir: root.join("raw"),
            daily_dir: root.join("daily"),
            compressed_dir: root.join("compressed"),
            exports_dir: root.join("exports"),
            settings,
            writer: Mutex::new(None),
        };
        for dir in [&store.raw_dir, &store.daily_dir, &store.compressed_dir, &store.exports_dir] {
            fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
        }
        Ok(store)
    }

    pub fn append(&self, reading: &Reading) -> Result<()> {
        let record = TextLogRecord::from(reading);
        let key = reading.timestamp.format("%Y-%m-%d_%H").to_string();

        let mut writer = self.writer.lock();
        if writer.as_ref().map(|open| open.key.as_str()) != Some(key.as_str()) {
            // hour rollover closes the previous handle
            *writer = None;
            *writer = Some(self.open_hour_file(key)?);
        }

        let Some(open) = writer.as_mut() else {
            anyhow::bail!("Text log writer has no open file");
        };
        let result = open
            .file
            .write_all(format_line(&record).as_bytes())
            .and_then(|_| open.file.flush())
            .with_context(|| format!("Failed to append to {}", open.path.display()));
        if result.is_err() {
            // reopen on the next append
            *writer = None;
        }
        result
    }

    fn open_hour_file(&self, key: String) -> Result<OpenHourFile> {
        let path = self.raw_dir.join(format!("{}.txt", key));
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open {}", path.display()))?;

        let len = file.metadata().map(|m| m.len()).unwrap_or(0);
        if len == 0 {
            writeln!(file, "{}", HEADER)
                .with_context(|| format!("Failed to write header to {}", path.display()))?;
        }

        tracing::debug!(file = %path.display(), "Opened hourly text log");
        Ok(OpenHourFile { key, path, file })
    }

    pub fn close(&self) {
        if let Some(open) = self.writer.lock().take() {
            tracing::debug!(file = %open.path.display(), "Closed hourly text log");
        }
    }

    pub fn current_file(&self) -> Option<PathBuf> {
        self.writer.lock().as_ref().map(|open| open.path.clone())
    }

    pub fn hourly_path(&self, date: NaiveDate, hour: u32) -> PathBuf {
        self.raw_dir.join(format!("{}_{:02}.txt", date.format("%Y-%m-%d"), hour))
    }

    pub fn daily_path(&self, date: NaiveDate) -> PathBuf {
        self.daily_dir.join(daily_name(date))
    }

    pub fn compressed_path(&self, date: NaiveDate) -> PathBuf {
        self.compressed_dir.join(format!("{}.gz", daily_name(date)))
    }

    /// Merges one day's hourly files into its daily file, in hour order.
    ///
    /// Returns `None` when the day has no hourly files.
    pub fn consolidate_day(&self, date: NaiveDate) -> Result<Option<Consolidated>> {
        let mut writer = self.writer.lock();
        self.merge_day(&mut writer, date)
    }

    /// Consolidates every day before `today` that has hourly files and either
    /// no daily file or hourly files written after it. Archived days are skipped.
    pub fn consolidate_completed_days(&self, today: NaiveDate) -> Result<Vec<Consolidated>> {
        let mut writer = self.writer.lock();
        let days: BTreeSet<NaiveDate> = list_files(&self.raw_dir)?
            .iter()
            .filter_map(|path| file_name(path).and_then(parse_hourly_name))
            .map(|ts| ts.date())
            .filter(|date| *date < today)
            .collect();

        let mut consolidated = Vec::new();
        for date in days {
            if self.compressed_path(date).exists() || self.daily_is_current(date)? {
                continue;
            }
            if let Some(summary) = self.merge_day(&mut writer, date)? {
                consolidated.push(summary);
            }
        }
        Ok(consolidated)
    }

    fn merge_day(&self, writer: &mut Option<OpenHourFile>, date: NaiveDate) -> Result<Option<Consolidated>> {
        let day_prefix = date.format("%Y-%m-%d_").to_string();
        if writer.as_ref().is_some_and(|open| open.key.starts_with(&day_prefix)) {
            *writer = None;
        }

        let hourly: Vec<PathBuf> = (0..24)
            .map(|hour| self.hourly_path(date, hour))
            .filter(|path| path.exists())
            .collect();
        if hourly.is_empty() {
            return Ok(None);
        }

        let target = self.daily_path(date);
        let tmp = target.with_extension("txt.tmp");
        let mut out = String::new();
        out.push_str(HEADER);
        out.push('\n');

        let mut records = 0;
        for path in &hourly {
            let content = fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;
            for line in content.lines() {
                if line.starts_with("timestamp,") || line.split(',').count() < 4 {
                    continue;
                }
                out.push_str(line);
                out.push('\n');
                records += 1;
            }
        }

        fs::write(&tmp, out).with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &target)
            .with_context(|| format!("Failed to replace {}", target.display()))?;

        tracing::info!(date = %date, files = hourly.len(), records, "Consolidated daily text log");
        Ok(Some(Consolidated {
            date,
            hourly_files: hourly.len(),
            records,
        }))
    }

    /// True when the daily file exists and no hourly file of that day was
    /// modified after it.
    fn daily_is_current(&self, date: NaiveDate) -> Result<bool> {
        let daily = self.daily_path(date);
        if !daily.exists() {
            return Ok(false);
        }
        let merged_at = fs::metadata(&daily)
            .and_then(|m| m.modified())
            .with_context(|| format!("Failed to stat {}", daily.display()))?;

        for hour in 0..24 {
            let path = self.hourly_path(date, hour);
            let Ok(modified) = fs::metadata(&path).and_then(|m| m.modified()) else {
                continue;
            };
            if modified > merged_at {
                tracing::info!(file = %path.display(), "Hourly text log changed after consolidation");
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Deletes hourly files older than the hourly retention window. Files whose
    /// names do not parse are left alone.
    pub fn cleanup_hourly(&self, now: DateTime<Local>) -> Result<usize> {
        let mut writer = self.writer.lock();
        let cutoff = now.naive_local() - Duration::hours(self.settings.hourly_retention_hours);
        let mut removed = 0;
        for path in list_files(&self.raw_dir)? {
            let Some(started) = file_name(&path).and_then(parse_hourly_name) else {
                continue;
            };
            if started < cutoff {
                if writer.as_ref().is_some_and(|open| open.path == path) {
                    *writer = None;
                }
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                tracing::debug!(file = %path.display(), "Removed expired hourly text log");
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn cleanup_daily(&self, now: DateTime<Local>) -> Result<usize> {
        let _writer = self.writer.lock();
        let today = now.date_naive();
        let mut removed = 0;
        for path in list_files(&self.daily_dir)? {
            let Some(date) = file_name(&path).and_then(parse_daily_name) else {
                continue;
            };
            if (today - date).num_days() > self.settings.daily_retention_days {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
                tracing::debug!(file = %path.display(), "Removed expired daily text log");
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Gzips daily files past the compression age. The plain file is removed only
    /// once the archive has been written and synced.
    pub fn compress(&self, now: DateTime<Local>) -> Result<usize> {
        let _writer = self.writer.lock();
        let threshold = now.naive_local() - Duration::days(self.settings.compress_after_days);
        let mut compressed = 0;
        for path in list_files(&self.daily_dir)? {
            let Some(date) = file_name(&path).and_then(parse_daily_name) else {
                continue;
            };
            if date.and_time(chrono::NaiveTime::MIN) >= threshold {
                continue;
            }

            let target = self.compressed_path(date);
            let tmp = target.with_extension("gz.tmp");
            let mut source =
                File::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
            let out = File::create(&tmp).with_context(|| format!("Failed to create {}", tmp.display()))?;
            let mut encoder = GzEncoder::new(out, Compression::default());
            std::io::copy(&mut source, &mut encoder)
                .with_context(|| format!("Failed to compress {}", path.display()))?;
            let out = encoder.finish().context("Failed to finish gzip stream")?;
            out.sync_all().context("Failed to sync compressed file")?;
            fs::rename(&tmp, &target)
                .with_context(|| format!("Failed to replace {}", target.display()))?;
            fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;

            tracing::info!(file = %target.display(), "Compressed daily text log");
            compressed += 1;
        }
        Ok(compressed)
    }

    /// Consolidate, cleanup, then compress. A failing step is logged and recorded
    /// in the report; the remaining steps still run.
    pub fn run_maintenance(&self, now: DateTime<Local>) -> MaintenanceReport {
        let mut report = MaintenanceReport::default();

        match self.consolidate_completed_days(now.date_naive()) {
            Ok(consolidated) => report.consolidated = consolidated,
            Err(e) => record_failure(&mut report, "consolidate", e),
        }
        match self.cleanup_hourly(now) {
            Ok(removed) => report.removed_hourly = removed,
            Err(e) => record_failure(&mut report, "cleanup hourly", e),
        }
        match self.cleanup_daily(now) {
            Ok(removed) => report.removed_daily = removed,
            Err(e) => record_failure(&mut report, "cleanup daily", e),
        }
        match self.compress(now) {
            Ok(compressed) => report.compressed = compressed,
            Err(e) => record_failure(&mut report, "compress", e),
        }

        report
    }

    /// Records between `start` and `end` inclusive, ascending by timestamp.
    ///
    /// Each day is read from its daily file, else its archive, else its hourly
    /// files. Malformed rows are skipped.
    pub fn query_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<TextLogRecord>> {
        let _writer = self.writer.lock();
        self.read_range(start, end, channel)
    }

    fn read_range(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
    ) -> Result<Vec<TextLogRecord>> {
        let mut records = Vec::new();
        let mut day = start.date_naive();
        let last_day = end.date_naive();

        while day <= last_day {
            let daily = self.daily_path(day);
            let archive = self.compressed_path(day);
            if daily.exists() {
                collect_records(&fs::read_to_string(&daily)?, start, end, channel, &mut records);
            } else if archive.exists() {
                let mut content = String::new();
                GzDecoder::new(File::open(&archive)?)
                    .read_to_string(&mut content)
                    .with_context(|| format!("Failed to decompress {}", archive.display()))?;
                collect_records(&content, start, end, channel, &mut records);
            } else {
                for hour in 0..24 {
                    let path = self.hourly_path(day, hour);
                    if path.exists() {
                        collect_records(&fs::read_to_string(&path)?, start, end, channel, &mut records);
                    }
                }
            }

            match day.succ_opt() {
                Some(next) => day = next,
                None => break,
            }
        }

        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    pub fn export_csv(
        &self,
        start: DateTime<Local>,
        end: DateTime<Local>,
        channel: Option<ChannelId>,
        include_raw: bool,
    ) -> Result<PathBuf> {
        let _writer = self.writer.lock();
        let records = self.read_range(start, end, channel)?;
        let path = self.exports_dir.join(format!(
            "export_{}_{}.csv",
            start.format("%Y%m%d"),
            end.format("%Y%m%d")
        ));

        let mut out = String::from(if include_raw {
            "timestamp,channel,raw_temp,calibrated_temp,unit\n"
        } else {
            "timestamp,channel,calibrated_temp,unit\n"
        });
        for record in &records {
            let ts = record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false);
            if include_raw {
                out.push_str(&format!(
                    "{},{},{},{},{}\n",
                    ts, record.channel, record.raw_temperature, record.calibrated_temperature, record.unit
                ));
            } else {
                out.push_str(&format!(
                    "{},{},{},{}\n",
                    ts, record.channel, record.calibrated_temperature, record.unit
                ));
            }
        }

        fs::write(&path, out).with_context(|| format!("Failed to write {}", path.display()))?;
        tracing::info!(file = %path.display(), records = records.len(), "Generated CSV export");
        Ok(path)
    }

    pub fn stats(&self) -> Result<TextLogStats> {
        let hourly = list_files(&self.raw_dir)?;
        let daily = list_files(&self.daily_dir)?;
        let compressed = list_files(&self.compressed_dir)?;

        let total_bytes = hourly
            .iter()
            .chain(&daily)
            .chain(&compressed)
            .filter_map(|path| fs::metadata(path).ok())
            .map(|m| m.len())
            .sum();

        let dates: Vec<NaiveDate> = hourly
            .iter()
            .filter_map(|p| file_name(p).and_then(parse_hourly_name).map(|ts| ts.date()))
            .chain(daily.iter().filter_map(|p| file_name(p).and_then(parse_daily_name)))
            .chain(compressed.iter().filter_map(|p| file_name(p).and_then(parse_compressed_name)))
            .collect();

        Ok(TextLogStats {
            hourly_files: hourly.iter().filter(|p| has_suffix(p, ".txt")).count(),
            daily_files: daily.iter().filter(|p| has_suffix(p, ".txt")).count(),
            compressed_files: compressed.iter().filter(|p| has_suffix(p, ".txt.gz")).count(),
            total_bytes,
            oldest_date: dates.iter().min().copied(),
            newest_date: dates.iter().max().copied(),
        })
    }

    /// Removes every hourly, daily and compressed file. Exports are kept.
    pub fn clear(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        *writer = None;
        for dir in [&self.raw_dir, &self.daily_dir, &self.compressed_dir] {
            for path in list_files(dir)? {
                fs::remove_file(&path).with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        tracing::info!("Cleared text log");
        Ok(())
    }
}

fn record_failure(report: &mut MaintenanceReport, step: &str, error: anyhow::Error) {
    tracing::warn!(step, error = %format!("{:#}", error), "Text log maintenance step failed");
    report.errors.push(format!("{}: {:#}", step, error));
}

fn format_line(record: &TextLogRecord) -> String {
    format!(
        "{},{},{:.3},{:.3},{}\n",
        record.timestamp.to_rfc3339_opts(SecondsFormat::Millis, false),
        record.channel,
        record.raw_temperature,
        record.calibrated_temperature,
        record.unit
    )
}

fn parse_line(line: &str) -> Option<TextLogRecord> {
    let mut fields = line.split(',').map(str::trim);
    let timestamp = DateTime::parse_from_rfc3339(fields.next()?).ok()?.with_timezone(&Local);
    let channel = fields.next()?.parse().ok()?;
    let raw_temperature = fields.next()?.parse().ok()?;
    let calibrated_temperature = fields.next()?.parse().ok()?;
    let unit = fields
        .next()
        .filter(|u| !u.is_empty())
        .unwrap_or(CELSIUS)
        .to_string();

    Some(TextLogRecord {
        timestamp,
        channel,
        raw_temperature,
        calibrated_temperature,
        unit,
    })
}

fn collect_records(
    content: &str,
    start: DateTime<Local>,
    end: DateTime<Local>,
    channel: Option<ChannelId>,
    out: &mut Vec<TextLogRecord>,
) {
    out.extend(
        content
            .lines()
            .filter_map(parse_line)
            .filter(|r| r.timestamp >= start && r.timestamp <= end)
            .filter(|r| channel.is_none_or(|ch| r.channel == ch)),
    );
}

fn daily_name(date: NaiveDate) -> String {
    format!("{}.txt", date.format("%Y-%m-%d"))
}

/// `2024-01-15_10.txt` -> 2024-01-15 10:00
fn parse_hourly_name(name: &str) -> Option<NaiveDateTime> {
    let stem = name.strip_suffix(".txt")?;
    let (date, hour) = stem.split_once('_')?;
    let date = NaiveDate::parse_from_str(date, "%Y-%m-%d").ok()?;
    if hour.len() != 2 {
        return None;
    }
    date.and_hms_opt(hour.parse().ok()?, 0, 0)
}

fn parse_daily_name(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name.strip_suffix(".txt")?, "%Y-%m-%d").ok()
}

fn parse_compressed_name(name: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(name.strip_suffix(".txt.gz")?, "%Y-%m-%d").ok()
}

fn file_name(path: &Path) -> Option<&str> {
    path.file_name().and_then(|n| n.to_str())
}

fn has_suffix(path: &Path, suffix: &str) -> bool {
    file_name(path).is_some_and(|n| n.ends_with(suffix))
}

fn list_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("Failed to list {}", dir.display()))? {
        let path = entry?.path();
        if path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}
