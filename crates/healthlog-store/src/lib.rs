//! CSV codec + the two daily-log store adapters (remote sheet, local file).

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::NaiveDate;
use csv::{ReaderBuilder, StringRecord, WriterBuilder};
use healthlog_core::{
    coerce_count, coerce_float, coerce_text, parse_log_date, DailyRecord, COLUMNS,
};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

pub const CRATE_NAME: &str = "healthlog-store";

pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_DATA_FILE: &str = "./health_log.csv";

/// Structural store failures. Field-level malformations never surface
/// here; they degrade to defaults inside the codec.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("fetching sheet export: {0}")]
    Http(#[from] reqwest::Error),
    #[error("sheet export returned http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn io_error(path: &Path) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    }
}

/// Runtime configuration, environment-driven with defaults. A set
/// `HEALTHLOG_SHEET_URL` selects the remote read-only variant; otherwise
/// the process runs read-write against the local file.
#[derive(Debug, Clone)]
pub struct Config {
    pub sheet_url: Option<String>,
    pub data_file: PathBuf,
    pub cache_ttl: Duration,
    pub http_timeout: Duration,
    pub user_agent: String,
    pub web_port: u16,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            sheet_url: std::env::var("HEALTHLOG_SHEET_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            data_file: std::env::var("HEALTHLOG_DATA_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_DATA_FILE)),
            cache_ttl: std::env::var("HEALTHLOG_CACHE_TTL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_CACHE_TTL),
            http_timeout: std::env::var("HEALTHLOG_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or_else(|| Duration::from_secs(20)),
            user_agent: std::env::var("HEALTHLOG_USER_AGENT")
                .unwrap_or_else(|_| "healthlog/0.1".to_string()),
            web_port: std::env::var("HEALTHLOG_WEB_PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(8000),
        }
    }
}

/// Positions of the canonical columns in a source header row. `None`
/// means the source omits that column and every cell in it reads as
/// blank, which is how absent columns are synthesized before coercion.
#[derive(Debug, Default)]
struct ColumnMap {
    date: Option<usize>,
    weight_lbs: Option<usize>,
    surya_namaskar: Option<usize>,
    water_glasses: Option<usize>,
    fasting_hours: Option<usize>,
    breakfast: Option<usize>,
    lunch: Option<usize>,
    dinner: Option<usize>,
    snacks: Option<usize>,
    notes: Option<usize>,
}

impl ColumnMap {
    /// Header match is case- and whitespace-insensitive; unrecognized
    /// columns are ignored; the first occurrence of a name wins.
    fn from_headers(headers: &StringRecord) -> Self {
        let mut map = Self::default();
        for (pos, raw) in headers.iter().enumerate() {
            let slot = match raw.trim().to_ascii_lowercase().as_str() {
                "date" => &mut map.date,
                "weight_lbs" => &mut map.weight_lbs,
                "surya_namaskar" => &mut map.surya_namaskar,
                "water_glasses_8oz" => &mut map.water_glasses,
                "fasting_window_hours" => &mut map.fasting_hours,
                "breakfast" => &mut map.breakfast,
                "lunch" => &mut map.lunch,
                "dinner" => &mut map.dinner,
                "snacks" => &mut map.snacks,
                "notes" => &mut map.notes,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(pos);
            }
        }
        map
    }

    fn cell<'a>(&self, row: &'a StringRecord, slot: Option<usize>) -> Option<&'a str> {
        slot.and_then(|pos| row.get(pos))
    }
}

/// Parse a CSV export into the canonical collection, sorted ascending by
/// date. Rows with unparseable dates are dropped; every other per-field
/// malformation degrades to that field's default. Structural CSV failure
/// (bad quoting, invalid UTF-8) is an error.
pub fn parse_csv(text: &str) -> Result<Vec<DailyRecord>, StoreError> {
    let mut reader = ReaderBuilder::new().flexible(true).from_reader(text.as_bytes());
    let map = ColumnMap::from_headers(&reader.headers()?.clone());

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let Some(date) = map.cell(&row, map.date).and_then(parse_log_date) else {
            continue;
        };
        records.push(DailyRecord {
            date,
            weight_lbs: coerce_float(map.cell(&row, map.weight_lbs)),
            surya_namaskar: coerce_count(map.cell(&row, map.surya_namaskar), 0),
            water_glasses_8oz: coerce_count(map.cell(&row, map.water_glasses), 0),
            fasting_window_hours: coerce_count(map.cell(&row, map.fasting_hours), 0),
            breakfast: coerce_text(map.cell(&row, map.breakfast)),
            lunch: coerce_text(map.cell(&row, map.lunch)),
            dinner: coerce_text(map.cell(&row, map.dinner)),
            snacks: coerce_text(map.cell(&row, map.snacks)),
            notes: coerce_text(map.cell(&row, map.notes)),
        });
    }
    records.sort_by_key(|r| r.date);
    Ok(records)
}

/// Serialize a collection in canonical column order, dates as
/// `YYYY-MM-DD`, missing weights as blank cells.
pub fn write_csv(records: &[DailyRecord]) -> Result<String, StoreError> {
    let mut writer = WriterBuilder::new().from_writer(Vec::new());
    writer.write_record(COLUMNS)?;
    for r in records {
        writer.write_record(&[
            r.date.format("%Y-%m-%d").to_string(),
            r.weight_lbs.map(|w| w.to_string()).unwrap_or_default(),
            r.surya_namaskar.to_string(),
            r.water_glasses_8oz.to_string(),
            r.fasting_window_hours.to_string(),
            r.breakfast.clone(),
            r.lunch.clone(),
            r.dinner.clone(),
            r.snacks.clone(),
            r.notes.clone(),
        ])?;
    }
    let bytes = match writer.into_inner() {
        Ok(bytes) => bytes,
        // Unreachable for an in-memory buffer; kept as a plain error to
        // avoid a panic path in the write pipeline.
        Err(err) => {
            return Err(StoreError::Io {
                path: PathBuf::from("<csv buffer>"),
                source: std::io::Error::new(err.error().kind(), err.error().to_string()),
            })
        }
    };
    Ok(String::from_utf8(bytes).expect("csv writer emits utf-8"))
}

/// Insert-or-replace keyed by date. Full replace: any existing record for
/// the same date is dropped before the new one is appended, then the
/// collection re-sorts ascending.
pub fn upsert(mut records: Vec<DailyRecord>, record: DailyRecord) -> Vec<DailyRecord> {
    records.retain(|r| r.date != record.date);
    records.push(record);
    records.sort_by_key(|r| r.date);
    records
}

/// Remove the record for `date` if present. The bool distinguishes
/// "deleted" from "nothing to delete"; neither is an error.
pub fn delete(mut records: Vec<DailyRecord>, date: NaiveDate) -> (Vec<DailyRecord>, bool) {
    let before = records.len();
    records.retain(|r| r.date != date);
    let removed = records.len() < before;
    (records, removed)
}

/// Whether a cache entry of the given age is still servable under `ttl`.
pub fn cache_is_fresh(age: Duration, ttl: Duration) -> bool {
    age < ttl
}

#[derive(Debug, Clone)]
struct CacheEntry {
    fetched_at: Instant,
    records: Vec<DailyRecord>,
}

/// Read-only adapter over a published sheet CSV export. The parsed
/// collection is cached for a TTL window; repeated loads inside the
/// window do not re-fetch. There is no manual invalidation and no bypass.
#[derive(Debug)]
pub struct SheetSource {
    url: String,
    ttl: Duration,
    client: reqwest::Client,
    cache: Mutex<Option<CacheEntry>>,
}

impl SheetSource {
    pub fn new(url: impl Into<String>, config: &Config) -> Result<Self, StoreError> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .timeout(config.http_timeout)
            .user_agent(config.user_agent.clone())
            .build()?;
        Ok(Self {
            url: url.into(),
            ttl: config.cache_ttl,
            client,
            cache: Mutex::new(None),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Serve from cache inside the TTL window, otherwise fetch and
    /// refresh. Fetch and structural-parse failures propagate; there is
    /// no silent empty-collection fallback and no retry at this layer.
    pub async fn load(&self) -> Result<Vec<DailyRecord>, StoreError> {
        let mut cache = self.cache.lock().await;
        if let Some(entry) = cache.as_ref() {
            if cache_is_fresh(entry.fetched_at.elapsed(), self.ttl) {
                return Ok(entry.records.clone());
            }
        }

        let records = self.fetch().await?;
        *cache = Some(CacheEntry {
            fetched_at: Instant::now(),
            records: records.clone(),
        });
        Ok(records)
    }

    async fn fetch(&self) -> Result<Vec<DailyRecord>, StoreError> {
        let response = self.client.get(&self.url).send().await?;
        let status = response.status();
        let final_url = response.url().to_string();
        if !status.is_success() {
            return Err(StoreError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        let body = response.text().await?;
        let records = parse_csv(&body)?;
        debug!(url = %self.url, rows = records.len(), "refreshed sheet export");
        Ok(records)
    }
}

/// Read-write adapter over a local CSV file. Loads re-read the file on
/// every call; mutations only reach disk through an explicit
/// [`LocalStore::persist`], which always rewrites the whole file.
#[derive(Debug, Clone)]
pub struct LocalStore {
    path: PathBuf,
}

impl LocalStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file reads as an empty log. A present but structurally
    /// unparseable file is an error. Bad-date rows are excluded exactly
    /// as they are for the sheet source, so a hand-edited file degrades
    /// the same way.
    pub async fn load(&self) -> Result<Vec<DailyRecord>, StoreError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(io_error(&self.path)(err)),
        };
        parse_csv(&text)
    }

    /// Serialize the full collection and atomically replace the backing
    /// file via a temp-file rename, so a crash mid-write never leaves a
    /// truncated log behind.
    pub async fn persist(&self, records: &[DailyRecord]) -> Result<(), StoreError> {
        let text = write_csv(records)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).await.map_err(io_error(parent))?;
            }
        }

        let temp_path = self.path.with_extension("csv.tmp");
        let mut file = fs::File::create(&temp_path)
            .await
            .map_err(io_error(&temp_path))?;
        file.write_all(text.as_bytes())
            .await
            .map_err(io_error(&temp_path))?;
        file.flush().await.map_err(io_error(&temp_path))?;
        drop(file);

        fs::rename(&temp_path, &self.path)
            .await
            .map_err(io_error(&self.path))?;
        debug!(path = %self.path.display(), rows = records.len(), "persisted local log");
        Ok(())
    }
}

/// The configured store variant behind one loading surface.
#[derive(Debug)]
pub enum Store {
    Sheet(SheetSource),
    Local(LocalStore),
}

impl Store {
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        match &config.sheet_url {
            Some(url) => Ok(Self::Sheet(SheetSource::new(url.clone(), config)?)),
            None => Ok(Self::Local(LocalStore::new(config.data_file.clone()))),
        }
    }

    pub async fn load(&self) -> Result<Vec<DailyRecord>, StoreError> {
        match self {
            Self::Sheet(sheet) => sheet.load().await,
            Self::Local(local) => local.load().await,
        }
    }

    /// The sheet variant has no write path; callers gate editing on this.
    pub fn is_read_only(&self) -> bool {
        matches!(self, Self::Sheet(_))
    }

    pub fn as_local(&self) -> Option<&LocalStore> {
        match self {
            Self::Local(local) => Some(local),
            Self::Sheet(_) => None,
        }
    }
}
