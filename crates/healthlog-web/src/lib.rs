//! Axum + Askama dashboard over the daily-log store.

use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Path as AxumPath, Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
    Form, Json, Router,
};
use chrono::{Local, NaiveDate};
use healthlog_core::{
    coerce_count, coerce_float, earliest, filter_by_date_range, latest, parse_log_date,
    DailyRecord, Summary,
};
use healthlog_store::{delete, upsert, write_csv, Config, Store};
use serde::Deserialize;
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "healthlog-web";

/// Fixed attachment name for the filtered-range download.
pub const EXPORT_FILE_NAME: &str = "health_log_filtered.csv";

const APP_CSS: &str = include_str!("../assets/app.css");

#[derive(Clone)]
pub struct AppState {
    store: Arc<Store>,
}

impl AppState {
    pub fn new(store: Store) -> Self {
        Self {
            store: Arc::new(store),
        }
    }
}

/// Date-range filter, carried as raw strings so a blank or malformed
/// bound falls back to the collection's own extent instead of erroring.
#[derive(Debug, Deserialize, Default)]
struct RangeQuery {
    #[serde(default)]
    start: Option<String>,
    #[serde(default)]
    end: Option<String>,
}

impl RangeQuery {
    fn resolve(&self, records: &[DailyRecord]) -> Option<(NaiveDate, NaiveDate)> {
        let first = earliest(records)?.date;
        let last = latest(records)?.date;
        let start = self
            .start
            .as_deref()
            .and_then(parse_log_date)
            .unwrap_or(first);
        let end = self.end.as_deref().and_then(parse_log_date).unwrap_or(last);
        Some((start, end))
    }
}

#[derive(Debug, Clone)]
struct EntryRow {
    date: String,
    weight: String,
    surya: u32,
    water: u32,
    fasting: u32,
    breakfast: String,
    lunch: String,
    dinner: String,
    snacks: String,
    notes: String,
}

/// Table rows, newest first for display.
fn entry_rows(records: &[DailyRecord]) -> Vec<EntryRow> {
    records
        .iter()
        .rev()
        .map(|r| EntryRow {
            date: r.date.format("%Y-%m-%d").to_string(),
            weight: r
                .weight_lbs
                .map(|w| format!("{w:.1}"))
                .unwrap_or_else(|| "\u{2014}".to_string()),
            surya: r.surya_namaskar,
            water: r.water_glasses_8oz,
            fasting: r.fasting_window_hours,
            breakfast: r.breakfast.clone(),
            lunch: r.lunch.clone(),
            dinner: r.dinner.clone(),
            snacks: r.snacks.clone(),
            notes: r.notes.clone(),
        })
        .collect()
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    entries: usize,
    latest_weight: String,
    weight_delta: String,
    latest_surya: String,
    latest_water: String,
    start: String,
    end: String,
    showing: usize,
    read_only: bool,
    rows: Vec<EntryRow>,
}

#[derive(Template)]
#[template(path = "entries_table_partial.html")]
struct EntriesTablePartialTemplate {
    showing: usize,
    start: String,
    end: String,
    rows: Vec<EntryRow>,
}

#[derive(Template)]
#[template(path = "log_form.html")]
struct LogFormTemplate {
    date: String,
    existing: bool,
    weight: String,
    surya: u32,
    water: u32,
    fasting: u32,
    breakfast: String,
    lunch: String,
    dinner: String,
    snacks: String,
    notes: String,
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/entries/table", get(entries_table_handler))
        .route("/charts/{metric}", get(chart_handler))
        .route("/export", get(export_handler))
        .route("/log", get(log_form_handler).post(log_submit_handler))
        .route("/log/delete", post(log_delete_handler))
        .route("/assets/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    serve(Config::from_env()).await
}

pub async fn serve(config: Config) -> anyhow::Result<()> {
    let store = Store::from_config(&config)?;
    tracing::info!(
        port = config.web_port,
        read_only = store.is_read_only(),
        "serving daily health log dashboard"
    );
    let listener = TcpListener::bind(("0.0.0.0", config.web_port)).await?;
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

async fn index_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let records = match state.store.load().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };
    let summary = Summary::of(&records);
    let (filtered, start, end) = filtered_range(&records, &query);

    render_html(IndexTemplate {
        entries: summary.entries,
        latest_weight: summary
            .latest_weight_lbs
            .map(|w| format!("{w:.1} lbs"))
            .unwrap_or_else(|| "\u{2014}".to_string()),
        weight_delta: summary
            .weight_delta_lbs
            .map(|d| format!("{d:+.1} lbs"))
            .unwrap_or_else(|| "add weight to track".to_string()),
        latest_surya: summary
            .latest_surya_namaskar
            .map(|n| n.to_string())
            .unwrap_or_else(|| "\u{2014}".to_string()),
        latest_water: summary
            .latest_water_glasses
            .map(|n| format!("{n} glasses"))
            .unwrap_or_else(|| "\u{2014}".to_string()),
        start,
        end,
        showing: filtered.len(),
        read_only: state.store.is_read_only(),
        rows: entry_rows(&filtered),
    })
}

async fn entries_table_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let records = match state.store.load().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };
    let (filtered, start, end) = filtered_range(&records, &query);
    render_html(EntriesTablePartialTemplate {
        showing: filtered.len(),
        start,
        end,
        rows: entry_rows(&filtered),
    })
}

async fn chart_handler(
    State(state): State<Arc<AppState>>,
    AxumPath(metric): AxumPath<String>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let records = match state.store.load().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };
    let (filtered, _, _) = filtered_range(&records, &query);

    let (title, y_label, points): (&str, &str, Vec<(String, f64)>) = match metric.as_str() {
        // Weight drops missing measurements instead of charting them as
        // zero; the other metrics always carry a value.
        "weight" => (
            "Weight (lbs) over time",
            "lbs",
            filtered
                .iter()
                .filter_map(|r| r.weight_lbs.map(|w| (r.date.to_string(), w)))
                .collect(),
        ),
        "surya" => (
            "Surya Namaskar (count) over time",
            "count",
            metric_series(&filtered, |r| f64::from(r.surya_namaskar)),
        ),
        "water" => (
            "Water (8oz glasses) over time",
            "glasses",
            metric_series(&filtered, |r| f64::from(r.water_glasses_8oz)),
        ),
        "fasting" => (
            "Fasting window (hours) over time",
            "hours",
            metric_series(&filtered, |r| f64::from(r.fasting_window_hours)),
        ),
        _ => {
            return (StatusCode::NOT_FOUND, Html("Unknown metric".to_string())).into_response()
        }
    };

    let (x, y): (Vec<String>, Vec<f64>) = points.into_iter().unzip();
    Json(serde_json::json!({
        "insufficient": y.len() < 2,
        "data": [{
            "type": "scatter",
            "mode": "lines+markers",
            "x": x,
            "y": y,
            "marker": {"color": "#0ea5e9"}
        }],
        "layout": {
            "title": title,
            "xaxis": {"title": "Date"},
            "yaxis": {"title": y_label},
            "paper_bgcolor": "#ffffff",
            "plot_bgcolor": "#f8fafc"
        }
    }))
    .into_response()
}

async fn export_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<RangeQuery>,
) -> Response {
    let records = match state.store.load().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };
    let (filtered, _, _) = filtered_range(&records, &query);
    let csv_text = match write_csv(&filtered) {
        Ok(text) => text,
        Err(err) => return server_error(err.into()),
    };
    (
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8".to_string()),
            (
                header::CONTENT_DISPOSITION,
                format!("attachment; filename=\"{EXPORT_FILE_NAME}\""),
            ),
        ],
        csv_text,
    )
        .into_response()
}

async fn log_form_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<LogDateQuery>,
) -> Response {
    if state.store.is_read_only() {
        return read_only_rejection();
    }
    let records = match state.store.load().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };

    let date = query
        .date
        .as_deref()
        .and_then(parse_log_date)
        .unwrap_or_else(|| Local::now().date_naive());
    let existing = records.iter().find(|r| r.date == date);

    let prefill = existing.cloned().unwrap_or_else(|| DailyRecord::empty(date));
    render_html(LogFormTemplate {
        date: date.format("%Y-%m-%d").to_string(),
        existing: existing.is_some(),
        weight: prefill
            .weight_lbs
            .map(|w| w.to_string())
            .unwrap_or_default(),
        surya: prefill.surya_namaskar,
        water: prefill.water_glasses_8oz,
        fasting: prefill.fasting_window_hours,
        breakfast: prefill.breakfast,
        lunch: prefill.lunch,
        dinner: prefill.dinner,
        snacks: prefill.snacks,
        notes: prefill.notes,
    })
}

#[derive(Debug, Deserialize, Default)]
struct LogDateQuery {
    #[serde(default)]
    date: Option<String>,
}

#[derive(Debug, Deserialize)]
struct LogForm {
    date: String,
    #[serde(default)]
    weight_lbs: String,
    #[serde(default)]
    surya_namaskar: String,
    #[serde(default)]
    water_glasses_8oz: String,
    #[serde(default)]
    fasting_window_hours: String,
    #[serde(default)]
    breakfast: String,
    #[serde(default)]
    lunch: String,
    #[serde(default)]
    dinner: String,
    #[serde(default)]
    snacks: String,
    #[serde(default)]
    notes: String,
}

/// Form-layer validation: text fields are trimmed here, counts bottom out
/// at zero through coercion, and the fasting window is capped at 24.
fn record_from_form(form: &LogForm) -> Option<DailyRecord> {
    let date = parse_log_date(&form.date)?;
    Some(DailyRecord {
        date,
        weight_lbs: coerce_float(Some(&form.weight_lbs)),
        surya_namaskar: coerce_count(Some(&form.surya_namaskar), 0),
        water_glasses_8oz: coerce_count(Some(&form.water_glasses_8oz), 0),
        fasting_window_hours: coerce_count(Some(&form.fasting_window_hours), 0).min(24),
        breakfast: form.breakfast.trim().to_string(),
        lunch: form.lunch.trim().to_string(),
        dinner: form.dinner.trim().to_string(),
        snacks: form.snacks.trim().to_string(),
        notes: form.notes.trim().to_string(),
    })
}

async fn log_submit_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<LogForm>,
) -> Response {
    let Some(local) = state.store.as_local() else {
        return read_only_rejection();
    };
    let Some(record) = record_from_form(&form) else {
        return unprocessable_date(&form.date);
    };

    let records = match local.load().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };
    let records = upsert(records, record);
    match local.persist(&records).await {
        Ok(()) => Redirect::to("/").into_response(),
        Err(err) => server_error(err.into()),
    }
}

#[derive(Debug, Deserialize)]
struct DeleteForm {
    date: String,
}

async fn log_delete_handler(
    State(state): State<Arc<AppState>>,
    Form(form): Form<DeleteForm>,
) -> Response {
    let Some(local) = state.store.as_local() else {
        return read_only_rejection();
    };
    let Some(date) = parse_log_date(&form.date) else {
        return unprocessable_date(&form.date);
    };

    let records = match local.load().await {
        Ok(records) => records,
        Err(err) => return server_error(err.into()),
    };
    let (records, removed) = delete(records, date);
    if !removed {
        return Redirect::to("/").into_response();
    }
    match local.persist(&records).await {
        Ok(()) => Redirect::to("/").into_response(),
        Err(err) => server_error(err.into()),
    }
}

async fn app_css_handler() -> Response {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], APP_CSS).into_response()
}

fn filtered_range(
    records: &[DailyRecord],
    query: &RangeQuery,
) -> (Vec<DailyRecord>, String, String) {
    match query.resolve(records) {
        Some((start, end)) => (
            filter_by_date_range(records, start, end),
            start.format("%Y-%m-%d").to_string(),
            end.format("%Y-%m-%d").to_string(),
        ),
        None => (Vec::new(), String::new(), String::new()),
    }
}

fn metric_series(records: &[DailyRecord], value: impl Fn(&DailyRecord) -> f64) -> Vec<(String, f64)> {
    records
        .iter()
        .map(|r| (r.date.to_string(), value(r)))
        .collect()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

fn read_only_rejection() -> Response {
    (
        StatusCode::CONFLICT,
        Html(
            "This dashboard is read-only: data comes from the published sheet. \
             Update the sheet directly."
                .to_string(),
        ),
    )
        .into_response()
}

fn unprocessable_date(raw: &str) -> Response {
    (
        StatusCode::UNPROCESSABLE_ENTITY,
        Html(format!("Unrecognized date: {raw}")),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tempfile::TempDir;
    use tower::ServiceExt;

    fn local_config(dir: &TempDir) -> Config {
        Config {
            sheet_url: None,
            data_file: dir.path().join("health_log.csv"),
            cache_ttl: Duration::from_secs(300),
            http_timeout: Duration::from_secs(20),
            user_agent: "healthlog-test".to_string(),
            web_port: 0,
        }
    }

    fn local_app(dir: &TempDir) -> Router {
        let store = Store::from_config(&local_config(dir)).expect("store");
        app(AppState::new(store))
    }

    fn sheet_app() -> Router {
        let config = Config {
            sheet_url: Some("http://localhost:9/export.csv".to_string()),
            ..local_config(&TempDir::new().expect("tempdir"))
        };
        let store = Store::from_config(&config).expect("store");
        app(AppState::new(store))
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.expect("body").to_bytes();
        String::from_utf8(bytes.to_vec()).expect("utf-8 body")
    }

    fn get(uri: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .expect("request")
    }

    fn post_form(uri: &str, body: &str) -> axum::http::Request<Body> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .expect("request")
    }

    #[tokio::test]
    async fn index_renders_the_empty_state() {
        let dir = TempDir::new().expect("tempdir");
        let resp = local_app(&dir).oneshot(get("/")).await.expect("index");
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Daily Health Log"));
        assert!(text.contains("No entries logged yet"));
    }

    #[tokio::test]
    async fn logging_an_entry_shows_up_on_the_dashboard() {
        let dir = TempDir::new().expect("tempdir");
        let app = local_app(&dir);

        let resp = app
            .clone()
            .oneshot(post_form(
                "/log",
                "date=2024-01-05&weight_lbs=180.2&surya_namaskar=12&water_glasses_8oz=8\
                 &fasting_window_hours=16&breakfast=eggs&lunch=dal&dinner=soup&snacks=&notes=",
            ))
            .await
            .expect("post log");
        assert!(resp.status().is_redirection());

        let resp = app.clone().oneshot(get("/")).await.expect("index");
        let text = body_text(resp).await;
        assert!(text.contains("2024-01-05"));
        assert!(text.contains("180.2"));

        let resp = app
            .clone()
            .oneshot(post_form("/log/delete", "date=2024-01-05"))
            .await
            .expect("post delete");
        assert!(resp.status().is_redirection());

        let resp = app.oneshot(get("/")).await.expect("index after delete");
        let text = body_text(resp).await;
        assert!(text.contains("No entries logged yet"));
    }

    #[tokio::test]
    async fn export_downloads_the_filtered_range_as_csv() {
        let dir = TempDir::new().expect("tempdir");
        let app = local_app(&dir);

        for (day, weight) in [("2024-01-03", "181.0"), ("2024-01-05", "180.2")] {
            let body = format!("date={day}&weight_lbs={weight}");
            let resp = app.clone().oneshot(post_form("/log", &body)).await.expect("post");
            assert!(resp.status().is_redirection());
        }

        let resp = app
            .oneshot(get("/export?start=2024-01-05&end=2024-01-05"))
            .await
            .expect("export");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().expect("header"),
            "text/csv; charset=utf-8"
        );
        assert!(resp.headers()[header::CONTENT_DISPOSITION]
            .to_str()
            .expect("header")
            .contains(EXPORT_FILE_NAME));
        let text = body_text(resp).await;
        assert!(text.contains("2024-01-05"));
        assert!(!text.contains("2024-01-03"));
    }

    #[tokio::test]
    async fn chart_endpoint_serves_plotly_json() {
        let dir = TempDir::new().expect("tempdir");
        let app = local_app(&dir);

        let resp = app.clone().oneshot(get("/charts/weight")).await.expect("chart");
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE].to_str().expect("header"),
            "application/json"
        );
        let text = body_text(resp).await;
        assert!(text.contains("\"insufficient\":true"));

        let resp = app.oneshot(get("/charts/bogus")).await.expect("chart 404");
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sheet_variant_rejects_editing() {
        let app = sheet_app();

        let resp = app
            .clone()
            .oneshot(post_form("/log", "date=2024-01-05"))
            .await
            .expect("post log");
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app
            .clone()
            .oneshot(post_form("/log/delete", "date=2024-01-05"))
            .await
            .expect("post delete");
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = app.oneshot(get("/log")).await.expect("get form");
        assert_eq!(resp.status(), StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn malformed_date_is_unprocessable() {
        let dir = TempDir::new().expect("tempdir");
        let resp = local_app(&dir)
            .oneshot(post_form("/log", "date=someday"))
            .await
            .expect("post log");
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }
}
