//! History stored in Supabase, via its PostgREST API.
//!
//! The table needs one column per [`GradingRecord`] field, with `scores` as
//! `jsonb`:
//!
//! ```sql
//! create table grading_records (
//!     id uuid primary key,
//!     user_id text not null,
//!     question text not null,
//!     answer text not null,
//!     scores jsonb not null,
//!     max_score integer not null,
//!     feedback text not null,
//!     suggested_answer text not null,
//!     created_at timestamptz not null
//! );
//! create index on grading_records (user_id, created_at desc);
//! ```

use reqwest::{Method, RequestBuilder, Response, StatusCode, header};
use uuid::Uuid;

use super::{HistoryStore, require_user};
use crate::{
    error::{GradeError, GradeResult, Service},
    prelude::*,
    record::GradingRecord,
    retry::{
        IsKnownTransient as _, SimpleRetryResult, retry_result_fatal, retry_result_ok,
        retry_result_transient, with_backoff,
    },
};

/// A Supabase-backed history store.
#[derive(Debug)]
pub struct SupabaseStore {
    client: reqwest::Client,
    /// `{project}/rest/v1/{table}`.
    table_url: String,
    api_key: String,
}

impl SupabaseStore {
    /// Create a store for `table` in the Supabase project at `url`.
    pub fn new(url: &str, api_key: &str, table: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("could not create HTTP client")?;
        Ok(Self {
            client,
            table_url: format!("{}/rest/v1/{}", url.trim_end_matches('/'), table),
            api_key: api_key.to_owned(),
        })
    }

    /// Start a request with our credentials.
    fn request(&self, method: Method) -> RequestBuilder {
        self.client
            .request(method, &self.table_url)
            .header("apikey", &self.api_key)
            .bearer_auth(&self.api_key)
            .header(header::ACCEPT, "application/json")
    }

    /// Send a request and decode the JSON array PostgREST returns.
    async fn send(&self, req: RequestBuilder) -> GradeResult<Vec<GradingRecord>> {
        let resp = req.send().await.map_err(store_error)?;
        let resp = check_status(resp).await?;
        resp.json::<Vec<GradingRecord>>()
            .await
            .map_err(|err| GradeError::upstream(Service::Store, format!("bad response: {err}")))
    }

    /// Like [`Self::send`], but transient failures can be retried.
    async fn send_retryable(&self, req: &RequestBuilder) -> SimpleRetryResult<Vec<GradingRecord>> {
        let Some(req) = req.try_clone() else {
            return retry_result_fatal(anyhow!("request body cannot be retried"));
        };
        let resp = match req.send().await {
            Ok(resp) => resp,
            Err(err) if err.is_known_transient() => return retry_result_transient(err.into()),
            Err(err) => return retry_result_fatal(err.into()),
        };
        if resp.status().is_known_transient() {
            return retry_result_transient(anyhow!("store returned {}", resp.status()));
        }
        match check_status(resp).await {
            Ok(resp) => match resp.json::<Vec<GradingRecord>>().await {
                Ok(records) => retry_result_ok(records),
                Err(err) => retry_result_fatal(anyhow!("bad response: {err}")),
            },
            Err(err) => retry_result_fatal(err.into()),
        }
    }
}

#[async_trait]
impl HistoryStore for SupabaseStore {
    #[instrument(level = "debug", skip_all, fields(id = %record.id))]
    async fn save(&self, record: &GradingRecord) -> GradeResult<GradingRecord> {
        require_user(&record.user_id)?;
        let req = self
            .request(Method::POST)
            .header("Prefer", "return=representation")
            .json(record);
        let mut saved = self.send(req).await?;
        if saved.is_empty() {
            return Err(GradeError::upstream(
                Service::Store,
                "insert returned no rows (check the table's row-level security policies)",
            ));
        }
        Ok(saved.swap_remove(0))
    }

    #[instrument(level = "debug", skip_all)]
    async fn list(&self, user_id: &str, limit: usize) -> GradeResult<Vec<GradingRecord>> {
        let user_id = require_user(user_id)?;
        let req = self.request(Method::GET).query(&[
            ("select", "*".to_owned()),
            ("user_id", format!("eq.{user_id}")),
            ("order", "created_at.desc".to_owned()),
            ("limit", limit.to_string()),
        ]);
        with_backoff("history list", || self.send_retryable(&req))
            .await
            .map_err(|err| match err.downcast::<GradeError>() {
                Ok(err) => err,
                Err(err) => GradeError::upstream(Service::Store, format!("{err:#}")),
            })
    }

    #[instrument(level = "debug", skip_all, fields(%id))]
    async fn delete(&self, user_id: &str, id: Uuid) -> GradeResult<()> {
        let user_id = require_user(user_id)?;
        let req = self
            .request(Method::DELETE)
            .header("Prefer", "return=representation")
            .query(&[("id", format!("eq.{id}")), ("user_id", format!("eq.{user_id}"))]);
        let deleted = self.send(req).await?;
        if deleted.is_empty() {
            Err(GradeError::NotFound(id))
        } else {
            Ok(())
        }
    }
}

/// Map a failed request to a [`GradeError`].
fn store_error(err: reqwest::Error) -> GradeError {
    GradeError::upstream(Service::Store, err)
}

/// Turn error statuses into [`GradeError`]s.
async fn check_status(resp: Response) -> GradeResult<Response> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().await.unwrap_or_default();
    warn!(%status, %body, "Supabase request failed");
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(GradeError::Unauthenticated),
        _ => Err(GradeError::upstream(
            Service::Store,
            format!("HTTP {status}: {body}"),
        )),
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashMap, sync::Arc};

    use axum::{
        Json, Router,
        body::Bytes,
        extract::{Query, State},
        http::{HeaderMap, Method as AxumMethod, StatusCode as AxumStatus},
        response::{IntoResponse, Response as AxumResponse},
        routing::any,
    };
    use chrono::{DateTime, Utc};
    use tokio::{net::TcpListener, sync::Mutex};

    use super::*;
    use crate::{error::ErrorKind, history::memory::tests::record};

    const KEY: &str = "test-key";

    type Rows = Arc<Mutex<Vec<Value>>>;

    /// A tiny imitation of PostgREST, supporting just the queries we make.
    async fn postgrest(
        State(rows): State<Rows>,
        method: AxumMethod,
        headers: HeaderMap,
        Query(params): Query<HashMap<String, String>>,
        body: Bytes,
    ) -> AxumResponse {
        let authorized = headers.get("apikey").and_then(|v| v.to_str().ok()) == Some(KEY)
            && headers.get("authorization").and_then(|v| v.to_str().ok())
                == Some(&format!("Bearer {KEY}")[..]);
        if !authorized {
            return (AxumStatus::UNAUTHORIZED, Json(json!({"message": "Invalid API key"})))
                .into_response();
        }

        let eq = |name: &str| {
            params
                .get(name)
                .and_then(|v| v.strip_prefix("eq."))
                .map(str::to_owned)
        };
        let row_matches = |row: &Value, name: &str| match eq(name) {
            Some(want) => row[name].as_str() == Some(want.as_str()),
            None => true,
        };

        let mut rows = rows.lock().await;
        match method {
            AxumMethod::POST => {
                let row: Value = serde_json::from_slice(&body).unwrap();
                rows.push(row.clone());
                (AxumStatus::CREATED, Json(json!([row]))).into_response()
            }
            AxumMethod::GET => {
                assert_eq!(params.get("order").map(String::as_str), Some("created_at.desc"));
                let mut found = rows
                    .iter()
                    .filter(|row| row_matches(row, "user_id"))
                    .cloned()
                    .collect::<Vec<_>>();
                let created_at = |row: &Value| {
                    row["created_at"]
                        .as_str()
                        .and_then(|s| s.parse::<DateTime<Utc>>().ok())
                };
                found.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
                if let Some(limit) = params.get("limit").and_then(|l| l.parse().ok()) {
                    found.truncate(limit);
                }
                Json(Value::Array(found)).into_response()
            }
            AxumMethod::DELETE => {
                let (deleted, kept): (Vec<_>, Vec<_>) = rows
                    .drain(..)
                    .partition(|row| row_matches(row, "id") && row_matches(row, "user_id"));
                *rows = kept;
                Json(Value::Array(deleted)).into_response()
            }
            _ => AxumStatus::METHOD_NOT_ALLOWED.into_response(),
        }
    }

    /// Start a mock server, returning its base URL.
    async fn spawn_postgrest() -> String {
        let rows = Rows::default();
        let app = Router::new()
            .route("/rest/v1/grading_records", any(postgrest))
            .with_state(rows);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn save_list_delete() {
        let url = spawn_postgrest().await;
        let store = SupabaseStore::new(&url, KEY, "grading_records").unwrap();

        assert!(store.list("u1", 10).await.unwrap().is_empty());

        let old = store.save(&record("u1", "old", 20)).await.unwrap();
        let new = store.save(&record("u1", "new", 1)).await.unwrap();
        store.save(&record("u2", "other", 0)).await.unwrap();

        let listed = store.list("u1", 10).await.unwrap();
        assert_eq!(listed, vec![new.clone(), old.clone()]);
        assert_eq!(store.list("u1", 1).await.unwrap(), vec![new.clone()]);

        store.delete("u1", old.id).await.unwrap();
        assert_eq!(store.list("u1", 10).await.unwrap(), vec![new.clone()]);
        assert!(matches!(
            store.delete("u2", new.id).await,
            Err(GradeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn bad_key_is_unauthenticated() {
        let url = spawn_postgrest().await;
        let store = SupabaseStore::new(&url, "wrong-key", "grading_records").unwrap();
        let err = store.save(&record("u1", "q", 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
        let err = store.list("u1", 10).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Unauthenticated);
    }

    #[tokio::test]
    async fn unreachable_store_is_upstream() {
        // Bind and drop a listener to find a port nobody is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let store =
            SupabaseStore::new(&format!("http://{addr}"), KEY, "grading_records").unwrap();
        let err = store.save(&record("u1", "q", 0)).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Upstream);
        assert!(err.user_message().contains("history store"));
    }
}
