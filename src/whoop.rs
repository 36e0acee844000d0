//! WHOOP integration: configuration, OAuth and the paginated data fetcher
//!
//! Tokens live in the `whoop_auth` table and are refreshed automatically
//! ahead of expiry. Data fetching pages each collection endpoint to
//! exhaustion for a time window and hands back flattened raw records.

use chrono::{DateTime, Duration, Utc};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use std::env;
use std::io::{Read, Write};
use std::net::TcpListener;
use std::path::PathBuf;
use std::time::Duration as StdDuration;
use url::Url;

use crate::db::DbPool;
use crate::normalize::{self, RawRecord};
use crate::pipeline::TimeWindow;
use crate::schema::RecordType;

/// ---------------------------------------------------------------------------
/// Configuration Constants
/// ---------------------------------------------------------------------------

const WHOOP_AUTH_URL: &str = "https://api.prod.whoop.com/oauth/oauth2/auth";
const WHOOP_TOKEN_URL: &str = "https://api.prod.whoop.com/oauth/oauth2/token";
const WHOOP_API_BASE: &str = "https://api.prod.whoop.com/developer/v2";
// The cycle collection is still served from the v1 API.
const WHOOP_CYCLE_API_BASE: &str = "https://api.prod.whoop.com/developer/v1";
const WHOOP_SCOPE: &str = "offline read:cycles read:sleep read:recovery read:workout";
const REDIRECT_PORT: u16 = 8767;
const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;
const CALLBACK_TIMEOUT_SECONDS: u64 = 180;
const OAUTH_STATE: &str = "whoop_pipeline_state";
const DEFAULT_SNAPSHOT_DIR: &str = "data";

/// ---------------------------------------------------------------------------
/// Configuration
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WhoopConfig {
  pub client_id: String,
  pub client_secret: String,
  pub redirect_uri: String,
  pub api_base_url: String,
  pub cycle_api_base_url: String,
  pub database_url: String,
  /// None disables snapshot output.
  pub snapshot_dir: Option<PathBuf>,
}

impl WhoopConfig {
  pub fn from_env() -> Result<Self, AuthError> {
    Ok(Self {
      client_id: env::var("WHOOP_CLIENT_ID")
        .map_err(|_| AuthError::MissingConfig("WHOOP_CLIENT_ID".into()))?,
      client_secret: env::var("WHOOP_CLIENT_SECRET")
        .map_err(|_| AuthError::MissingConfig("WHOOP_CLIENT_SECRET".into()))?,
      redirect_uri: format!("http://localhost:{}/callback", REDIRECT_PORT),
      api_base_url: env::var("WHOOP_API_BASE_URL")
        .unwrap_or_else(|_| WHOOP_API_BASE.to_string()),
      cycle_api_base_url: env::var("WHOOP_CYCLE_API_BASE_URL")
        .unwrap_or_else(|_| WHOOP_CYCLE_API_BASE.to_string()),
      database_url: env::var("DATABASE_URL")
        .map_err(|_| AuthError::MissingConfig("DATABASE_URL".into()))?,
      snapshot_dir: snapshot_dir_from_env(),
    })
  }
}

fn snapshot_dir_from_env() -> Option<PathBuf> {
  match env::var("WHOOP_SNAPSHOT_DIR") {
    Ok(dir) if dir.is_empty() => None,
    Ok(dir) => Some(PathBuf::from(dir)),
    Err(_) => Some(PathBuf::from(DEFAULT_SNAPSHOT_DIR)),
  }
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
  #[error("Missing configuration: {0}")]
  MissingConfig(String),

  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("OAuth error: {0}")]
  OAuth(String),

  #[error("Callback server error: {0}")]
  Server(String),

  #[error("Database error: {0}")]
  Database(String),
}

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
  #[error("HTTP request failed: {0}")]
  Request(#[from] reqwest::Error),

  #[error("API error {status}: {body}")]
  Api {
    status: reqwest::StatusCode,
    body: String,
  },
}

/// ---------------------------------------------------------------------------
/// OAuth Data Structures
/// ---------------------------------------------------------------------------

/// Response from the WHOOP token endpoint
#[derive(Debug, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_in: i64, // seconds
  #[allow(dead_code)]
  pub token_type: String,
}

/// Stored token state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhoopTokens {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: DateTime<Utc>,
}

impl WhoopTokens {
  pub fn from_response(resp: TokenResponse) -> Self {
    let expires_at = Utc::now() + Duration::seconds(resp.expires_in);
    Self {
      access_token: resp.access_token,
      refresh_token: resp.refresh_token,
      expires_at,
    }
  }

  pub fn needs_refresh(&self) -> bool {
    let buffer = Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES);
    Utc::now() + buffer >= self.expires_at
  }
}

/// ---------------------------------------------------------------------------
/// OAuth URL Generation
/// ---------------------------------------------------------------------------

pub fn build_auth_url(config: &WhoopConfig) -> Result<String, AuthError> {
  let mut url = Url::parse(WHOOP_AUTH_URL).map_err(|e| AuthError::OAuth(e.to_string()))?;

  url
    .query_pairs_mut()
    .append_pair("client_id", &config.client_id)
    .append_pair("redirect_uri", &config.redirect_uri)
    .append_pair("response_type", "code")
    .append_pair("scope", WHOOP_SCOPE)
    .append_pair("state", OAUTH_STATE);

  Ok(url.to_string())
}

/// ---------------------------------------------------------------------------
/// Token Exchange (Authorization Code -> Tokens)
/// ---------------------------------------------------------------------------

pub async fn exchange_code_for_tokens(
  config: &WhoopConfig,
  code: &str,
) -> Result<WhoopTokens, AuthError> {
  let client = Client::new();

  let response = client
    .post(WHOOP_TOKEN_URL)
    .form(&[
      ("client_id", config.client_id.as_str()),
      ("client_secret", config.client_secret.as_str()),
      ("code", code),
      ("grant_type", "authorization_code"),
      ("redirect_uri", config.redirect_uri.as_str()),
    ])
    .send()
    .await?;

  if !response.status().is_success() {
    let error_text = response.text().await.unwrap_or_default();
    return Err(AuthError::OAuth(format!(
      "Token exchange failed: {}",
      error_text
    )));
  }

  let token_response: TokenResponse = response.json().await?;
  Ok(WhoopTokens::from_response(token_response))
}

/// ---------------------------------------------------------------------------
/// Token Refresh
/// ---------------------------------------------------------------------------

pub async fn refresh_tokens(
  config: &WhoopConfig,
  refresh_token: &str,
) -> Result<WhoopTokens, AuthError> {
  let client = Client::new();

  let response = client
    .post(WHOOP_TOKEN_URL)
    .form(&[
      ("client_id", config.client_id.as_str()),
      ("client_secret", config.client_secret.as_str()),
      ("refresh_token", refresh_token),
      ("grant_type", "refresh_token"),
    ])
    .send()
    .await?;

  if !response.status().is_success() {
    let error_text = response.text().await.unwrap_or_default();
    return Err(AuthError::OAuth(format!(
      "Token refresh failed: {}",
      error_text
    )));
  }

  let token_response: TokenResponse = response.json().await?;
  Ok(WhoopTokens::from_response(token_response))
}

/// ---------------------------------------------------------------------------
/// OAuth Callback Server
/// ---------------------------------------------------------------------------

pub struct CallbackResult {
  pub code: String,
  pub state: Option<String>,
}

/// Start a temporary HTTP server, wait for the redirect, extract the auth
/// code. Fails if no callback arrives within the timeout.
pub fn wait_for_callback(timeout_seconds: u64) -> Result<CallbackResult, AuthError> {
  let listener = TcpListener::bind(format!("127.0.0.1:{}", REDIRECT_PORT))
    .map_err(|e| AuthError::Server(format!("Failed to bind port {}: {}", REDIRECT_PORT, e)))?;

  listener
    .set_nonblocking(true)
    .map_err(|e| AuthError::Server(e.to_string()))?;

  let start = std::time::Instant::now();
  let timeout = StdDuration::from_secs(timeout_seconds);

  loop {
    if start.elapsed() > timeout {
      return Err(AuthError::Server(
        "Callback timeout - no response received".into(),
      ));
    }

    match listener.accept() {
      Ok((mut stream, _)) => {
        let mut buffer = [0; 2048];
        stream.read(&mut buffer).ok();

        let request = String::from_utf8_lossy(&buffer);

        if let Some(code) = extract_query_param(&request, "code") {
          let state = extract_query_param(&request, "state");
          let response = build_success_response();
          stream.write_all(response.as_bytes()).ok();
          stream.flush().ok();

          return Ok(CallbackResult { code, state });
        } else if request.contains("error=") {
          let error = extract_query_param(&request, "error")
            .map(|e| e.replace("%20", " "))
            .unwrap_or_else(|| "Unknown error".to_string());

          let response = build_error_response(&error);
          stream.write_all(response.as_bytes()).ok();
          stream.flush().ok();

          return Err(AuthError::OAuth(error));
        }
      }
      Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
        std::thread::sleep(StdDuration::from_millis(100));
        continue;
      }
      Err(e) => {
        return Err(AuthError::Server(e.to_string()));
      }
    }
  }
}

fn extract_query_param(request: &str, key: &str) -> Option<String> {
  let first_line = request.lines().next()?;

  if !first_line.contains("/callback?") {
    return None;
  }

  let url_part = first_line.split_whitespace().nth(1)?;

  for param in url_part.split('?').nth(1)?.split('&') {
    let mut kv = param.split('=');
    if kv.next() == Some(key) {
      return kv.next().map(String::from);
    }
  }
  None
}

fn build_success_response() -> String {
  let body = r#"<!DOCTYPE html>
<html>
<head><title>WHOOP Connected</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
  <h1>Successfully Connected to WHOOP!</h1>
  <p>You can close this window.</p>
</body>
</html>"#;
  format!(
    "HTTP/1.1 200 OK\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
    body.len(),
    body
  )
}

fn build_error_response(error: &str) -> String {
  let body = format!(
    r#"<!DOCTYPE html>
<html>
<head><title>WHOOP - Error</title></head>
<body style="font-family: system-ui; text-align: center; padding: 50px;">
  <h1>Connection Failed</h1>
  <p>Error: {}</p>
  <p>Please try again.</p>
</body>
</html>"#,
    error
  );
  format!(
    "HTTP/1.1 400 Bad Request\r\nContent-Type: text/html\r\nContent-Length: {}\r\n\r\n{}",
    body.len(),
    body
  )
}

/// ---------------------------------------------------------------------------
/// Authorization Flow
/// ---------------------------------------------------------------------------

/// Interactive first-time authorization: print the consent URL, wait for the
/// browser redirect, exchange the code for tokens.
pub async fn authorize(config: &WhoopConfig) -> Result<WhoopTokens, AuthError> {
  let auth_url = build_auth_url(config)?;
  println!("Open this URL in your browser to connect WHOOP:\n{}", auth_url);

  let callback = tokio::task::spawn_blocking(|| wait_for_callback(CALLBACK_TIMEOUT_SECONDS))
    .await
    .map_err(|e| AuthError::Server(e.to_string()))??;

  if callback.state.as_deref() != Some(OAUTH_STATE) {
    return Err(AuthError::OAuth("State mismatch in OAuth callback".into()));
  }

  exchange_code_for_tokens(config, &callback.code).await
}

/// ---------------------------------------------------------------------------
/// Token Management (Database Helpers)
/// ---------------------------------------------------------------------------

pub async fn load_tokens(db: &DbPool) -> Result<Option<WhoopTokens>, AuthError> {
  let row: Option<(String, String, DateTime<Utc>)> = sqlx::query_as(
    "SELECT access_token, refresh_token, expires_at FROM whoop_auth WHERE id = 1",
  )
  .fetch_optional(db)
  .await
  .map_err(|e| AuthError::Database(e.to_string()))?;

  Ok(row.map(|(access, refresh, expires)| WhoopTokens {
    access_token: access,
    refresh_token: refresh,
    expires_at: expires,
  }))
}

pub async fn save_tokens(db: &DbPool, tokens: &WhoopTokens) -> Result<(), AuthError> {
  sqlx::query(
    r#"
    INSERT INTO whoop_auth (id, access_token, refresh_token, expires_at)
    VALUES (1, ?1, ?2, ?3)
    ON CONFLICT(id) DO UPDATE SET
      access_token = excluded.access_token,
      refresh_token = excluded.refresh_token,
      expires_at = excluded.expires_at,
      updated_at = CURRENT_TIMESTAMP
    "#,
  )
  .bind(&tokens.access_token)
  .bind(&tokens.refresh_token)
  .bind(&tokens.expires_at)
  .execute(db)
  .await
  .map_err(|e| AuthError::Database(e.to_string()))?;

  Ok(())
}

/// ---------------------------------------------------------------------------
/// Get Valid Access Token (with auto-refresh)
/// ---------------------------------------------------------------------------

/// Get a valid access token, running the full authorization flow on first
/// use and refreshing when close to expiry.
pub async fn get_valid_access_token(
  db: &DbPool,
  config: &WhoopConfig,
) -> Result<String, AuthError> {
  let tokens = match load_tokens(db).await? {
    Some(tokens) if tokens.needs_refresh() => {
      let refreshed = refresh_tokens(config, &tokens.refresh_token).await?;
      save_tokens(db, &refreshed).await?;
      println!("WHOOP tokens refreshed");
      refreshed
    }
    Some(tokens) => tokens,
    None => {
      let tokens = authorize(config).await?;
      save_tokens(db, &tokens).await?;
      println!("WHOOP authorization complete");
      tokens
    }
  };

  Ok(tokens.access_token)
}

/// ---------------------------------------------------------------------------
/// Data Fetching
/// ---------------------------------------------------------------------------

/// One page of a collection endpoint.
#[derive(Debug, Deserialize)]
struct PageResponse {
  #[serde(default)]
  records: Vec<Json>,
  #[serde(default)]
  next_token: Option<String>,
}

/// Fetch every record of one type in the window, following `next_token`
/// pagination to exhaustion. Records come back flattened into dotted paths,
/// in server page order. Any non-2xx response aborts the whole fetch; no
/// partial batch is returned.
pub async fn fetch_all(
  config: &WhoopConfig,
  access_token: &str,
  record_type: RecordType,
  window: &TimeWindow,
  limit: u32,
) -> Result<Vec<RawRecord>, FetchError> {
  let client = Client::new();
  let base = if record_type.uses_cycle_base() {
    &config.cycle_api_base_url
  } else {
    &config.api_base_url
  };
  let url = format!("{}/{}", base.trim_end_matches('/'), record_type.endpoint());

  let mut records: Vec<Json> = Vec::new();
  let mut next_token: Option<String> = None;

  loop {
    let mut request = client
      .get(&url)
      .bearer_auth(access_token)
      .header("Accept", "application/json")
      .query(&[
        ("start", window.start_param()),
        ("end", window.end_param()),
        ("limit", limit.to_string()),
      ]);
    if let Some(token) = &next_token {
      request = request.query(&[("nextToken", token.as_str())]);
    }

    let response = request.send().await?;

    if !response.status().is_success() {
      let status = response.status();
      let body = response.text().await.unwrap_or_default();
      return Err(FetchError::Api { status, body });
    }

    let page: PageResponse = response.json().await?;
    records.extend(page.records);

    match page.next_token {
      Some(token) => next_token = Some(token),
      None => break,
    }
  }

  // Activities with no computed score (stretching and the like) are not
  // valid workout facts.
  if record_type == RecordType::Workout {
    records.retain(|record| record.get("score").map(|s| !s.is_null()).unwrap_or(false));
  }

  Ok(records.iter().map(normalize::flatten).collect())
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
