pub mod db;
pub mod normalize;
pub mod pipeline;
pub mod schema;
pub mod snapshot;
pub mod validate;
pub mod whoop;

#[cfg(test)]
mod test_utils;

use thiserror::Error;

/// Failures that halt a run before any record type is processed.
#[derive(Debug, Error)]
pub enum RunError {
  #[error(transparent)]
  Auth(#[from] whoop::AuthError),

  #[error(transparent)]
  Storage(#[from] db::StorageError),
}

/// Run one full ingestion pass: load config, open the warehouse, obtain a
/// token, resolve the fetch window and pipeline all four record types.
pub async fn run() -> Result<pipeline::RunReport, RunError> {
  // Load environment variables from .env file
  dotenvy::dotenv().ok();

  let config = whoop::WhoopConfig::from_env()?;
  let pool = db::initialize_db(&config.database_url).await?;

  // No stage can proceed without a token; an auth failure halts the run.
  let access_token = whoop::get_valid_access_token(&pool, &config).await?;

  let window = pipeline::resolve_window(&pool).await?;
  println!(
    "Fetching data from {} to {}",
    window.start_param(),
    window.end_param()
  );

  Ok(pipeline::run(&config, &pool, &access_token, &window).await)
}
