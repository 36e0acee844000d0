#[tokio::main]
async fn main() {
  match whoop_pipeline::run().await {
    Ok(report) => {
      if !report.all_succeeded() {
        std::process::exit(1);
      }
    }
    Err(e) => {
      eprintln!("Pipeline run failed: {}", e);
      std::process::exit(1);
    }
  }
}
