use std::path::Path;

use super::http_client::ApiClient;
use crate::orchestrator::StepOutcome;
use crate::types::{AppPackage, CONFIG_FILE};

/// Upload a package directory to the admin service and print the step report.
pub fn run_publish(dir: &Path, server_url: &str, token: &str) -> anyhow::Result<()> {
    let package = AppPackage::load(dir)?;
    let config = std::fs::read_to_string(dir.join(CONFIG_FILE))?;
    let migrations = package.migrations()?;

    let client = ApiClient::new(server_url, token)?;
    let report = client.upload_package(&config, &migrations)?;

    println!("Published {}@{}", report.app_id, report.version);
    for step in &report.steps {
        let outcome = match step.outcome {
            StepOutcome::Ok => "ok",
            StepOutcome::Skipped => "skipped",
            StepOutcome::Failed => "FAILED",
        };
        match &step.detail {
            Some(detail) => println!("  {outcome:<8} {:<24} {detail}", step.step),
            None => println!("  {outcome:<8} {}", step.step),
        }
    }

    let failed = report.failed_steps();
    if failed > 0 {
        println!();
        println!("{failed} step(s) failed; the package was stored and can be re-published.");
    }

    Ok(())
}
