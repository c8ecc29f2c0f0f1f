use std::path::PathBuf;
use std::time::Duration;

use clearbill::batch::{BatchProcessor, MetricsRegistry};
use clearbill::pipeline::{HttpLlmClient, HttpPaymentGateway, InvoicePipeline, PaymentGateway};
use clearbill::record::ProcessingStatus;
use clearbill::PipelineConfig;

const DEFAULT_CONFIG_PATH: &str = "clearbill.toml";

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_target(true)
        .with_level(true)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let mut args = std::env::args().skip(1).peekable();
    let config_path = match args.peek().map(String::as_str) {
        Some("--config") => {
            args.next();
            args.next().ok_or("--config requires a path")?
        }
        _ => DEFAULT_CONFIG_PATH.to_string(),
    };

    let config = if std::path::Path::new(&config_path).exists() {
        PipelineConfig::load(&config_path)?
    } else {
        PipelineConfig::default()
    };

    let files: Vec<PathBuf> = args.map(PathBuf::from).collect();
    if files.is_empty() {
        eprintln!("usage: clearbill [--config <path>] <invoice.pdf>...");
        std::process::exit(2);
    }

    let llm = HttpLlmClient::new(
        &config.extraction.ai_base_url,
        &config.extraction.ai_model,
        config.extraction.ai_timeout_secs,
    )?;
    let gateway = HttpPaymentGateway::new(
        &config.payment.gateway_url,
        Duration::from_secs(config.payment.gateway_timeout_secs),
    );
    match gateway.health() {
        Ok(health) => tracing::info!(status = %health.status, "Payment gateway reachable"),
        Err(e) => tracing::warn!(error = %e, "Payment gateway health check failed; auto-approvals will be downgraded"),
    }

    let pipeline = InvoicePipeline::from_config(&config, Box::new(llm), Box::new(gateway))?;
    let registry = MetricsRegistry::new();
    let records = BatchProcessor::new(&pipeline, config.concurrency).run(files, &registry);

    let failed = records
        .iter()
        .filter(|r| r.status == ProcessingStatus::Failed)
        .count();
    for record in &records {
        println!("{}", serde_json::to_string_pretty(record)?);
    }
    tracing::info!(
        processed = records.len(),
        failed,
        "Batch finished; per-stage metrics: {:?}",
        registry.snapshot()
    );

    if failed > 0 {
        std::process::exit(1);
    }
    Ok(())
}
