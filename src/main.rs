use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use tokio::sync::Semaphore;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use apikit_validate::cli::Cli;
use apikit_validate::config::ConfigManager;
use apikit_validate::output::{Output, PayloadOutcome, RunSummary};
use apikit_validate::payload::RawPayload;
use apikit_validate::schema_source::{ApiIdentity, FsSchemaSource, SchemaKey};
use apikit_validate::validator::PayloadValidator;

fn init_logging(cli: &Cli) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(cli.verbosity().default_log_filter()));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

async fn validate_one(
    validator: PayloadValidator,
    key: SchemaKey,
    path: PathBuf,
    content_type: Option<String>,
) -> PayloadOutcome {
    let started = Instant::now();
    let result = match tokio::fs::File::open(&path).await {
        Ok(file) => {
            validator
                .validate(&key, RawPayload::from_reader(file), content_type.as_deref())
                .await
        }
        Err(e) => Err(e.into()),
    };
    PayloadOutcome::from_result(path, result, started.elapsed())
}

async fn run(cli: Cli) -> anyhow::Result<i32> {
    cli.validate().map_err(anyhow::Error::msg)?;

    let config = ConfigManager::load_config(&cli)
        .await
        .context("Failed to load configuration")?;
    debug!(?config, "Effective configuration");

    let source = Arc::new(FsSchemaSource::new(config.schemas.root.clone()));
    let validator = PayloadValidator::new(
        source,
        config.default_encoding(),
        config.validation_settings(),
        &config.schema_cache_config(),
    );
    let key = SchemaKey::new(
        cli.config_id.clone(),
        cli.schema.clone(),
        ApiIdentity::new(cli.api.clone()),
    );

    let threads = config.thread_count();
    info!(
        payloads = cli.payloads.len(),
        threads,
        schema = %key,
        "Validating payloads"
    );

    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(threads));
    let tasks = cli.payloads.iter().map(|path| {
        let semaphore = Arc::clone(&semaphore);
        let validator = validator.clone();
        let key = key.clone();
        let content_type = cli.content_type_for(path);
        let path = path.clone();

        tokio::spawn(async move {
            let _permit = semaphore.acquire_owned().await?;
            Ok::<_, tokio::sync::AcquireError>(
                validate_one(validator, key, path, content_type).await,
            )
        })
    });

    let outcomes = futures::future::try_join_all(tasks)
        .await
        .context("Validation task panicked")?
        .into_iter()
        .collect::<Result<Vec<_>, _>>()
        .context("Validation task was cancelled")?;

    let summary = RunSummary::new(outcomes, started.elapsed());
    print!("{}", Output::new(cli.verbosity()).format_summary(&summary));

    let stats = validator.json().cache().stats().await;
    debug!(?stats, "JSON schema cache");
    let stats = validator.xml().cache().stats().await;
    debug!(?stats, "XML schema cache");

    Ok(summary.exit_code())
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse_args();
    init_logging(&cli);

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            2
        }
    };
    std::process::exit(code);
}
