use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::EnvFilter;

use as4_validate::{
    Cli, ConfigManager, DirectoryStore, FileDiscovery, NamespaceRegistry, Output,
    SchemaContextCache, ValidationConfig, ValidationEngine, ValidationOutcomePolicy,
    VerbosityLevel,
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse_args();

    if let Err(message) = cli.validate() {
        eprintln!("Error: {}", message);
        return ExitCode::from(2);
    }

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(2)
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = ConfigManager::load_config(&cli)
        .await
        .context("failed to load configuration")?;

    let verbosity = VerbosityLevel::from_flags(config.output.verbose, config.output.quiet);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(verbosity.log_directive()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    let mode = ConfigManager::get_validation_mode(&config);
    tracing::debug!(
        schema_dir = %config.schemas.directory.display(),
        ?mode,
        receipt = config.validation.receipt,
        "as4-validate starting"
    );

    let store = Arc::new(DirectoryStore::new(config.schemas.directory.clone()));
    let cache = Arc::new(SchemaContextCache::from_store(store));

    let engine = ValidationEngine::new(
        cache,
        Arc::new(NamespaceRegistry::as4()),
        ValidationOutcomePolicy::new(mode),
        ValidationConfig {
            max_concurrent_validations: ConfigManager::get_thread_count(&config),
            validation_timeout: ConfigManager::get_timeout_duration(&config),
            context: config.validation.context,
            receipt: config.validation.receipt,
        },
    );

    let discovery = FileDiscovery::new().with_extensions(config.files.extensions.clone());
    let results = engine
        .validate_path(&cli.path, &discovery)
        .await
        .with_context(|| format!("failed to validate {}", cli.path.display()))?;

    let output = Output::new(config.output.format, verbosity);
    print!("{}", output.format_results(&results));

    Ok(ExitCode::from(results.exit_code() as u8))
}
