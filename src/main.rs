use anyhow::Context;
use clap::Parser;
use data_relay::config::cli::{Cli, Command, ExportArgs, ImportArgs, DEFAULT_CLI_CHUNK};
use data_relay::core::{ExportOptions, ExportRequest, ImportOptions, ImportRequest, Orchestrator};
use data_relay::utils::error::{ErrorSeverity, EtlError};
use data_relay::utils::logger;
use data_relay::utils::monitor::SystemMonitor;
use data_relay::{build_orchestrator, Record, RelayConfig, Source};
use std::sync::Arc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Config goes first so its [logging] section can shape the logger.
    let config = match &cli.config {
        Some(path) => RelayConfig::from_file(path),
        None => Ok(RelayConfig::default()),
    };
    let (level, json_logs) = match &config {
        Ok(config) => (config.log_level().map(str::to_string), config.json_logs()),
        Err(_) => (None, false),
    };
    if cli.json_logs || json_logs {
        logger::init_json_logger(cli.verbose, level.as_deref());
    } else {
        logger::init_cli_logger(cli.verbose, level.as_deref());
    }

    tracing::info!("Starting data-relay CLI");
    if cli.verbose {
        tracing::debug!("CLI args: {:?}", cli);
    }

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            tracing::error!("❌ Failed to load configuration: {}", e);
            fail(&e);
        }
    };
    let orchestrator = match build_orchestrator(&config) {
        Ok(orchestrator) => Arc::new(orchestrator),
        Err(e) => {
            tracing::error!("❌ Configuration validation failed: {}", e);
            fail(&e);
        }
    };

    let monitor = Arc::new(SystemMonitor::new(cli.monitor));
    if cli.monitor {
        tracing::info!("🔍 System monitoring enabled");
        monitor.attach(orchestrator.events());
    }

    let result = match cli.command {
        Command::Import(args) => run_import(&orchestrator, &config, args).await,
        Command::Export(args) => {
            let records = load_records(&args.data)?;
            run_export(&orchestrator, &config, args, records).await
        }
    };
    monitor.log_final_stats();

    if let Err(e) = result {
        tracing::error!(
            "❌ Run failed: {} (Category: {:?}, Severity: {:?})",
            e,
            e.category(),
            e.severity()
        );
        fail(&e);
    }

    Ok(())
}

async fn run_import(
    orchestrator: &Arc<Orchestrator>,
    config: &RelayConfig,
    args: ImportArgs,
) -> data_relay::Result<()> {
    let mut options = ImportOptions {
        chunk_size: args.chunk,
        checkpoint: args.checkpoint,
        actor: config.actor().map(str::to_string),
        ..ImportOptions::default()
    };

    let mut request = match &args.template {
        Some(name) => orchestrator.import_request_from_template(name, Source::location(args.source), options)?,
        None => {
            options.chunk_size = options.chunk_size.or(config.chunk_size());
            ImportRequest::new(args.r#type, Source::location(args.source)).with_options(options)
        }
    };
    request
        .options
        .chunk_size
        .get_or_insert(config.chunk_size().unwrap_or(DEFAULT_CLI_CHUNK));

    let checkpoint = request.options.checkpoint.clone();
    let mut stream = orchestrator.spawn_import(request, 4);
    let mut count = 0usize;
    while let Some(chunk) = stream.next_chunk().await {
        count += chunk.len();
        if args.print {
            for record in &chunk.records {
                println!("{}", serde_json::to_string(record)?);
            }
        }
        println!("Imported chunk {}, total so far: {}", chunk.index + 1, count);
    }

    let summary = match stream.finish().await {
        Ok(summary) => summary,
        Err(e) => {
            if let Some(name) = checkpoint.filter(|_| e.is_resumable()) {
                eprintln!("🔁 Rerun with --checkpoint {} to continue where this run stopped", name);
            }
            return Err(e);
        }
    };
    println!("✅ Import complete. Total rows: {}", summary.processed);
    if summary.skipped > 0 {
        println!("⏭️  Skipped {} already processed rows", summary.skipped);
    }
    if !summary.errors.is_empty() {
        eprintln!("⚠️  Rows failing validation: {}", summary.errors.len());
    }
    Ok(())
}

async fn run_export(
    orchestrator: &Arc<Orchestrator>,
    config: &RelayConfig,
    args: ExportArgs,
    records: Vec<Record>,
) -> data_relay::Result<()> {
    let options = ExportOptions {
        chunk_size: args.chunk,
        actor: config.actor().map(str::to_string),
        ..ExportOptions::default()
    };

    let mut request = match &args.template {
        Some(name) => orchestrator.export_request_from_template(name, records, args.target, options)?,
        None => ExportRequest::new(args.r#type, records, args.target).with_options(options),
    };
    request
        .options
        .chunk_size
        .get_or_insert(config.chunk_size().unwrap_or(DEFAULT_CLI_CHUNK));

    let summary = orchestrator
        .spawn_export(request)
        .await
        .map_err(|e| EtlError::Task {
            message: e.to_string(),
        })??;

    println!(
        "✅ Exported {} records in {} chunks",
        summary.exported, summary.chunks
    );
    println!("📁 Output saved to: {}", summary.target);
    Ok(())
}

fn load_records(path: &str) -> anyhow::Result<Vec<Record>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read export data from {}", path))?;
    serde_json::from_str(&content)
        .with_context(|| format!("{} must hold a JSON array of objects", path))
}

fn fail(e: &EtlError) -> ! {
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 Suggestion: {}", e.recovery_suggestion());

    let exit_code = match e.severity() {
        ErrorSeverity::Low => 0,
        ErrorSeverity::Medium => 2,
        ErrorSeverity::High => 1,
        ErrorSeverity::Critical => 3,
    };
    std::process::exit(exit_code)
}
