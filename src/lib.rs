pub mod cli;
pub mod config;
pub mod data;
pub mod destination;
pub mod diagnostics;
pub mod dialect;
pub mod error;
pub mod io_utils;
pub mod orchestrator;
pub mod provision;
pub mod query;
pub mod reader;
pub mod schema;
pub mod table;
pub mod transaction;

use std::{env, sync::OnceLock};

use anyhow::{Context, Result, anyhow};
use clap::Parser;
use log::{LevelFilter, error, info};

use crate::{
    cli::{Cli, Commands},
    dialect::{CreateTable, TableName},
    orchestrator::{ImportOrchestrator, ProgressEvent},
    query::RowQuery,
    reader::DelimitedReader,
};

static LOGGER: OnceLock<()> = OnceLock::new();

fn init_logging() {
    LOGGER.get_or_init(|| {
        let mut builder = env_logger::Builder::from_env(env_logger::Env::default());
        if env::var("RUST_LOG").is_err() {
            builder.filter_module("csv_bulk_import", LevelFilter::Info);
        }
        let _ = builder.format_timestamp_millis().try_init();
    });
}

pub fn run() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    match cli.command {
        Commands::Import(args) => handle_import(&args),
        Commands::Infer(args) => handle_infer(&args),
    }
}

fn handle_import(args: &cli::ImportArgs) -> Result<()> {
    let options = args.load_options()?;
    let destination = destination::open_target(&args.target, &options)
        .with_context(|| format!("Opening target '{}'", args.target))?;
    info!(
        "Importing {} file(s) into {} on {}",
        args.inputs.len(),
        options.table_name(),
        destination.describe()
    );

    let mut on_progress = |event: &ProgressEvent<'_>| {
        info!("{:?}: {} row(s) copied", event.path, event.rows_copied);
    };
    let report = ImportOrchestrator::new(destination.as_ref(), &options)
        .run(&args.inputs, &mut on_progress)?;

    print!("{}", report.summary());
    if let Some(path) = &args.report {
        report.write_json(path)?;
        info!("Report written to {path:?}");
    }

    let failed = report.failed().collect::<Vec<_>>();
    for result in &failed {
        if let Some(err) = &result.error {
            error!("{:?}: {err}", result.path);
        }
    }
    if failed.is_empty() {
        Ok(())
    } else {
        Err(anyhow!(
            "{} of {} file(s) failed to load",
            failed.len(),
            report.results.len()
        ))
    }
}

fn handle_infer(args: &cli::InferArgs) -> Result<()> {
    let encoding = io_utils::resolve_encoding(args.input_encoding.as_deref()).ok_or_else(|| {
        anyhow!(
            "Unknown encoding '{}'",
            args.input_encoding.as_deref().unwrap_or_default()
        )
    })?;
    let delimiter = io_utils::resolve_input_delimiter(&args.input, args.delimiter);
    info!(
        "Inferring schema of '{}' with delimiter '{}'",
        args.input.display(),
        printable_delimiter(delimiter)
    );
    let reader = DelimitedReader::open(&args.input, delimiter, args.headers, encoding)?;
    let mut schema = schema::infer_schema(&reader)
        .with_context(|| format!("Inferring schema from {:?}", args.input))?;
    if let Some(query) = &args.query {
        let compiled = RowQuery::compile(query, &schema)?;
        schema = schema.project(&compiled);
    }

    if let Some(path) = &args.output {
        schema
            .save(path)
            .with_context(|| format!("Writing schema to {path:?}"))?;
        info!(
            "Inferred schema for {} column(s) written to {:?}",
            schema.columns.len(),
            path
        );
    }
    let ddl = CreateTable::from_schema(&TableName::parse(&args.table), &schema, args.dialect);
    print!("{}", serde_yaml::to_string(&schema)?);
    println!("{}", ddl.to_sql(args.dialect));
    Ok(())
}

pub(crate) fn printable_delimiter(delimiter: u8) -> String {
    match delimiter {
        b',' => ",".to_string(),
        b'\t' => "tab".to_string(),
        b';' => "semicolon".to_string(),
        b'|' => "pipe".to_string(),
        other => (other as char).to_string(),
    }
}
