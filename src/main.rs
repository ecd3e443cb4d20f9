//! roadsev: road-accident severity CLI
//!
//! Subcommands prepare the accident-level dataset, train and evaluate a
//! classifier, score new rows with a saved bundle, and summarize a dataset.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use polars::prelude::DataFrame;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use roadsev::cli::{confirm_overwrite, derive_path, Cli, Commands};
use roadsev::config::PipelineConfig;
use roadsev::model::{train_model, ModelBundle, PREDICTION_COLUMN};
use roadsev::pipeline::{
    load_dataset, load_source_tables, prepare_from_tables, profile_dataset, save_dataset,
    Severity,
};
use roadsev::report::{display_evaluation, display_profile, export_evaluation, PreparationSummary};
use roadsev::utils::{
    create_spinner, finish_with_error, finish_with_success, print_banner, print_completion,
    print_config, print_count, print_info, print_step_header, print_step_time, print_success,
    print_warning,
};

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "roadsev=warn",
        1 => "roadsev=debug",
        _ => "roadsev=trace",
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = cli.resolve_config().context("Invalid configuration")?;

    match &cli.command {
        Commands::Prepare { output, .. } => run_prepare(&config, output, cli.no_confirm),
        Commands::Train {
            input,
            output,
            report,
            ..
        } => run_train(
            &config,
            input.as_deref(),
            output,
            report.as_deref(),
            cli.no_confirm,
        ),
        Commands::Predict {
            model,
            input,
            output,
        } => run_predict(model, input, output.as_deref(), cli.no_confirm),
        Commands::Explore { input, top } => run_explore(input, *top),
    }
}

/// Steps 1 and 2 shared by `prepare` and `train` without a prepared input
fn prepare_accidents(config: &PipelineConfig) -> Result<(DataFrame, PreparationSummary)> {
    print_step_header(1, "Load Yearly Files");
    let step_start = Instant::now();
    let spinner = create_spinner(&format!(
        "Reading {} to {} from {}...",
        config.source.years.start,
        config.source.years.end,
        config.source.data_dir.display()
    ));
    let tables = match load_source_tables(&config.source) {
        Ok(tables) => {
            finish_with_success(&spinner, "Yearly files loaded");
            tables
        }
        Err(e) => {
            finish_with_error(&spinner, "Loading failed");
            return Err(e).context("Failed to load the yearly files");
        }
    };
    print_step_time(step_start.elapsed());

    print_step_header(2, "Reconcile, Recode and Aggregate");
    let step_start = Instant::now();
    let spinner = create_spinner("Merging tables and aggregating per accident...");
    let prepared = match prepare_from_tables(&tables, &config.features) {
        Ok(prepared) => {
            finish_with_success(&spinner, "Accident-level dataset ready");
            prepared
        }
        Err(e) => {
            finish_with_error(&spinner, "Preparation failed");
            return Err(e).context("Failed to prepare the accident-level dataset");
        }
    };
    print_count("accident(s)", prepared.counts.accidents, None);
    print_step_time(step_start.elapsed());

    let summary = PreparationSummary::from_prepared(&prepared);
    Ok((prepared.accidents, summary))
}

fn run_prepare(config: &PipelineConfig, output: &Path, no_confirm: bool) -> Result<()> {
    print_banner(env!("CARGO_PKG_VERSION"));
    print_config(config, None, output);

    if !confirm_overwrite(output, no_confirm)? {
        print_info("Cancelled by user.");
        return Ok(());
    }

    let (mut accidents, summary) = prepare_accidents(config)?;

    print_step_header(3, "Save Results");
    let step_start = Instant::now();
    let spinner = create_spinner("Writing output file...");
    save_dataset(&mut accidents, output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    finish_with_success(&spinner, &format!("Saved to {}", output.display()));
    print_step_time(step_start.elapsed());

    summary.display();
    print_completion("Preparation complete!");
    Ok(())
}

fn run_train(
    config: &PipelineConfig,
    input: Option<&Path>,
    output: &Path,
    report: Option<&Path>,
    no_confirm: bool,
) -> Result<()> {
    print_banner(env!("CARGO_PKG_VERSION"));
    print_config(config, input, output);

    if !confirm_overwrite(output, no_confirm)? {
        print_info("Cancelled by user.");
        return Ok(());
    }
    let report_path: PathBuf = report
        .map(Path::to_path_buf)
        .unwrap_or_else(|| derive_path(output, "_evaluation", Some("json")));

    let (accidents, mut step) = match input {
        Some(path) => {
            print_step_header(1, "Load Prepared Dataset");
            let spinner = create_spinner("Reading dataset...");
            let df = load_dataset(path)
                .with_context(|| format!("Failed to load {}", path.display()))?;
            finish_with_success(&spinner, "Dataset loaded");
            print_count("accident(s)", df.height(), None);
            (df, 2)
        }
        None => {
            let (df, summary) = prepare_accidents(config)?;
            summary.display();
            (df, 3)
        }
    };

    print_step_header(step, "Encode, Rebalance and Fit");
    let step_start = Instant::now();
    let spinner = create_spinner(&format!("Training {} classifier...", config.classifier.kind));
    let outcome = match train_model(&accidents, config) {
        Ok(outcome) => {
            finish_with_success(&spinner, "Classifier trained");
            outcome
        }
        Err(e) => {
            finish_with_error(&spinner, "Training failed");
            return Err(e).context("Failed to train the classifier");
        }
    };
    print_count("encoded feature(s)", outcome.counts.encoded_features, None);
    print_step_time(step_start.elapsed());
    step += 1;

    print_step_header(step, "Save Model");
    let step_start = Instant::now();
    outcome
        .bundle
        .save(output)
        .with_context(|| format!("Failed to write model bundle {}", output.display()))?;
    print_success(&format!("Model bundle saved to {}", output.display()));

    let input_label = input
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| config.source.data_dir.display().to_string());
    export_evaluation(
        &report_path,
        &input_label,
        output,
        &outcome.bundle.manifest,
        config,
        &outcome.counts,
        &outcome.evaluation,
    )?;
    print_success(&format!("Evaluation report saved to {}", report_path.display()));
    print_step_time(step_start.elapsed());

    display_evaluation(&outcome.evaluation, &outcome.counts);
    println!();
    print_info(&outcome.bundle.manifest.label_space_note);
    print_completion(&format!(
        "Training complete! Macro F1 {:.3}",
        outcome.evaluation.macro_f1
    ));
    Ok(())
}

fn run_predict(model: &Path, input: &Path, output: Option<&Path>, no_confirm: bool) -> Result<()> {
    let output = output
        .map(Path::to_path_buf)
        .unwrap_or_else(|| derive_path(input, "_predicted", None));
    if !confirm_overwrite(&output, no_confirm)? {
        print_info("Cancelled by user.");
        return Ok(());
    }

    let bundle = ModelBundle::load(model)
        .with_context(|| format!("Failed to load model bundle {}", model.display()))?;
    let rows = load_dataset(input).with_context(|| format!("Failed to load {}", input.display()))?;

    let missing: Vec<&String> = bundle
        .manifest
        .feature_columns
        .iter()
        .filter(|c| !rows.get_column_names().iter().any(|n| n.as_str() == c.as_str()))
        .collect();
    if !missing.is_empty() {
        print_warning(&format!(
            "{} feature column(s) absent, using documented defaults",
            missing.len()
        ));
    }

    let spinner = create_spinner("Scoring rows...");
    let mut scored = bundle.predict_frame(&rows)?;
    finish_with_success(&spinner, &format!("Scored {} row(s)", scored.height()));

    let mut per_class: BTreeMap<i64, usize> = BTreeMap::new();
    for class in scored.column(PREDICTION_COLUMN)?.i64()?.into_iter().flatten() {
        *per_class.entry(class).or_insert(0) += 1;
    }
    for (class, count) in per_class {
        let label = u8::try_from(class)
            .ok()
            .and_then(Severity::from_ordinal)
            .map(|s| s.label())
            .unwrap_or("unknown");
        print_count(&format!("predicted {}", label), count, None);
    }

    save_dataset(&mut scored, &output)
        .with_context(|| format!("Failed to write {}", output.display()))?;
    print_success(&format!("Saved to {}", output.display()));
    Ok(())
}

fn run_explore(input: &Path, top: usize) -> Result<()> {
    let df = load_dataset(input).with_context(|| format!("Failed to load {}", input.display()))?;
    let profile = profile_dataset(&df)?;
    display_profile(&profile, top);
    println!();
    Ok(())
}
