//! Form-factor reweighting of semitauonic decay samples.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use ffweight::{
    ChannelSignature, RecordReader, ReweightConfig, Reweighter, TemplateEvaluator, WeightSink,
};

#[derive(Parser)]
#[command(name = "ffweight")]
#[command(about = "Recompute form-factor weights for a semitauonic truth-level sample")]
#[command(version)]
struct Cli {
    /// Input table (Parquet)
    input: PathBuf,

    /// Output table (Parquet, created fresh)
    output: PathBuf,

    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: tracing::Level,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_max_level(cli.log_level)
        .with_target(false)
        .init();

    let config = ReweightConfig::semitauonic();
    let evaluator = TemplateEvaluator::new(vec![ChannelSignature::semitauonic()]);
    let mut reweighter = Reweighter::new(config, evaluator)?;

    let input = cli.input.to_string_lossy().into_owned();
    let output = cli.output.to_string_lossy().into_owned();
    // Claim the output path before touching the input; an unwritable
    // destination must fail before any event is processed.
    let sink = WeightSink::create(&output)?;
    let roles = reweighter.config().topology.roles();
    let reader = RecordReader::open(&input, &roles)?;

    let (table, summary) = reweighter.run(reader)?;
    sink.commit(&table)?;
    tracing::info!(
        rows_written = summary.rows_written,
        output = %cli.output.display(),
        "output table committed"
    );

    Ok(())
}
