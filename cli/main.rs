// Command-line front end for fecoef.
//
// Thin orchestration around the library: load a table, build the validated
// membership, run the requested recoverer or solver, write a TSV. All index-base
// translation happens here and in `LoadedTable::membership`; the library itself
// only ever sees zero-based ids.

#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand, ValueEnum};
use fecoef::bipartite::{BipartiteInput, recover_bipartite};
use fecoef::config::Settings;
use fecoef::data::load_table;
use fecoef::deriv::solve_cluster_derivative;
use fecoef::general::recover_general;
use fecoef::shared::index::ObservationOrdering;
use fecoef::types::{CoefficientRow, RecoveryStatus, reconstruct_sum_fe};
use ndarray::Array1;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process;

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum MethodCli {
    /// Two-way fast path when there are exactly two dimensions, general otherwise
    Auto,
    Bipartite,
    General,
}

#[derive(Args)]
pub struct TableArgs {
    /// Path to the delimited input table (with a header row)
    pub table: PathBuf,

    /// Category id column of one fixed-effect dimension; repeat in dimension order
    #[arg(long = "fe", value_name = "COLUMN", required = true)]
    pub fe: Vec<String>,

    /// Field delimiter of the input table
    #[arg(long, default_value = "\t")]
    pub delimiter: char,

    /// Category ids in the table start at 1 instead of 0
    #[arg(long)]
    pub one_based: bool,

    /// Optional TOML settings file; explicit flags take precedence
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,
}

#[derive(Args)]
pub struct RecoverArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Column holding the per-observation sum of fixed effects
    #[arg(long, default_value = "sum_fe")]
    pub sum_fe: String,

    #[arg(long, value_enum, default_value_t = MethodCli::Auto)]
    pub method: MethodCli,

    /// Cap on reference passes
    #[arg(long, value_name = "N")]
    pub max_passes: Option<usize>,

    /// Cap on propagation sweeps per pass (general method)
    #[arg(long, value_name = "N")]
    pub max_sweeps: Option<usize>,

    /// Output TSV path
    #[arg(long, default_value = "coefficients.tsv")]
    pub output: PathBuf,
}

#[derive(Args)]
pub struct DerivArgs {
    #[command(flatten)]
    pub table: TableArgs,

    /// Column holding the observation-level second derivative
    #[arg(long, default_value = "second_derivative")]
    pub second_derivative: String,

    /// Column holding the observation-level partial-derivative contribution
    #[arg(long, default_value = "contribution")]
    pub contribution: String,

    /// Column holding the starting value of each observation
    #[arg(long, default_value = "initial")]
    pub initial: String,

    /// Convergence tolerance on per-category updates
    #[arg(long)]
    pub tolerance: Option<f64>,

    /// Maximum number of Gauss-Seidel sweeps
    #[arg(long, value_name = "N")]
    pub max_iterations: Option<usize>,

    /// Output TSV path
    #[arg(long, default_value = "derivatives.tsv")]
    pub output: PathBuf,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Recover per-category coefficients from the per-observation sum of fixed effects
    #[command(about = "Recover fixed-effect coefficients (outputs: coefficients.tsv)")]
    Recover(RecoverArgs),

    /// Solve the cluster-derivative fixed point
    #[command(about = "Solve the cluster-derivative fixed point (outputs: derivatives.tsv)")]
    Deriv(DerivArgs),

    /// Display version information
    Version,
}

#[derive(Parser)]
#[command(
    name = "fecoef",
    version,
    about = "Exact recovery of fixed-effect coefficients from multi-way fixed-effects models."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Commands>,
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let Cli { command } = Cli::parse();
    let result = match command {
        Some(Commands::Recover(args)) => recover(args),
        Some(Commands::Deriv(args)) => deriv(args),
        Some(Commands::Version) => {
            println!("fecoef {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, Box<dyn std::error::Error>> {
    match path {
        Some(path) => {
            log::info!("Loading settings from '{}'", path.display());
            Ok(Settings::load(path)?)
        }
        None => Ok(Settings::default()),
    }
}

fn delimiter_byte(delimiter: char) -> Result<u8, Box<dyn std::error::Error>> {
    u8::try_from(delimiter)
        .ok()
        .filter(u8::is_ascii)
        .ok_or_else(|| format!("delimiter '{delimiter}' must be a single ASCII character").into())
}

pub fn recover(args: RecoverArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = load_settings(args.table.config.as_deref())?;
    if let Some(max_passes) = args.max_passes {
        settings.recovery.max_passes = max_passes;
    }
    if let Some(max_sweeps) = args.max_sweeps {
        settings.recovery.max_sweeps = max_sweeps;
    }
    settings.validate()?;

    let table = load_table(
        &args.table.table,
        delimiter_byte(args.table.delimiter)?,
        &args.table.fe,
        std::slice::from_ref(&args.sum_fe),
    )?;
    let membership = table.membership(args.table.one_based)?;
    let sum_fe = &table.values[0];

    let use_bipartite = match args.method {
        MethodCli::Auto => membership.n_dims() == 2,
        MethodCli::Bipartite => true,
        MethodCli::General => false,
    };

    let (rows, coefficients, status): (Vec<CoefficientRow>, Vec<Array1<f64>>, RecoveryStatus) =
        if use_bipartite {
            let input = BipartiteInput::from_observations(&membership, sum_fe.view())?;
            let result = recover_bipartite(&input, &settings.recovery)?;
            (
                result.rows().to_vec(),
                vec![result.values(0), result.values(1)],
                result.status,
            )
        } else {
            let ordering = ObservationOrdering::from_membership(&membership);
            let result =
                recover_general(&membership, sum_fe.view(), &ordering, &settings.recovery)?;
            (result.rows(), result.coefficients, result.status)
        };

    let fitted = reconstruct_sum_fe(&membership, &coefficients);
    let max_residual = fitted
        .iter()
        .zip(sum_fe.iter())
        .map(|(f, s)| (f - s).abs())
        .fold(0.0f64, f64::max);
    log::info!("Largest absolute sumFE reconstruction error: {max_residual:.3e}");
    if !status.converged {
        log::warn!("Recovery hit an iteration cap; coefficients may be incomplete.");
    }

    let base = usize::from(args.table.one_based);
    let mut out = BufWriter::new(File::create(&args.output)?);
    writeln!(out, "dimension\tcategory\tcoefficient\tis_reference")?;
    for row in &rows {
        writeln!(
            out,
            "{}\t{}\t{}\t{}",
            args.table.fe[row.dimension],
            row.category + base,
            row.value,
            row.is_reference
        )?;
    }
    out.flush()?;
    println!("Coefficients saved to: {}", args.output.display());
    Ok(())
}

pub fn deriv(args: DerivArgs) -> Result<(), Box<dyn std::error::Error>> {
    let mut settings = load_settings(args.table.config.as_deref())?;
    if let Some(tolerance) = args.tolerance {
        settings.fixed_point.tolerance = tolerance;
    }
    if let Some(max_iterations) = args.max_iterations {
        settings.fixed_point.max_iterations = max_iterations;
    }
    settings.validate()?;

    let value_columns = [
        args.second_derivative.clone(),
        args.contribution.clone(),
        args.initial.clone(),
    ];
    let table = load_table(
        &args.table.table,
        delimiter_byte(args.table.delimiter)?,
        &args.table.fe,
        &value_columns,
    )?;
    let membership = table.membership(args.table.one_based)?;

    let solution = solve_cluster_derivative(
        &membership,
        table.values[0].view(),
        table.values[1].view(),
        table.values[2].view(),
        &settings.fixed_point,
    )?;
    log::info!(
        "Cluster derivative: {} sweeps, converged: {}, last max update {:.3e}",
        solution.iterations,
        solution.converged,
        solution.max_update
    );

    let mut out = BufWriter::new(File::create(&args.output)?);
    writeln!(out, "value")?;
    for value in solution.values.iter() {
        writeln!(out, "{value}")?;
    }
    out.flush()?;
    println!("Derivatives saved to: {}", args.output.display());
    Ok(())
}
