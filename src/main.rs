#![deny(unused_variables)]
#![deny(dead_code)]
#![deny(unused_imports)]
#![deny(clippy::no_effect_underscore_binding)]

use clap::{Args, CommandFactory, Parser, Subcommand};
use ndarray::Array1;
use std::fmt::Write as FmtWrite;
use std::io::{self, BufWriter, Write};
use std::process;

use survextrap::fit::likelihood::SurvivalPosterior;
use survextrap::fit::mode::{ModeOptions, find_mode};
use survextrap::fit::model::{FittedHazard, ModelSpec};
use survextrap::fit::summary::{Profile, SummaryOptions, summarize};
use survextrap::fit::table::{load_draws, load_external, load_individual};
use survextrap::fit::LogDensity;
use survextrap::{KnotSet, MSplineBasis, rmst};

#[derive(Args)]
pub struct FitArgs {
    /// Model specification (TOML)
    pub spec: String,

    /// Individual data with time, status and covariate columns
    #[arg(long)]
    pub data: Option<String>,

    /// External survivor counts with start, stop, n, r and covariate columns
    #[arg(long)]
    pub external: Option<String>,

    /// Where to write the fitted baseline hazard
    #[arg(long, default_value = "model.toml")]
    pub output: String,

    /// Gradient-norm tolerance for BFGS
    #[arg(long, default_value = "1e-5")]
    pub tolerance: f64,

    /// Maximum number of BFGS iterations
    #[arg(long, default_value = "1000")]
    pub max_iterations: usize,
}

#[derive(Args)]
pub struct EvaluateArgs {
    /// Fitted hazard (TOML)
    pub model: String,

    /// Comma-separated evaluation times
    #[arg(long, value_delimiter = ',', required = true)]
    pub times: Vec<f64>,

    /// Also print the restricted mean survival time up to each time
    #[arg(long)]
    pub rmst: bool,
}

#[derive(Args)]
pub struct SummarizeArgs {
    /// Model specification (TOML)
    pub spec: String,

    /// Posterior draws; the header must list the parameter names
    #[arg(long)]
    pub draws: String,

    /// Comma-separated knots `lower,internal...,upper`; defaults to the spec's knots
    #[arg(long, value_delimiter = ',')]
    pub knots: Vec<f64>,

    /// Comma-separated evaluation times
    #[arg(long, value_delimiter = ',', required = true)]
    pub times: Vec<f64>,

    /// Width of the credible interval
    #[arg(long, default_value = "0.95")]
    pub interval: f64,

    /// Also summarise the restricted mean survival time up to each time
    #[arg(long)]
    pub rmst: bool,
}

#[derive(Parser)]
#[command(
    name = "survextrap",
    about = "Flexible M-spline survival models with extrapolation and evidence synthesis"
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Find the posterior mode and save the baseline hazard
    #[command(about = "Fit a model at its posterior mode (outputs: model.toml)")]
    Fit(FitArgs),

    /// Evaluate a fitted hazard at given times
    #[command(about = "Print hazard and survival of a fitted model as TSV")]
    Evaluate(EvaluateArgs),

    /// Summarise posterior draws for the baseline profile
    #[command(about = "Print posterior summaries of survival and hazard as TSV")]
    Summarize(SummarizeArgs),
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Some(Commands::Fit(args)) => fit(args),
        Some(Commands::Evaluate(args)) => evaluate(args),
        Some(Commands::Summarize(args)) => summarize_draws(args),
        None => Cli::command().print_help().map_err(Into::into),
    };

    if let Err(e) = result {
        eprintln!("Error: {e}");
        process::exit(1);
    }
}

fn fit(args: FitArgs) -> Result<(), Box<dyn std::error::Error>> {
    let spec = ModelSpec::load(&args.spec)?;
    let cure_covariates = if spec.cure {
        spec.cure_covariates.clone()
    } else {
        Vec::new()
    };
    let mut observations = Vec::new();
    if let Some(path) = &args.data {
        observations.extend(load_individual(path, &spec.covariates, &cure_covariates)?);
    }
    if let Some(path) = &args.external {
        observations.extend(load_external(path, &spec.covariates, &cure_covariates)?);
    }

    let data = spec.data_builder().build(&observations)?;
    let spline = data.spline.clone();
    let posterior = SurvivalPosterior::new(&spec, data)?;
    let options = ModeOptions {
        tolerance: args.tolerance,
        max_iterations: args.max_iterations,
    };
    let mode = find_mode(&posterior, posterior.default_start(), &options)?;

    let mut out = BufWriter::new(io::stdout().lock());
    writeln!(out, "parameter\tmode")?;
    for (name, value) in posterior.parameter_names().iter().zip(mode.point.iter()) {
        writeln!(out, "{name}\t{value}")?;
    }
    out.flush()?;

    let theta = mode.point.to_vec();
    FittedHazard::from_parameters(posterior.predictor(), &spline, &theta)?.save(&args.output)?;
    eprintln!(
        "Mode found in {} iterations (log-density {:.6}); baseline hazard saved to {}",
        mode.iterations, mode.log_density, args.output
    );
    Ok(())
}

fn evaluate(args: EvaluateArgs) -> Result<(), Box<dyn std::error::Error>> {
    let dist = FittedHazard::load(&args.model)?.to_distribution()?;
    let times = Array1::from(args.times);
    let hazard = dist.hazard(times.view())?;
    let survival = dist.survival(times.view())?;
    let restricted = if args.rmst {
        Some(rmst(&dist, times.view(), 0.0)?)
    } else {
        None
    };

    let mut out = BufWriter::new(io::stdout().lock());
    let mut line = String::from("time\thazard\tsurvival");
    if restricted.is_some() {
        line.push_str("\trmst");
    }
    writeln!(out, "{line}")?;
    for i in 0..times.len() {
        line.clear();
        write!(line, "{}\t{}\t{}", times[i], hazard[i], survival[i])?;
        if let Some(values) = &restricted {
            write!(line, "\t{}", values[i])?;
        }
        writeln!(out, "{line}")?;
    }
    out.flush()?;
    Ok(())
}

fn summarize_draws(args: SummarizeArgs) -> Result<(), Box<dyn std::error::Error>> {
    let spec = ModelSpec::load(&args.spec)?;
    let knots = if args.knots.is_empty() {
        spec.knots
            .clone()
            .ok_or("the spec has no knots; pass them with --knots")?
    } else {
        KnotSet::new(args.knots)?
    };
    let spline = MSplineBasis::new(knots, spec.degree);
    let predictor = spec.predictor(&spline)?;
    let draws = load_draws(&args.draws, predictor.layout().names())?;

    let options = SummaryOptions {
        rmst_horizons: if args.rmst { args.times.clone() } else { Vec::new() },
        times: args.times,
        interval: args.interval,
        ..SummaryOptions::default()
    };
    let rows = summarize(
        &predictor,
        &spline,
        draws.view(),
        &[Profile::baseline(&predictor)],
        &options,
    )?;

    let mut out = BufWriter::new(io::stdout().lock());
    writeln!(out, "quantity\tt\tmedian\tlower\tupper\tmean\tsd")?;
    for row in rows {
        let s = row.stats;
        writeln!(
            out,
            "{}\t{}\t{}\t{}\t{}\t{}\t{}",
            row.quantity, row.at, s.median, s.lower, s.upper, s.mean, s.sd
        )?;
    }
    out.flush()?;
    Ok(())
}
