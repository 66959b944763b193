//! sqw-eval: list, inspect and evaluate S(q,w) models from the command line.

use anyhow::{anyhow, bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use sqwrs::model::{construct_sqw, get_sqw_names, load_sqw_plugins, SqwModel};
use sqwrs::runtime::{BatchEvaluator, RuntimeConfig};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "sqw-eval")]
#[command(version = VERSION)]
#[command(about = "Evaluate dynamical structure factor models S(q,w)")]
struct Cli {
    /// Directory to load model plugins from
    #[arg(long, global = true)]
    plugins: Option<PathBuf>,

    /// Run the model in a child process
    #[arg(long, global = true)]
    isolated: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// List available models
    List,
    /// Print a model's variables
    Vars(ModelArgs),
    /// Evaluate S at one point
    Eval {
        #[command(flatten)]
        model: ModelArgs,
        #[arg(allow_negative_numbers = true)]
        h: f64,
        #[arg(allow_negative_numbers = true)]
        k: f64,
        #[arg(allow_negative_numbers = true)]
        l: f64,
        #[arg(allow_negative_numbers = true)]
        e: f64,
    },
    /// Evaluate S along a straight path in (h, k, l, E)
    Scan {
        #[command(flatten)]
        model: ModelArgs,
        /// Start point as "h k l E"
        #[arg(long, allow_hyphen_values = true)]
        from: String,
        /// End point as "h k l E"
        #[arg(long, allow_hyphen_values = true)]
        to: String,
        /// Number of points including both ends
        #[arg(long, default_value = "101")]
        steps: usize,
        /// Worker threads (0 = one per CPU)
        #[arg(long, default_value = "0")]
        workers: usize,
    },
}

#[derive(Args, Debug)]
struct ModelArgs {
    /// Model identifier, see `list`
    model: String,
    /// Model configuration or data file
    #[arg(short, long, default_value = "")]
    config: String,
    /// Override a variable, as name=value (repeatable)
    #[arg(long = "set", value_name = "NAME=VALUE")]
    set: Vec<String>,
}

fn parse_point(s: &str) -> Result<[f64; 4]> {
    let vals = s
        .split(|c: char| c.is_whitespace() || c == ',')
        .filter(|t| !t.is_empty())
        .map(|t| t.parse::<f64>().with_context(|| format!("invalid number '{}'", t)))
        .collect::<Result<Vec<_>>>()?;
    <[f64; 4]>::try_from(vals).map_err(|v| anyhow!("expected 4 values (h k l E), got {}", v.len()))
}

fn build_model(cli: &Cli, args: &ModelArgs) -> Result<Box<dyn SqwModel>> {
    let built = if cli.isolated {
        isolated(&args.model, &args.config)?
    } else {
        construct_sqw(&args.model, &args.config)
    };
    let mut model = built.ok_or_else(|| anyhow!("unknown model '{}', see `sqw-eval list`", args.model))?;
    for assignment in &args.set {
        let (name, value) = assignment
            .split_once('=')
            .ok_or_else(|| anyhow!("expected NAME=VALUE, got '{}'", assignment))?;
        if !model.set_var_if_avail(name.trim(), value.trim()) {
            tracing::warn!("model has no variable \"{}\"", name.trim());
        }
    }

    if !model.is_ok() {
        bail!("model '{}' failed to initialise from '{}'", args.model, args.config);
    }
    Ok(model)
}

#[cfg(target_os = "linux")]
fn isolated(ident: &str, cfg: &str) -> Result<Option<Box<dyn SqwModel>>> {
    Ok(sqwrs::proc::construct_sqw_isolated(ident, cfg))
}

#[cfg(not(target_os = "linux"))]
fn isolated(_ident: &str, _cfg: &str) -> Result<Option<Box<dyn SqwModel>>> {
    bail!("--isolated is only supported on Linux")
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    if let Some(dir) = &cli.plugins {
        let n = load_sqw_plugins(dir);
        tracing::info!("loaded {} plugins from {}", n, dir.display());
    }

    match &cli.command {
        Command::List => {
            for (ident, desc) in get_sqw_names() {
                println!("{:<16}{}", ident, desc);
            }
        }
        Command::Vars(args) => {
            let model = build_model(&cli, args)?;
            for var in model.vars() {
                println!("{:<16}{:<10}{}", var.name, var.ty, var.value);
            }
        }
        Command::Eval { model, h, k, l, e } => {
            let m = build_model(&cli, model)?;
            println!("{}", m.evaluate(*h, *k, *l, *e));
        }
        Command::Scan {
            model,
            from,
            to,
            steps,
            workers,
        } => {
            let from = parse_point(from).context("--from")?;
            let to = parse_point(to).context("--to")?;
            let m = build_model(&cli, model)?;

            let config = match *workers {
                0 => RuntimeConfig::default(),
                n => RuntimeConfig { worker_count: n },
            };
            let evaluator = BatchEvaluator::new(config)?;
            println!("# h k l E S");
            for ([h, k, l, e], s) in evaluator.scan(m.as_ref(), from, to, *steps) {
                println!("{} {} {} {} {}", h, k, l, e, s);
            }
        }
    }
    Ok(())
}
