#![recursion_limit = "256"]

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use santorini_nnet::encoding::{encoding_tensor, mask_tensor};
use santorini_nnet::{ArchitectureRegistry, Evaluator, EvaluatorConfig};

#[cfg(feature = "wgpu")]
type CliBackend = burn::backend::Wgpu;
#[cfg(not(feature = "wgpu"))]
type CliBackend = burn::backend::NdArray<f32>;

/// Build a Santorini evaluation network and run it on a random position.
#[derive(Parser)]
#[command(name = "santorini-nnet", about = "Evaluate a random Santorini position")]
struct Cli {
    /// Path to TOML configuration file
    #[arg(long, default_value = "nnet.toml")]
    config: PathBuf,

    /// Override the network version from the config file
    #[arg(long)]
    version: Option<u32>,

    /// List the registered network versions and exit
    #[arg(long)]
    list: bool,

    /// Print a config file with all default values and exit
    #[arg(long)]
    print_config: bool,

    /// Seed for the random position
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Number of boards evaluated in one batch
    #[arg(long, default_value_t = 1)]
    batch: usize,

    /// How many of the most likely moves to report per board
    #[arg(long, default_value_t = 5)]
    top: usize,

    /// Print the result as JSON
    #[arg(long)]
    json: bool,
}

#[derive(serde::Serialize)]
struct BoardReport {
    top_moves: Vec<(usize, f32)>,
    value: Vec<f32>,
}

#[derive(serde::Serialize)]
struct Report {
    version: u32,
    boards: Vec<BoardReport>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().filter_or(env_logger::DEFAULT_FILTER_ENV, "info"))
        .target(env_logger::Target::Stderr)
        .init();

    let cli = Cli::parse();

    if cli.list {
        let registry = ArchitectureRegistry::<CliBackend>::standard();
        for version in registry.versions() {
            println!("{version}");
        }
        return Ok(());
    }
    if cli.print_config {
        print!("{}", EvaluatorConfig::default_toml());
        return Ok(());
    }
    if cli.batch == 0 {
        bail!("--batch must be at least 1");
    }

    let mut config = EvaluatorConfig::load_or_default(&cli.config)
        .with_context(|| format!("loading config from {}", cli.config.display()))?;
    if let Some(version) = cli.version {
        config.version = version;
    }

    let device = Default::default();
    let evaluator = Evaluator::<CliBackend>::new(&config, &device)
        .with_context(|| format!("building network version {}", config.version))?;

    let board = *evaluator.board();
    let actions = evaluator.action_size();
    let mut rng = StdRng::seed_from_u64(cli.seed);
    let encoding: Vec<f32> = (0..cli.batch * board.len())
        .map(|_| rng.random_range(-2i32..=4) as f32)
        .collect();
    let valid = vec![true; cli.batch * actions];

    let encoding = encoding_tensor::<CliBackend>(&encoding, cli.batch, &board, &device)?;
    let mask = mask_tensor::<CliBackend>(&valid, cli.batch, actions, &device)?;
    let out = evaluator
        .evaluate(encoding, mask, false)
        .context("evaluating random position")?;

    let log_policy: Vec<f32> = out
        .log_policy
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;
    let values: Vec<f32> = out
        .value
        .into_data()
        .convert::<f32>()
        .to_vec()
        .map_err(|e| anyhow::anyhow!("{e:?}"))?;

    let boards: Vec<BoardReport> = log_policy
        .chunks(actions)
        .zip(values.chunks(evaluator.num_players()))
        .map(|(row, value)| {
            let mut moves: Vec<(usize, f32)> = row.iter().map(|lp| lp.exp()).enumerate().collect();
            moves.sort_by(|a, b| b.1.total_cmp(&a.1));
            moves.truncate(cli.top);
            BoardReport {
                top_moves: moves,
                value: value.to_vec(),
            }
        })
        .collect();

    let report = Report {
        version: evaluator.version(),
        boards,
    };

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Network version {}", report.version);
        for (i, board) in report.boards.iter().enumerate() {
            println!("Board {i}:");
            for (action, prob) in &board.top_moves {
                println!("  move {action:>4}  p={prob:.4}");
            }
            let values: Vec<String> = board.value.iter().map(|v| format!("{v:+.4}")).collect();
            println!("  value  [{}]", values.join(", "));
        }
    }

    Ok(())
}
