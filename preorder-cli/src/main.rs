use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use preorder_core::{
    create_trainer, load_examples, load_sentences, Model, OutputFormat, ParseOptions, Strategy,
    TrainOptions, Trainer,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Train and apply a preordering model for machine translation")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a reordering model from factored sentences and word alignments.
    Train(TrainArgs),
    /// Reorder factored sentences with a trained model.
    Parse(ParseArgs),
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    /// Factored source sentences, one per line, factors tab-separated.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,
    /// Word alignments, one `N-M ||| i-j ...` line per sentence.
    #[arg(short = 'a', long = "align")]
    align: PathBuf,
    /// Where to write the trained model.
    #[arg(short = 'm', long = "model")]
    model: PathBuf,
    #[arg(long, value_enum, default_value_t = StrategyArg::Batch)]
    strategy: StrategyArg,
    /// Worker threads (default: auto detected).
    #[arg(short = 't', long)]
    threads: Option<usize>,
    /// Factors per token.
    #[arg(short = 'f', long, default_value_t = 3)]
    factors: usize,
    /// Examples per mini-batch (batch strategy).
    #[arg(short = 'b', long, default_value_t = 20)]
    batch: usize,
    /// Maximum training epochs.
    #[arg(long, default_value_t = 20)]
    iterations: usize,
    /// Beam width during parsing.
    #[arg(long, default_value_t = 20)]
    beam: usize,
    /// How many n-best derivations feed each update (at most the beam width).
    #[arg(short = 'k', long, default_value_t = 5)]
    kbest: usize,
    /// Stop once an epoch finishes without errors.
    #[arg(long, default_value_t = false)]
    early_stop: bool,
    /// Shuffle the examples every epoch, recommended.
    #[arg(long, default_value_t = false)]
    shuffle: bool,
    /// Normalize the batch loss by the batch size, recommended for large
    /// datasets.
    #[arg(long, default_value_t = false)]
    batch_norm: bool,
    /// Write a checkpoint every k epochs (0 disables).
    #[arg(long, default_value_t = 0)]
    save_step: usize,
    #[arg(long, default_value_t = 1)]
    seed: u64,
}

#[derive(clap::Args, Debug)]
struct ParseArgs {
    /// Factored source sentences, one per line, factors tab-separated.
    #[arg(short = 'i', long = "input")]
    input: PathBuf,
    /// Trained model to score with.
    #[arg(short = 'm', long = "model")]
    model: PathBuf,
    /// Worker threads (default: auto detected).
    #[arg(short = 't', long)]
    threads: Option<usize>,
    #[arg(long, value_enum, default_value_t = FormatArg::Order)]
    format: FormatArg,
    /// Factors per token.
    #[arg(short = 'f', long, default_value_t = 3)]
    factors: usize,
    /// Beam width during parsing.
    #[arg(long, default_value_t = 20)]
    beam: usize,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum StrategyArg {
    Online,
    Batch,
    Distributed,
    IterDistributed,
}

impl From<StrategyArg> for Strategy {
    fn from(arg: StrategyArg) -> Strategy {
        match arg {
            StrategyArg::Online => Strategy::Online,
            StrategyArg::Batch => Strategy::Batch,
            StrategyArg::Distributed => Strategy::Distributed,
            StrategyArg::IterDistributed => Strategy::IterDistributed,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum FormatArg {
    /// Reordered token indices.
    Order,
    /// Parse transitions as `pivot-orientation`.
    Action,
}

impl From<FormatArg> for OutputFormat {
    fn from(arg: FormatArg) -> OutputFormat {
        match arg {
            FormatArg::Order => OutputFormat::Order,
            FormatArg::Action => OutputFormat::Action,
        }
    }
}

fn train(args: TrainArgs) -> anyhow::Result<()> {
    let defaults = TrainOptions::default();
    let options = TrainOptions {
        strategy: args.strategy.into(),
        iterations: args.iterations,
        threads: args.threads.unwrap_or(defaults.threads),
        factors: args.factors,
        beam: args.beam,
        kbest: args.kbest.min(args.beam),
        batch: args.batch,
        batch_norm: args.batch_norm,
        early_stop: args.early_stop,
        shuffle: args.shuffle,
        save_step: args.save_step,
        seed: args.seed,
        model_path: Some(args.model.clone()),
    };

    let sentences = load_sentences(&args.input, options.factors)
        .with_context(|| format!("loading {}", args.input.display()))?;
    let mut examples = load_examples(&args.align, sentences)
        .with_context(|| format!("loading {}", args.align.display()))?;
    anyhow::ensure!(!examples.is_empty(), "no usable training examples");

    let trainer = create_trainer(options);
    let mut model = Model::new();
    trainer.train(&mut examples, &mut model)?;
    model
        .write(&args.model)
        .with_context(|| format!("writing {}", args.model.display()))?;
    Ok(())
}

fn parse(args: ParseArgs) -> anyhow::Result<()> {
    let options = ParseOptions {
        threads: args.threads.unwrap_or(ParseOptions::default().threads),
        factors: args.factors,
        beam: args.beam,
        format: args.format.into(),
    };
    let sentences = load_sentences(&args.input, options.factors)
        .with_context(|| format!("loading {}", args.input.display()))?;
    let model = Model::read(&args.model)
        .with_context(|| format!("reading {}", args.model.display()))?;

    let parser = preorder_core::Parser::new(options.beam);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(options.threads)
        .build()
        .context("building the parsing worker pool")?;
    let lines = pool.install(|| parser.permute(&sentences, options.format, &model));
    let mut out = String::with_capacity(lines.iter().map(|l| l.len() + 1).sum());
    for line in lines {
        out.push_str(&line);
        out.push('\n');
    }
    print!("{out}");
    Ok(())
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Train(args) => train(args),
        Command::Parse(args) => parse(args),
    }
}
