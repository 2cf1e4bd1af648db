//! divlm-rs CLI: corpus sampling, generation runs and completion-log analysis

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use divlm_rs::{
    analyze_log, first_documents, run_all, write_summary, AnalysisConfig, DiversityModel,
    Experiment, ExperimentConfig, HubShard, PromptBank, PromptStrategy, SamplingConfig,
    ShardDirectory,
};
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser)]
#[command(name = "divlm-rs")]
#[command(about = "Language-model output diversity in Rust")]
#[command(version)]
struct Cli {
    /// Verbose output (per-token metrics)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Print random documents from a directory of .json.gz shards, or the
    /// first documents of a shard in a Hub dataset
    Sample {
        /// Directory containing corpus shards
        #[arg(long, env = "DATA_DIR", default_value = "dolma/data")]
        data_dir: PathBuf,

        /// Number of documents to sample
        #[arg(short, long, default_value = "3")]
        num_docs: usize,

        /// Sample `num_docs` from every shard instead of one random shard
        #[arg(long)]
        per_shard: bool,

        /// Random seed
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Hub dataset repository to stream from instead of --data-dir
        #[arg(long, requires = "hub_file")]
        hub_repo: Option<String>,

        /// Shard path inside the Hub dataset (e.g. data/v1_5r2_sample-0000.json.gz)
        #[arg(long, requires = "hub_repo")]
        hub_file: Option<String>,

        /// Dataset revision
        #[arg(long)]
        hub_revision: Option<String>,
    },

    /// Generate completions for one prompt key
    Generate {
        /// Prompt bank key
        #[arg(short, long, default_value = "default")]
        prompt: String,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Generate completions for every prompt key in the bank
    GenerateAll {
        /// Prompt keys to skip
        #[arg(long, num_args = 1..)]
        skip: Vec<String>,

        #[command(flatten)]
        run: RunArgs,
    },

    /// Length, n-gram diversity and n-gram entropy statistics of a completion log
    Stats {
        /// Path to the JSONL log
        #[arg(long, default_value = "random_prompt_outputs.jsonl")]
        jsonl: PathBuf,

        /// Minimum n-gram size
        #[arg(long, default_value = "1")]
        min_n: usize,

        /// Maximum n-gram size
        #[arg(long, default_value = "5")]
        max_n: usize,

        /// Output directory for the JSON summary (default: graphs/ next to the log)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List the prompt bank
    Prompts {
        /// JSON prompt table (default: built-in prompts)
        #[arg(long)]
        prompts: Option<PathBuf>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum StrategyArg {
    Normal,
    RandomDoc,
}

impl From<StrategyArg> for PromptStrategy {
    fn from(arg: StrategyArg) -> Self {
        match arg {
            StrategyArg::Normal => PromptStrategy::Normal,
            StrategyArg::RandomDoc => PromptStrategy::RandomDoc,
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Model preset (olmo-1b, olmo-2-7b, olmo-2-13b) or HuggingFace model ID
    #[arg(short, long, default_value = "olmo-2-7b")]
    model: String,

    /// Prompting strategy
    #[arg(long, value_enum, default_value = "random-doc")]
    strategy: StrategyArg,

    /// Number of completions to generate per prompt
    #[arg(short, long, default_value = "300")]
    num_completions: usize,

    /// Maximum number of tokens to generate
    #[arg(long, default_value = "500")]
    max_tokens: usize,

    /// Directory containing corpus shards
    #[arg(long, env = "DATA_DIR", default_value = "dolma/data")]
    data_dir: PathBuf,

    /// Root directory for completion logs
    #[arg(short, long, default_value = "completions_eval_store")]
    output: PathBuf,

    /// JSON prompt table (default: built-in prompts)
    #[arg(long)]
    prompts: Option<PathBuf>,

    /// Sampling temperature (0.0 = greedy)
    #[arg(long, default_value = "1.0")]
    temperature: f32,

    /// Top-k filtering (0 = disabled)
    #[arg(long, default_value = "50")]
    top_k: usize,

    /// Nucleus sampling threshold (1.0 = disabled)
    #[arg(long, default_value = "0.95")]
    top_p: f32,

    /// Random seed
    #[arg(long, default_value = "42")]
    seed: u64,

    /// Store per-token entropy/perplexity in every record
    #[arg(long)]
    token_details: bool,

    /// Force CPU mode
    #[arg(long)]
    cpu: bool,
}

impl RunArgs {
    fn config(&self, prompt_key: &str) -> ExperimentConfig {
        ExperimentConfig {
            prompt_key: prompt_key.to_string(),
            strategy: self.strategy.into(),
            num_completions: self.num_completions,
            max_tokens: self.max_tokens,
            sampling: SamplingConfig {
                temperature: self.temperature,
                top_k: (self.top_k > 0).then_some(self.top_k),
                top_p: (self.top_p < 1.0).then_some(self.top_p),
                seed: self.seed,
            },
            data_dir: self.data_dir.clone(),
            output_root: self.output.clone(),
            store_token_details: self.token_details,
        }
    }
}

fn load_prompts(path: Option<&PathBuf>) -> Result<PromptBank> {
    match path {
        Some(path) => PromptBank::load(path),
        None => Ok(PromptBank::builtin()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    match cli.command {
        Command::Sample {
            hub_repo: Some(repo),
            hub_file: Some(file),
            hub_revision,
            num_docs,
            ..
        } => {
            let mut shard = HubShard::new(repo, file);
            if let Some(rev) = hub_revision {
                shard = shard.with_revision(rev);
            }
            let docs = first_documents(&mut shard, num_docs)?;
            for (i, doc) in docs.iter().enumerate() {
                println!("--- Document {} ({}) ---", i + 1, shard.filename);
                println!("{}", serde_json::to_string_pretty(doc)?);
            }
        }

        Command::Sample {
            data_dir,
            num_docs,
            per_shard,
            seed,
            ..
        } => {
            let corpus = ShardDirectory::new(&data_dir);
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            let sampled = if per_shard {
                corpus.sample_from_each(num_docs, &mut rng)?
            } else {
                corpus.sample_records(num_docs, &mut rng)?
            };
            for (i, sample) in sampled.iter().enumerate() {
                println!("--- Document {} ({}) ---", i + 1, sample.shard.display());
                println!("{}", serde_json::to_string_pretty(&sample.record)?);
            }
        }

        Command::Generate { prompt, run } => {
            let prompts = load_prompts(run.prompts.as_ref())?;
            println!("Available prompts: {:?}", prompts.keys().collect::<Vec<_>>());

            let mut model = DiversityModel::from_pretrained_with_device(&run.model, Some(run.cpu))?;
            let results = Experiment::new(&mut model, &prompts, run.config(&prompt)).run()?;

            println!("\n=== Results ===");
            println!("Completions: {}", results.completions);
            println!("Average entropy: {:.4}", results.mean_entropy);
            println!("Average perplexity: {:.4}", results.mean_perplexity);
            println!("Saved to {}", results.output_path.display());
        }

        Command::GenerateAll { skip, run } => {
            let prompts = load_prompts(run.prompts.as_ref())?;
            let mut model = DiversityModel::from_pretrained_with_device(&run.model, Some(run.cpu))?;
            let base = run.config(divlm_rs::DEFAULT_PROMPT_KEY);

            let results = run_all(&mut model, &prompts, &base, &skip);

            println!("\n=== Results ===");
            for res in &results {
                println!(
                    "{:<28} entropy {:.4}  perplexity {:.4}  -> {}",
                    res.prompt_key,
                    res.mean_entropy,
                    res.mean_perplexity,
                    res.output_path.display()
                );
            }
        }

        Command::Stats {
            jsonl,
            min_n,
            max_n,
            output,
        } => {
            let config = AnalysisConfig {
                min_n,
                max_n,
                ..Default::default()
            };
            let analysis = analyze_log(&jsonl, &config)?;
            analysis.print_summary();

            let path = write_summary(&analysis, &jsonl, output.as_deref())?;
            info!("Statistics saved to {}", path.display());
        }

        Command::Prompts { prompts } => {
            let prompts = load_prompts(prompts.as_ref())?;
            for key in prompts.keys() {
                println!("{key}: {}", prompts.get(key));
            }
        }
    }

    Ok(())
}
