//! Experiment runner for completion-diversity generation runs
//!
//! Generates many completions for a prompt key, optionally prepending a random
//! corpus document to each prompt, and appends one record per completion to a
//! JSON-lines log.

use anyhow::Result;
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::corpus::ShardDirectory;
use crate::model::{DiversityModel, GenerationOutput};
use crate::prompts::{PromptBank, DEFAULT_PROMPT_KEY};
use crate::records::{CompletionRecord, LogWriter, PromptType};
use crate::sampling::{Sampler, SamplingConfig};

/// How the prompt of each completion is built
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptStrategy {
    /// The prompt from the bank, unchanged
    Normal,
    /// A freshly sampled corpus document, a newline, then the prompt
    RandomDoc,
}

impl PromptStrategy {
    pub fn prompt_type(self) -> PromptType {
        match self {
            PromptStrategy::Normal => PromptType::NormalPrompt,
            PromptStrategy::RandomDoc => PromptType::RandomDoc,
        }
    }

    fn file_suffix(self) -> &'static str {
        match self {
            PromptStrategy::Normal => "normal",
            PromptStrategy::RandomDoc => "random",
        }
    }
}

/// Anything that can produce a completion with metrics
pub trait Generator {
    fn model_id(&self) -> &str;

    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        sampler: &mut Sampler,
    ) -> Result<GenerationOutput>;
}

impl Generator for DiversityModel {
    fn model_id(&self) -> &str {
        DiversityModel::model_id(self)
    }

    fn generate(
        &mut self,
        prompt: &str,
        max_tokens: usize,
        sampler: &mut Sampler,
    ) -> Result<GenerationOutput> {
        self.generate_with_metrics(prompt, max_tokens, sampler)
    }
}

/// Configuration for a generation run
#[derive(Debug, Clone)]
pub struct ExperimentConfig {
    /// Prompt bank key
    pub prompt_key: String,
    pub strategy: PromptStrategy,
    pub num_completions: usize,
    /// Maximum new tokens per completion
    pub max_tokens: usize,
    pub sampling: SamplingConfig,
    /// Directory of corpus shards (random-document strategy only)
    pub data_dir: PathBuf,
    /// Root of the per-prompt output directories
    pub output_root: PathBuf,
    /// Store per-token details in every record
    pub store_token_details: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            prompt_key: DEFAULT_PROMPT_KEY.to_string(),
            strategy: PromptStrategy::Normal,
            num_completions: 300,
            max_tokens: 500,
            sampling: SamplingConfig::default(),
            data_dir: PathBuf::from("dolma/data"),
            output_root: PathBuf::from("completions_eval_store"),
            store_token_details: false,
        }
    }
}

impl ExperimentConfig {
    /// `<output_root>/<key>/<key>_<normal|random>_prompt_output.jsonl`
    pub fn output_path(&self) -> PathBuf {
        self.output_root.join(&self.prompt_key).join(format!(
            "{}_{}_prompt_output.jsonl",
            self.prompt_key,
            self.strategy.file_suffix()
        ))
    }
}

/// Summary of a finished run
#[derive(Debug, Clone)]
pub struct ExperimentResults {
    pub prompt_key: String,
    pub output_path: PathBuf,
    pub completions: usize,
    /// Mean over completions of the per-completion mean entropy
    pub mean_entropy: f64,
    /// Mean over completions of the per-completion mean perplexity
    pub mean_perplexity: f64,
}

/// Prepend a document to a prompt, separated by a newline
pub fn build_prompt(document: Option<&str>, prompt: &str) -> String {
    match document {
        Some(doc) if !doc.is_empty() => format!("{doc}\n{prompt}"),
        _ => prompt.to_string(),
    }
}

/// Main experiment runner
pub struct Experiment<'a, G: Generator> {
    config: ExperimentConfig,
    generator: &'a mut G,
    prompts: &'a PromptBank,
}

impl<'a, G: Generator> Experiment<'a, G> {
    pub fn new(generator: &'a mut G, prompts: &'a PromptBank, config: ExperimentConfig) -> Self {
        Self {
            config,
            generator,
            prompts,
        }
    }

    pub fn config(&self) -> &ExperimentConfig {
        &self.config
    }

    /// Run every completion, appending each record as soon as it is produced
    pub fn run(&mut self) -> Result<ExperimentResults> {
        info!("Starting generation run");
        info!("Config: {:?}", self.config);

        let original_prompt = self.prompts.get(&self.config.prompt_key).to_string();
        info!("Using prompt: {}", original_prompt);

        let output_path = self.config.output_path();
        let mut writer = LogWriter::open(&output_path)?;
        let corpus = ShardDirectory::new(&self.config.data_dir);
        let mut doc_rng = StdRng::seed_from_u64(self.config.sampling.seed);
        let mut sampler = Sampler::new(self.config.sampling.clone());

        let mut entropy_sum = 0.0;
        let mut perplexity_sum = 0.0;

        for completion_idx in 0..self.config.num_completions {
            info!(
                "Generating completion {}/{}",
                completion_idx + 1,
                self.config.num_completions
            );

            let document = match self.config.strategy {
                PromptStrategy::Normal => None,
                PromptStrategy::RandomDoc => {
                    let doc = corpus.sample_document(&mut doc_rng)?;
                    if doc.is_none() {
                        warn!("No sampled text found. Proceeding with default prompt.");
                    }
                    doc
                }
            };

            let prompt = build_prompt(document.as_ref().map(|d| d.text.as_str()), &original_prompt);
            let output = self
                .generator
                .generate(&prompt, self.config.max_tokens, &mut sampler)?;

            let random_doc = self.config.strategy == PromptStrategy::RandomDoc;
            let record = CompletionRecord {
                prompt,
                full_output: output.full_output,
                completion_only: output.completion_only,
                model: self.generator.model_id().to_string(),
                completion_idx,
                avg_token_entropy: output.metrics.mean_entropy,
                avg_token_perplexity: output.metrics.mean_perplexity,
                prompt_type: self.config.strategy.prompt_type(),
                original_prompt: random_doc.then(|| original_prompt.clone()),
                random_doc: random_doc
                    .then(|| document.as_ref().map(|d| d.text.clone()).unwrap_or_default()),
                random_doc_file_path: document
                    .as_ref()
                    .map(|d| d.source.display().to_string()),
                token_details: self
                    .config
                    .store_token_details
                    .then_some(output.token_details),
            };
            writer.append(&record)?;

            entropy_sum += output.metrics.mean_entropy;
            perplexity_sum += output.metrics.mean_perplexity;

            info!(
                "Average entropy: {:.4}, average perplexity: {:.4}",
                output.metrics.mean_entropy, output.metrics.mean_perplexity
            );
        }

        let completions = self.config.num_completions;
        let (mean_entropy, mean_perplexity) = if completions == 0 {
            (0.0, 0.0)
        } else {
            (
                entropy_sum / completions as f64,
                perplexity_sum / completions as f64,
            )
        };

        info!(
            "Completed {} completions, saved to {}",
            completions,
            output_path.display()
        );

        Ok(ExperimentResults {
            prompt_key: self.config.prompt_key.clone(),
            output_path,
            completions,
            mean_entropy,
            mean_perplexity,
        })
    }
}

/// Run the same configuration for every prompt key not in `skip`.
///
/// A failing key is logged and the remaining keys still run.
pub fn run_all<G: Generator>(
    generator: &mut G,
    prompts: &PromptBank,
    base: &ExperimentConfig,
    skip: &[String],
) -> Vec<ExperimentResults> {
    let keys: Vec<String> = prompts.keys().map(str::to_string).collect();
    info!("Found {} prompts in the prompt bank: {:?}", keys.len(), keys);

    let mut results = Vec::new();
    for (i, key) in keys.iter().enumerate() {
        if skip.contains(key) {
            info!("Skipping prompt: {}", key);
            continue;
        }
        info!("[{}/{}] Running prompt: {}", i + 1, keys.len(), key);

        let config = ExperimentConfig {
            prompt_key: key.clone(),
            ..base.clone()
        };
        match Experiment::new(generator, prompts, config).run() {
            Ok(res) => results.push(res),
            Err(e) => warn!("Error running prompt {}: {:#}", key, e),
        }
    }
    results
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::SequenceMetrics;
    use crate::records::read_records;

    struct EchoGenerator {
        prompts_seen: Vec<String>,
        fail_on: Option<String>,
    }

    impl EchoGenerator {
        fn new() -> Self {
            Self {
                prompts_seen: Vec::new(),
                fail_on: None,
            }
        }
    }

    impl Generator for EchoGenerator {
        fn model_id(&self) -> &str {
            "echo"
        }

        fn generate(
            &mut self,
            prompt: &str,
            _max_tokens: usize,
            _sampler: &mut Sampler,
        ) -> Result<GenerationOutput> {
            if self.fail_on.as_deref() == Some(prompt) {
                anyhow::bail!("generation failed");
            }
            self.prompts_seen.push(prompt.to_string());
            Ok(GenerationOutput {
                prompt: prompt.to_string(),
                full_output: format!("{prompt} more words"),
                completion_only: "more words".to_string(),
                prompt_tokens: vec![1],
                generated_tokens: vec![2, 3],
                token_details: Vec::new(),
                metrics: SequenceMetrics {
                    mean_entropy: 1.0,
                    mean_perplexity: 2.0,
                },
            })
        }
    }

    #[test]
    fn test_build_prompt() {
        assert_eq!(build_prompt(Some("doc"), "Write:"), "doc\nWrite:");
        assert_eq!(build_prompt(Some(""), "Write:"), "Write:");
        assert_eq!(build_prompt(None, "Write:"), "Write:");
    }

    #[test]
    fn test_output_path_layout() {
        let config = ExperimentConfig {
            prompt_key: "haiku".into(),
            strategy: PromptStrategy::RandomDoc,
            output_root: PathBuf::from("store"),
            ..Default::default()
        };
        assert_eq!(
            config.output_path(),
            PathBuf::from("store/haiku/haiku_random_prompt_output.jsonl")
        );
    }

    #[test]
    fn test_config_defaults() {
        let config = ExperimentConfig::default();
        assert_eq!(config.num_completions, 300);
        assert_eq!(config.max_tokens, 500);
        assert_eq!(config.prompt_key, "default");
        assert_eq!(config.sampling.top_k, Some(50));
    }

    #[test]
    fn test_normal_run_writes_records() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = PromptBank::builtin();
        let mut generator = EchoGenerator::new();
        let config = ExperimentConfig {
            prompt_key: "haiku".into(),
            num_completions: 3,
            output_root: dir.path().to_path_buf(),
            ..Default::default()
        };

        let results = Experiment::new(&mut generator, &prompts, config)
            .run()
            .unwrap();
        assert_eq!(results.completions, 3);
        assert!((results.mean_entropy - 1.0).abs() < 1e-12);

        let completions = read_records(&results.output_path).unwrap().completions();
        assert_eq!(completions.len(), 3);
        assert_eq!(completions[2].completion_idx, 2);
        assert_eq!(completions[0].prompt, "Write a haiku:");
        assert_eq!(completions[0].prompt_type, PromptType::NormalPrompt);
        assert!(completions[0].random_doc.is_none());
    }

    #[test]
    fn test_random_doc_without_corpus_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let data_dir = dir.path().join("empty_corpus");
        std::fs::create_dir_all(&data_dir).unwrap();

        let prompts = PromptBank::builtin();
        let mut generator = EchoGenerator::new();
        let config = ExperimentConfig {
            prompt_key: "poem".into(),
            strategy: PromptStrategy::RandomDoc,
            num_completions: 1,
            data_dir,
            output_root: dir.path().to_path_buf(),
            ..Default::default()
        };

        let results = Experiment::new(&mut generator, &prompts, config)
            .run()
            .unwrap();
        assert_eq!(generator.prompts_seen, vec!["Write a 250-word poem:"]);

        let completions = read_records(&results.output_path).unwrap().completions();
        let record = &completions[0];
        assert_eq!(record.prompt_type, PromptType::RandomDoc);
        assert_eq!(record.random_doc.as_deref(), Some(""));
        assert_eq!(record.original_prompt.as_deref(), Some("Write a 250-word poem:"));
    }

    #[test]
    fn test_run_all_skips_and_continues() {
        let dir = tempfile::tempdir().unwrap();
        let prompts = PromptBank::new([("a", "prompt a"), ("b", "prompt b"), ("c", "prompt c")]);
        let mut generator = EchoGenerator::new();
        generator.fail_on = Some("prompt b".into());

        let base = ExperimentConfig {
            num_completions: 1,
            output_root: dir.path().to_path_buf(),
            ..Default::default()
        };
        let results = run_all(&mut generator, &prompts, &base, &["c".to_string()]);

        assert_eq!(results.len(), 1);
        assert_eq!(results[0].prompt_key, "a");
        assert_eq!(generator.prompts_seen, vec!["prompt a"]);
    }
}
