// Pedantic clippy configuration for numerical research code
#![allow(clippy::cast_precision_loss)] // usize→f64 intentional in statistics
#![allow(clippy::cast_possible_truncation)] // usize→u32 token IDs
#![allow(clippy::module_name_repetitions)] // NgramCounter in ngram.rs is fine
// Documentation pedantic - acceptable for research code:
#![allow(clippy::doc_markdown)] // backticks for every technical term is excessive
#![allow(clippy::missing_errors_doc)] // # Errors section for every Result fn
#![allow(clippy::missing_panics_doc)] // # Panics section for every panic
// Method style pedantic:
#![allow(clippy::must_use_candidate)] // #[must_use] on every pure fn is excessive
#![allow(clippy::return_self_not_must_use)] // #[must_use] on Self returns
#![allow(clippy::needless_pass_by_value)] // value params for API flexibility

//! divlm-rs: Language-Model Output Diversity
//!
//! Measures how diverse a causal language model's completions are, both while
//! generating (token-level entropy and perplexity) and afterwards (n-gram
//! diversity and entropy over logged completions).
//!
//! ## Architecture
//!
//! - `metrics`: Token entropy/perplexity and sequence averages
//! - `ngram`: Whitespace n-grams, per-document unique counts, corpus n-gram entropy
//! - `analysis`: Single-pass statistics over a completion log
//! - `records`: JSON-lines completion records (tolerant reader, append-only writer)
//! - `prompts`: Named prompt table with fallback key
//! - `corpus`: Random documents from gzip JSONL shards, local or on the Hub
//! - `sampling`: Temperature / top-k / top-p sampling that exposes its distribution
//! - `model`: DiversityModel wrapper and metric-recording generation loop
//! - `forward_olmo`: OLMo / OLMo-2 backend on candle-transformers
//! - `experiment`: Generation runs writing completion logs

pub mod analysis;
pub mod corpus;
pub mod experiment;
pub mod forward_olmo;
pub mod metrics;
pub mod model;
pub mod ngram;
pub mod prompts;
pub mod records;
pub mod sampling;

pub use analysis::{
    analyze_log, analyze_records, analyze_texts, write_summary, AnalysisConfig, DiversitySummary,
    LengthStats, LogAnalysis, NgramReport,
};
pub use corpus::{
    first_documents, Document, DocumentSource, HubShard, SampledRecord, ShardDirectory,
    ShardReader,
};
pub use experiment::{
    build_prompt, run_all, Experiment, ExperimentConfig, ExperimentResults, Generator,
    PromptStrategy,
};
pub use forward_olmo::DivOlmo;
pub use metrics::{
    aggregate_sequence, compute_token_metric, softmax, GenerationStep, MetricsRecorder,
    SequenceMetrics, TokenMetric,
};
pub use model::{
    generate_steps, resolve_model_id, CausalBackend, DiversityModel, GenerationOutput,
    ModelArchitecture, MODEL_PRESETS,
};
pub use ngram::{
    accumulate_corpus_counts, corpus_entropy, ngrams, per_document_unique_count,
    CorpusEntropyStats, NgramCounter,
};
pub use prompts::{PromptBank, DEFAULT_PROMPT_KEY};
pub use records::{
    parse_lines, read_records, CompletionRecord, LogRead, LogWriter, PromptType, TokenDetail,
    COMPLETION_FIELD,
};
pub use sampling::{Sampler, SamplingConfig};
