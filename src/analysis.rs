//! Offline analysis of completion logs
//!
//! One pass over a log computes, for the text field of every record:
//! character/word length statistics, per-document unique n-gram counts
//! (mean and population std) and the corpus-wide n-gram entropy for every n
//! in the configured range.

use anyhow::{Context, Result};
use serde::Serialize;
use statrs::statistics::Statistics;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::ngram::{
    corpus_entropy, per_document_unique_count, tokens, CorpusEntropyStats, NgramCounter,
};
use crate::records::{read_records, CompletionRecord, COMPLETION_FIELD};

/// Configuration for a log analysis pass
#[derive(Debug, Clone)]
pub struct AnalysisConfig {
    /// Smallest n-gram order (>= 1)
    pub min_n: usize,
    /// Largest n-gram order
    pub max_n: usize,
    /// Record field holding the text to analyze
    pub text_field: String,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            min_n: 1,
            max_n: 5,
            text_field: COMPLETION_FIELD.to_string(),
        }
    }
}

impl AnalysisConfig {
    pub fn validate(&self) -> Result<()> {
        if self.min_n == 0 {
            anyhow::bail!("min_n must be at least 1");
        }
        if self.min_n > self.max_n {
            anyhow::bail!(
                "min_n ({}) must not exceed max_n ({})",
                self.min_n,
                self.max_n
            );
        }
        Ok(())
    }

    pub fn orders(&self) -> std::ops::RangeInclusive<usize> {
        self.min_n..=self.max_n
    }
}

/// Mean and population standard deviation
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct DiversitySummary {
    pub mean: f64,
    pub std: f64,
}

impl DiversitySummary {
    /// Summarize a sample; zeros when empty
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self::default();
        }
        Self {
            mean: values.iter().mean(),
            std: values.iter().population_std_dev(),
        }
    }
}

/// Length of the analyzed texts
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LengthStats {
    /// Characters (Unicode scalar values)
    pub chars: DiversitySummary,
    /// Whitespace-delimited words
    pub words: DiversitySummary,
}

/// Statistics for one n-gram order
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NgramReport {
    pub n: usize,
    /// Distinct n-grams per document
    pub per_document: DiversitySummary,
    /// Entropy of the pooled n-gram distribution
    pub corpus: CorpusEntropyStats,
}

impl NgramReport {
    /// "unigrams", "2-grams", ...
    pub fn label(&self) -> String {
        if self.n == 1 {
            "unigrams".to_string()
        } else {
            format!("{}-grams", self.n)
        }
    }
}

/// Full analysis of one collection of completions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogAnalysis {
    /// Log file the records came from, if any
    pub source: Option<String>,
    /// Documents that had the text field
    pub documents: usize,
    /// Records without the text field
    pub missing_field: usize,
    /// Lines that could not be parsed
    pub skipped_lines: usize,
    pub lengths: LengthStats,
    pub ngrams: Vec<NgramReport>,
}

impl LogAnalysis {
    pub fn report(&self, n: usize) -> Option<&NgramReport> {
        self.ngrams.iter().find(|r| r.n == n)
    }

    /// Print a human-readable summary
    pub fn print_summary(&self) {
        if let Some(source) = &self.source {
            println!("Text statistics for '{source}':");
        }
        println!(
            "Mean length: {:.2} characters (std {:.2})",
            self.lengths.chars.mean, self.lengths.chars.std
        );
        println!(
            "Mean length: {:.2} words (std {:.2})",
            self.lengths.words.mean, self.lengths.words.std
        );
        for report in &self.ngrams {
            println!(
                "Mean unique {}: {:.2} (std {:.2})",
                report.label(),
                report.per_document.mean,
                report.per_document.std
            );
        }
        for report in &self.ngrams {
            println!(
                "{}: entropy {:.4}, max {:.4}, normalized {:.4} ({} unique)",
                report.label(),
                report.corpus.entropy,
                report.corpus.max_entropy,
                report.corpus.normalized_entropy,
                report.corpus.unique_ngrams
            );
        }
        println!("Number of samples analyzed: {}", self.documents);
    }
}

/// Analyze plain texts
pub fn analyze_texts<I, S>(texts: I, config: &AnalysisConfig) -> Result<LogAnalysis>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    config.validate()?;

    let orders: Vec<usize> = config.orders().collect();
    let mut char_lengths = Vec::new();
    let mut word_lengths = Vec::new();
    let mut unique_counts: Vec<Vec<f64>> = vec![Vec::new(); orders.len()];
    let mut counters: Vec<NgramCounter> = orders.iter().map(|&n| NgramCounter::new(n)).collect();

    for text in texts {
        let text = text.as_ref();
        char_lengths.push(text.chars().count() as f64);
        word_lengths.push(tokens(text).len() as f64);

        for (i, &n) in orders.iter().enumerate() {
            unique_counts[i].push(per_document_unique_count(text, n) as f64);
            counters[i].add_text(text);
        }
    }

    let ngrams = orders
        .iter()
        .zip(unique_counts.iter().zip(&counters))
        .map(|(&n, (counts, counter))| NgramReport {
            n,
            per_document: DiversitySummary::from_values(counts),
            corpus: corpus_entropy(counter),
        })
        .collect();

    Ok(LogAnalysis {
        source: None,
        documents: char_lengths.len(),
        missing_field: 0,
        skipped_lines: 0,
        lengths: LengthStats {
            chars: DiversitySummary::from_values(&char_lengths),
            words: DiversitySummary::from_values(&word_lengths),
        },
        ngrams,
    })
}

/// Analyze parsed records, skipping those without the text field
pub fn analyze_records(
    records: &[serde_json::Value],
    config: &AnalysisConfig,
) -> Result<LogAnalysis> {
    let texts: Vec<&str> = records
        .iter()
        .filter_map(|r| CompletionRecord::text_field(r, &config.text_field))
        .collect();
    let missing = records.len() - texts.len();
    if missing > 0 {
        debug!("{} records have no '{}' field", missing, config.text_field);
    }

    let mut analysis = analyze_texts(texts, config)?;
    analysis.missing_field = missing;
    Ok(analysis)
}

/// Read and analyze a JSONL log file
pub fn analyze_log(path: &Path, config: &AnalysisConfig) -> Result<LogAnalysis> {
    let read = read_records(path)?;
    let mut analysis = analyze_records(&read.records, config)?;
    analysis.source = Some(path.display().to_string());
    analysis.skipped_lines = read.skipped;
    info!(
        "Analyzed {} documents from {} ({} unparseable lines)",
        analysis.documents,
        path.display(),
        read.skipped
    );
    Ok(analysis)
}

/// Write `<stem>_stats.json` into `output_dir`, or a `graphs/` directory next
/// to the log when none is given
pub fn write_summary(
    analysis: &LogAnalysis,
    log_path: &Path,
    output_dir: Option<&Path>,
) -> Result<PathBuf> {
    let dir = match output_dir {
        Some(dir) => dir.to_path_buf(),
        None => log_path
            .parent()
            .map_or_else(|| PathBuf::from("graphs"), |p| p.join("graphs")),
    };
    std::fs::create_dir_all(&dir).with_context(|| format!("Failed to create {}", dir.display()))?;

    let stem = log_path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("completions");
    let out_path = dir.join(format!("{stem}_stats.json"));
    std::fs::write(&out_path, serde_json::to_string_pretty(analysis)?)
        .with_context(|| format!("Failed to write {}", out_path.display()))?;
    info!("Summary saved to {}", out_path.display());
    Ok(out_path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_config_validation() {
        assert!(AnalysisConfig::default().validate().is_ok());
        let zero = AnalysisConfig {
            min_n: 0,
            ..Default::default()
        };
        assert!(zero.validate().is_err());
        let inverted = AnalysisConfig {
            min_n: 3,
            max_n: 2,
            ..Default::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_summary_of_values() {
        let s = DiversitySummary::from_values(&[2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0]);
        assert!((s.mean - 5.0).abs() < 1e-9);
        assert!((s.std - 2.0).abs() < 1e-9);
        assert_eq!(DiversitySummary::from_values(&[]), DiversitySummary::default());
    }

    #[test]
    fn test_per_document_and_corpus_are_distinct() {
        let config = AnalysisConfig {
            min_n: 1,
            max_n: 1,
            ..Default::default()
        };
        let analysis = analyze_texts(["a a", "b b"], &config).unwrap();
        let report = analysis.report(1).unwrap();

        // one distinct unigram per document
        assert!((report.per_document.mean - 1.0).abs() < 1e-9);
        assert!(report.per_document.std.abs() < 1e-9);
        // pooled: {"a": 2, "b": 2}
        assert!((report.corpus.entropy - 1.0).abs() < 1e-12);
        assert!((report.corpus.normalized_entropy - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_short_documents_count_zero() {
        let config = AnalysisConfig {
            min_n: 3,
            max_n: 3,
            ..Default::default()
        };
        let analysis = analyze_texts(["a b c d", "x"], &config).unwrap();
        let report = analysis.report(3).unwrap();
        assert!((report.per_document.mean - 1.0).abs() < 1e-9);
        assert!((report.per_document.std - 1.0).abs() < 1e-9);
        assert_eq!(report.corpus.unique_ngrams, 2);
    }

    #[test]
    fn test_records_missing_field_are_skipped() {
        let records = vec![
            json!({"completion_only": "one two three"}),
            json!({"prompt": "no completion"}),
            json!({"completion_only": 7}),
            json!({"completion_only": "one two"}),
        ];
        let analysis = analyze_records(&records, &AnalysisConfig::default()).unwrap();
        assert_eq!(analysis.documents, 2);
        assert_eq!(analysis.missing_field, 2);
        assert!((analysis.lengths.words.mean - 2.5).abs() < 1e-9);
        assert!((analysis.lengths.words.std - 0.5).abs() < 1e-9);
        assert_eq!(analysis.ngrams.len(), 5);
    }

    #[test]
    fn test_empty_collection_is_all_zero() {
        let analysis = analyze_texts(Vec::<String>::new(), &AnalysisConfig::default()).unwrap();
        assert_eq!(analysis.documents, 0);
        assert_eq!(analysis.lengths, LengthStats::default());
        for report in &analysis.ngrams {
            assert_eq!(report.per_document, DiversitySummary::default());
            assert_eq!(report.corpus, CorpusEntropyStats::default());
        }
    }

    #[test]
    fn test_labels() {
        let analysis = analyze_texts(["a b"], &AnalysisConfig::default()).unwrap();
        assert_eq!(analysis.report(1).unwrap().label(), "unigrams");
        assert_eq!(analysis.report(4).unwrap().label(), "4-grams");
    }

    #[test]
    fn test_char_length_counts_scalars() {
        let config = AnalysisConfig {
            min_n: 1,
            max_n: 1,
            ..Default::default()
        };
        let analysis = analyze_texts(["héllo"], &config).unwrap();
        assert_eq!(analysis.lengths.chars.mean, 5.0);
    }
}
