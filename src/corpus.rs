//! Corpus document sources for random-document prompting
//!
//! A corpus is a directory of gzip-compressed JSON-lines shards (`*.json.gz`),
//! each line one document with a `text` field. Shards can also be fetched from
//! a dataset repository on the HuggingFace Hub and then read the same way.

use anyhow::{Context, Result};
use flate2::read::GzDecoder;
use hf_hub::{api::sync::Api, Repo, RepoType};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::Serialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Shard file suffix
pub const SHARD_SUFFIX: &str = ".json.gz";

/// Field holding a document's text
pub const TEXT_FIELD: &str = "text";

/// A single corpus document
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub text: String,
    pub id: Option<String>,
    /// Shard the document was read from
    pub source: PathBuf,
}

impl Document {
    fn from_value(value: &serde_json::Value, source: &Path) -> Option<Self> {
        let text = value.get(TEXT_FIELD)?.as_str()?.to_string();
        let id = value
            .get("id")
            .and_then(serde_json::Value::as_str)
            .map(str::to_string);
        Some(Self {
            text,
            id,
            source: source.to_path_buf(),
        })
    }
}

/// A raw record sampled from a shard
#[derive(Debug, Clone, Serialize)]
pub struct SampledRecord {
    pub shard: PathBuf,
    pub record: serde_json::Value,
}

/// Anything that yields corpus documents.
///
/// The iterator is lazy, finite and not restartable: call `documents` again
/// to start a new pass.
pub trait DocumentSource {
    fn documents(&mut self) -> Result<Box<dyn Iterator<Item = Result<Document>> + '_>>;
}

/// Read every line of a gzip shard into memory as raw bytes.
///
/// Lines are not decoded here: a line with invalid UTF-8 only fails when it
/// is parsed, so it cannot abort the whole read.
pub fn read_shard_lines(path: &Path) -> Result<Vec<Vec<u8>>> {
    let file =
        File::open(path).with_context(|| format!("Failed to open shard {}", path.display()))?;
    let reader = BufReader::new(GzDecoder::new(file));
    reader
        .split(b'\n')
        .collect::<std::io::Result<Vec<_>>>()
        .with_context(|| format!("Failed to decompress {}", path.display()))
}

/// Streams the documents of one gzip shard line by line
#[derive(Debug, Clone)]
pub struct ShardReader {
    path: PathBuf,
}

impl ShardReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Open the shard and stream its documents.
    ///
    /// Unparseable lines are skipped with a warning; lines without a `text`
    /// field are skipped silently.
    pub fn open(&self) -> Result<Box<dyn Iterator<Item = Result<Document>>>> {
        let file = File::open(&self.path)
            .with_context(|| format!("Failed to open shard {}", self.path.display()))?;
        let lines = BufReader::new(GzDecoder::new(file)).split(b'\n');
        let path = self.path.clone();

        let iter = lines.enumerate().filter_map(move |(line_no, line)| {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    return Some(Err(anyhow::Error::new(e)
                        .context(format!("Failed to read {}", path.display()))))
                }
            };
            if line.trim_ascii().is_empty() {
                return None;
            }
            match serde_json::from_slice::<serde_json::Value>(&line) {
                Ok(value) => {
                    let doc = Document::from_value(&value, &path);
                    if doc.is_none() {
                        debug!("Line {} of {} has no text", line_no + 1, path.display());
                    }
                    doc.map(Ok)
                }
                Err(e) => {
                    warn!(
                        "Skipping unparseable line {} of {}: {}",
                        line_no + 1,
                        path.display(),
                        e
                    );
                    None
                }
            }
        });

        Ok(Box::new(iter))
    }
}

impl DocumentSource for ShardReader {
    fn documents(&mut self) -> Result<Box<dyn Iterator<Item = Result<Document>> + '_>> {
        self.open()
    }
}

/// A directory of `*.json.gz` shards
#[derive(Debug, Clone)]
pub struct ShardDirectory {
    dir: PathBuf,
}

impl ShardDirectory {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Shard files in the directory, sorted by name (none if it does not exist)
    pub fn shards(&self) -> Result<Vec<PathBuf>> {
        if !self.dir.is_dir() {
            warn!("Corpus directory {} does not exist", self.dir.display());
            return Ok(Vec::new());
        }
        let entries = std::fs::read_dir(&self.dir)
            .with_context(|| format!("Failed to list {}", self.dir.display()))?;

        let mut shards = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_shard = path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.ends_with(SHARD_SUFFIX));
            if is_shard && path.is_file() {
                shards.push(path);
            }
        }
        shards.sort();
        Ok(shards)
    }

    /// Pick a random shard, then a random line of it, and return its document.
    ///
    /// `Ok(None)` when there is nothing usable (no shards, empty shard,
    /// unparseable line, no `text` field); callers fall back to the bare prompt.
    pub fn sample_document<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Option<Document>> {
        let shards = self.shards()?;
        let Some(shard) = shards.choose(rng) else {
            warn!("No {} files found in {}", SHARD_SUFFIX, self.dir.display());
            return Ok(None);
        };
        info!("Sampling from file: {}", shard.display());

        let lines = read_shard_lines(shard)?;
        let Some(line) = lines.choose(rng) else {
            warn!("No lines found in {}", shard.display());
            return Ok(None);
        };

        match serde_json::from_slice::<serde_json::Value>(line) {
            Ok(value) => Ok(Document::from_value(&value, shard)),
            Err(e) => {
                warn!("Error decoding JSON from {}: {}", shard.display(), e);
                Ok(None)
            }
        }
    }

    /// Sample `num_docs` records (with replacement) from one random shard
    pub fn sample_records<R: Rng + ?Sized>(
        &self,
        num_docs: usize,
        rng: &mut R,
    ) -> Result<Vec<SampledRecord>> {
        let shards = self.shards()?;
        let Some(shard) = shards.choose(rng) else {
            warn!("No {} files found in {}", SHARD_SUFFIX, self.dir.display());
            return Ok(Vec::new());
        };
        info!("Sampling from file: {}", shard.display());

        let lines = read_shard_lines(shard)?;
        if lines.is_empty() {
            warn!("No lines found in {}", shard.display());
            return Ok(Vec::new());
        }

        let mut out = Vec::with_capacity(num_docs);
        for _ in 0..num_docs {
            let Some(line) = lines.choose(rng) else {
                break;
            };
            match serde_json::from_slice(line) {
                Ok(record) => out.push(SampledRecord {
                    shard: shard.clone(),
                    record,
                }),
                Err(e) => warn!("Could not parse line as JSON: {}", e),
            }
        }
        Ok(out)
    }

    /// Sample up to `per_shard` distinct records from every shard
    pub fn sample_from_each<R: Rng + ?Sized>(
        &self,
        per_shard: usize,
        rng: &mut R,
    ) -> Result<Vec<SampledRecord>> {
        let mut out = Vec::new();
        for shard in self.shards()? {
            let lines = read_shard_lines(&shard)?;
            let picked: Vec<&Vec<u8>> = lines.choose_multiple(rng, per_shard).collect();
            debug!("Sampled {} lines from {}", picked.len(), shard.display());

            for line in picked {
                match serde_json::from_slice(line) {
                    Ok(record) => out.push(SampledRecord {
                        shard: shard.clone(),
                        record,
                    }),
                    Err(e) => warn!("Could not parse line in {}: {}", shard.display(), e),
                }
            }
        }
        Ok(out)
    }
}

impl DocumentSource for ShardDirectory {
    fn documents(&mut self) -> Result<Box<dyn Iterator<Item = Result<Document>> + '_>> {
        let shards = self.shards()?;
        let iter = shards.into_iter().flat_map(|shard| {
            let docs: Box<dyn Iterator<Item = Result<Document>>> =
                match ShardReader::new(shard).open() {
                    Ok(docs) => docs,
                    Err(e) => Box::new(std::iter::once(Err(e))),
                };
            docs
        });
        Ok(Box::new(iter))
    }
}

/// The first `limit` documents of a source, in stream order
pub fn first_documents(source: &mut dyn DocumentSource, limit: usize) -> Result<Vec<Document>> {
    source.documents()?.take(limit).collect()
}

/// A shard stored in a dataset repository on the HuggingFace Hub
#[derive(Debug, Clone)]
pub struct HubShard {
    pub repo_id: String,
    pub filename: String,
    pub revision: Option<String>,
}

impl HubShard {
    pub fn new(repo_id: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            repo_id: repo_id.into(),
            filename: filename.into(),
            revision: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    /// Download (or reuse the cached copy of) the shard
    pub fn fetch(&self) -> Result<ShardReader> {
        let api = Api::new()?;
        let repo = match &self.revision {
            Some(rev) => Repo::with_revision(self.repo_id.clone(), RepoType::Dataset, rev.clone()),
            None => Repo::new(self.repo_id.clone(), RepoType::Dataset),
        };
        info!("Fetching {} from dataset {}", self.filename, self.repo_id);
        let path = api
            .repo(repo)
            .get(&self.filename)
            .with_context(|| format!("Failed to download {}", self.filename))?;
        Ok(ShardReader::new(path))
    }
}

impl DocumentSource for HubShard {
    fn documents(&mut self) -> Result<Box<dyn Iterator<Item = Result<Document>> + '_>> {
        self.fetch()?.open()
    }
}
