//! Named prompt table used by the generation drivers

use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::path::Path;

/// Key used when a requested prompt is not in the table
pub const DEFAULT_PROMPT_KEY: &str = "default";

/// Read-only mapping from prompt name to prompt text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PromptBank {
    prompts: BTreeMap<String, String>,
    fallback_key: String,
}

impl PromptBank {
    /// Build a bank from `(name, prompt)` pairs
    pub fn new<I, K, V>(prompts: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            prompts: prompts
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
            fallback_key: DEFAULT_PROMPT_KEY.to_string(),
        }
    }

    /// Use a different fallback key
    pub fn with_fallback(mut self, key: impl Into<String>) -> Self {
        self.fallback_key = key.into();
        self
    }

    /// Prompts used throughout the diversity study
    pub fn builtin() -> Self {
        Self::new([
            ("creative_story", "Write a 500-word creative story:"),
            (
                "default",
                "The United States of America (USA), also known as the United States (U.S.) or \
                 America, is a country primarily located in North America. It",
            ),
            (
                "NLP_research",
                "Write a numbered list of 100 new research projects in natural language \
                 processing:1. diversyfying the open source language model output 2. Finding \
                 correlation between the human brain and language models 3. ",
            ),
            (
                "NLP_research_no_examples",
                "Write a numbered list of 100 new research projects in natural language \
                 processing:1. ",
            ),
            ("haiku", "Write a haiku:"),
            ("poem", "Write a 250-word poem:"),
        ])
    }

    /// Load a bank from a JSON object of `{"name": "prompt"}`
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read prompt table {}", path.display()))?;
        let prompts: BTreeMap<String, String> = serde_json::from_str(&content)
            .with_context(|| format!("Invalid prompt table {}", path.display()))?;
        Ok(Self::new(prompts))
    }

    /// Prompt for `key`, else the fallback prompt, else `""`
    pub fn get(&self, key: &str) -> &str {
        self.prompts
            .get(key)
            .or_else(|| self.prompts.get(&self.fallback_key))
            .map_or("", String::as_str)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.prompts.contains_key(key)
    }

    /// Prompt names in sorted order
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.prompts.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.prompts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prompts.is_empty()
    }
}

impl Default for PromptBank {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_keys() {
        let bank = PromptBank::builtin();
        assert_eq!(bank.len(), 6);
        assert_eq!(bank.get("haiku"), "Write a haiku:");
        assert!(bank.get("default").ends_with("North America. It"));
    }

    #[test]
    fn test_fallback_to_default() {
        let bank = PromptBank::builtin();
        assert_eq!(bank.get("no_such_prompt"), bank.get("default"));
    }

    #[test]
    fn test_missing_fallback_is_empty() {
        let bank = PromptBank::new([("haiku", "Write a haiku:")]);
        assert_eq!(bank.get("poem"), "");

        let bank = bank.with_fallback("haiku");
        assert_eq!(bank.get("poem"), "Write a haiku:");
    }

    #[test]
    fn test_keys_are_sorted() {
        let bank = PromptBank::new([("b", "2"), ("a", "1")]);
        assert_eq!(bank.keys().collect::<Vec<_>>(), vec!["a", "b"]);
    }
}
