//! Query expansion from a synonym dictionary.

use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

pub trait SynonymExpander: Send + Sync {
    /// Alternative phrasings of `query`; the original is always first and at
    /// most `max_expansions` variants follow it.
    fn expand(&self, query: &str, max_expansions: usize) -> Vec<String>;
}

const BUILTIN: &[(&str, &[&str])] = &[
    ("js", &["javascript"]),
    ("ts", &["typescript"]),
    ("py", &["python"]),
    ("k8s", &["kubernetes"]),
    ("db", &["database"]),
    ("ml", &["machine learning"]),
    ("ai", &["artificial intelligence", "llm"]),
    ("llm", &["language model"]),
    ("cli", &["command line", "terminal"]),
    ("ui", &["user interface"]),
    ("auth", &["authentication"]),
    ("orm", &["database mapper"]),
    ("http", &["web"]),
    ("vector", &["embedding"]),
    ("search", &["retrieval"]),
];

#[derive(Debug, Default, Deserialize)]
struct SynonymFile {
    #[serde(default)]
    synonyms: HashMap<String, Vec<String>>,
}

/// Token-level dictionary expansion: each variant swaps one token for one synonym.
#[derive(Debug, Clone, Default)]
pub struct DictionaryExpander {
    entries: HashMap<String, Vec<String>>,
}

impl DictionaryExpander {
    pub fn builtin() -> Self {
        let entries = BUILTIN
            .iter()
            .map(|(k, v)| (k.to_string(), v.iter().map(|s| s.to_string()).collect()))
            .collect();
        Self { entries }
    }

    /// Built-in table extended with a TOML file of the form
    /// `[synonyms]\nterm = ["alt", ...]`.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let mut expander = Self::builtin();
        let content = std::fs::read_to_string(path)?;
        let parsed: SynonymFile = toml::from_str(&content)?;
        for (term, alternatives) in parsed.synonyms {
            expander
                .entries
                .entry(term.to_lowercase())
                .or_default()
                .extend(alternatives);
        }
        Ok(expander)
    }
}

impl SynonymExpander for DictionaryExpander {
    fn expand(&self, query: &str, max_expansions: usize) -> Vec<String> {
        let original = query.trim().to_string();
        let mut variants = vec![original.clone()];
        let tokens: Vec<&str> = original.split_whitespace().collect();
        'outer: for (i, token) in tokens.iter().enumerate() {
            let Some(alternatives) = self.entries.get(&token.to_lowercase()) else {
                continue;
            };
            for alt in alternatives {
                if variants.len() > max_expansions {
                    break 'outer;
                }
                let mut replaced = tokens.clone();
                replaced[i] = alt.as_str();
                let variant = replaced.join(" ");
                if !variants.contains(&variant) {
                    variants.push(variant);
                }
            }
        }
        variants
    }
}
