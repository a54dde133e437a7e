//! From→To model rewriting for a channel.
//!
//! A `from` pattern containing `*` is a glob compiled to an anchored regex;
//! anything else matches only the identical model name.

use crate::config::ModelMapping;
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::warn;

#[derive(Debug, Default)]
pub struct ModelMapper {
    rules: Vec<ModelMapping>,
    /// Compiled glob patterns, shared by every request routed to the channel.
    cache: RwLock<HashMap<String, Option<Arc<Regex>>>>,
}

fn is_glob(pattern: &str) -> bool {
    pattern.contains('*')
}

fn glob_to_regex(pattern: &str) -> String {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    format!("^{body}$")
}

impl ModelMapper {
    pub fn new(rules: Vec<ModelMapping>) -> Self {
        Self {
            rules,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn rules(&self) -> &[ModelMapping] {
        &self.rules
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    fn compiled(&self, pattern: &str) -> Option<Arc<Regex>> {
        {
            let cache = self.cache.read().unwrap_or_else(|e| e.into_inner());
            if let Some(hit) = cache.get(pattern) {
                return hit.clone();
            }
        }

        let mut cache = self.cache.write().unwrap_or_else(|e| e.into_inner());
        // Another reader may have filled it while we waited for the write lock.
        if let Some(hit) = cache.get(pattern) {
            return hit.clone();
        }
        let compiled = match Regex::new(&glob_to_regex(pattern)) {
            Ok(re) => Some(Arc::new(re)),
            Err(e) => {
                warn!(pattern, error = %e, "invalid model mapping pattern");
                None
            }
        };
        cache.insert(pattern.to_string(), compiled.clone());
        compiled
    }

    fn rule_matches(&self, pattern: &str, model: &str) -> bool {
        if !is_glob(pattern) {
            return pattern == model;
        }
        self.compiled(pattern).is_some_and(|re| re.is_match(model))
    }

    /// Target of the first matching rule.
    pub fn lookup(&self, model: &str) -> Option<&str> {
        self.rules
            .iter()
            .find(|rule| self.rule_matches(&rule.from, model))
            .map(|rule| rule.to.as_str())
    }

    /// `model` rewritten by the first matching rule, or unchanged.
    pub fn map(&self, model: &str) -> String {
        self.lookup(model).unwrap_or(model).to_string()
    }

    #[cfg(test)]
    fn cached_patterns(&self) -> usize {
        self.cache.read().map(|c| c.len()).unwrap_or(0)
    }
}
