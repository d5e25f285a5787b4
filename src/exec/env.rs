// ABOUTME: Environment mapping sent in front of remote commands.
// ABOUTME: Parses `env` output and layers command entries over device defaults.

use std::collections::BTreeMap;

/// Ordered environment mapping with unique keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Env {
    vars: BTreeMap<String, String>,
}

impl Env {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse `KEY=VALUE` lines as printed by `env`.
    ///
    /// Lines without `=` or whose key is not a shell variable name are
    /// skipped. Exported bash functions (`BASH_FUNC_name%%`) and the
    /// continuation lines of multi-line values fall in that group.
    pub fn parse(output: &str) -> Self {
        let mut env = Self::new();
        for line in output.lines() {
            env.add(line);
        }
        env
    }

    /// Add a single `KEY=VALUE` entry. Returns false if the entry was malformed.
    pub fn add(&mut self, entry: &str) -> bool {
        match entry.split_once('=') {
            Some((key, value)) => self.set(key, value),
            None => false,
        }
    }

    /// Set `key` to `value`, replacing any existing value.
    ///
    /// Keys that cannot be assigned with `KEY=VALUE` in front of a shell
    /// command are dropped and `false` is returned.
    pub fn set(&mut self, key: impl AsRef<str>, value: impl Into<String>) -> bool {
        let key = key.as_ref().trim();
        if !is_valid_name(key) {
            tracing::debug!("ignoring environment entry with invalid name {:?}", key);
            return false;
        }
        self.vars.insert(key.to_string(), value.into());
        true
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Layer `overrides` on top of `self`. Keys present in both take the
    /// value from `overrides`.
    pub fn merged(&self, overrides: &Env) -> Env {
        let mut vars = self.vars.clone();
        for (k, v) in &overrides.vars {
            vars.insert(k.clone(), v.clone());
        }
        Env { vars }
    }
}

/// POSIX shell variable name: `[A-Za-z_][A-Za-z0-9_]*`.
fn is_valid_name(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl<K: AsRef<str>, V: Into<String>> FromIterator<(K, V)> for Env {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut env = Env::new();
        for (k, v) in iter {
            env.set(k, v);
        }
        env
    }
}
