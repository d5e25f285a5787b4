// ABOUTME: Environment variable value types with interpolation support.
// ABOUTME: Handles literal values and references to local environment variables.

use crate::error::{Error, Result};
use crate::exec::Env;
use serde::Deserialize;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum EnvValue {
    Literal(String),
    FromEnv {
        #[serde(rename = "env")]
        var: String,
        #[serde(default)]
        default: Option<String>,
    },
}

impl EnvValue {
    pub fn resolve(&self) -> Result<String> {
        match self {
            EnvValue::Literal(s) => Ok(s.clone()),
            EnvValue::FromEnv { var, default } => match std::env::var(var) {
                Ok(val) => Ok(val),
                Err(_) => default
                    .clone()
                    .ok_or_else(|| Error::MissingEnvVar(var.clone())),
            },
        }
    }
}

/// Resolve every entry of a configured environment map.
pub fn resolve_env_map(map: &HashMap<String, EnvValue>) -> Result<Env> {
    map.iter()
        .map(|(k, v)| v.resolve().map(|resolved| (k.clone(), resolved)))
        .collect::<Result<Vec<_>>>()
        .map(|pairs| pairs.into_iter().collect())
}
