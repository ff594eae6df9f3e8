//! External configuration: search areas and category tag rules.
//!
//! Both files are consumed as opaque data maintained elsewhere; the
//! engine only needs their shape, not their contents.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::Path;

use crate::tags::{TagMap, TagRule};

/// A named city or district with its search center and default span.
#[derive(Debug, Deserialize, Clone)]
pub struct AreaDef {
    pub name: String,
    pub lat: f64,
    pub lng: f64,
    #[serde(default = "default_span_km")]
    pub span_km: f64,
}

fn default_span_km() -> f64 {
    4.0
}

#[derive(Debug, Deserialize, Clone)]
pub struct AreaConfig {
    pub areas: Vec<AreaDef>,
}

impl AreaConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read area config file")?;
        let config: AreaConfig =
            toml::from_str(&content).context("Failed to parse area config file")?;
        Ok(config)
    }

    pub fn find(&self, name: &str) -> Option<&AreaDef> {
        self.areas.iter().find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

/// One category to discover, in configured order.
#[derive(Debug, Deserialize, Clone)]
pub struct CategoryDef {
    pub name: String,
    /// Food categories get the relevance-hint treatment
    #[serde(default)]
    pub food: bool,
    #[serde(default)]
    pub rules: Vec<TagRule>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CategoryConfig {
    /// Relevance hints AND-combined into every food category's filters
    #[serde(default)]
    pub food_hints: Vec<TagMap>,
    pub categories: Vec<CategoryDef>,
}

impl CategoryConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read category config file")?;
        let config: CategoryConfig =
            toml::from_str(&content).context("Failed to parse category config file")?;
        Ok(config)
    }

    /// Keep only the named categories, preserving config order.
    pub fn filter(&self, names: &[String]) -> Vec<CategoryDef> {
        if names.is_empty() {
            return self.categories.clone();
        }
        self.categories
            .iter()
            .filter(|c| names.iter().any(|n| n.eq_ignore_ascii_case(&c.name)))
            .cloned()
            .collect()
    }
}
