use config::{Config, ConfigError, File as ConfigFile};
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    /// Archives to process (zip paths). May be empty when the caller
    /// supplies archives some other way (e.g. CLI arguments).
    #[serde(default)]
    pub archive_paths: Vec<String>,
    /// Opaque tenant/context label; used for report labeling only.
    #[serde(default = "default_tenant")]
    pub tenant: String,
    /// Entry extensions treated as documents of interest.
    #[serde(default = "default_extensions")]
    pub document_extensions: Vec<String>,
    /// Recurse into nested archives.
    #[serde(default)]
    pub recurse_nested: bool,
    #[serde(default = "default_recursion_depth")]
    pub max_recursion_depth: usize,
    /// Worker pool size; 0 means available parallelism.
    #[serde(default)]
    pub worker_threads: usize,
    /// Wall-clock budget per archive, in seconds.
    #[serde(default = "default_archive_timeout")]
    pub archive_timeout_secs: u64,
    /// Triage: fraction of conflicts surfaced as top findings.
    #[serde(default = "default_top_percent")]
    pub top_percent: f64,
    /// Triage: floor on the number of top findings when enough exist.
    #[serde(default = "default_min_conflicts")]
    pub min_conflicts: usize,
    /// Monetary values above this are flagged as outliers.
    #[serde(default = "default_amount_outlier")]
    pub amount_outlier_threshold: f64,
    /// Competitor names matched against free-text fields.
    #[serde(default)]
    pub competitor_terms: Vec<String>,
}

fn default_tenant() -> String {
    "default".to_string()
}

fn default_extensions() -> Vec<String> {
    ["csv", "xlsx", "xls", "ods"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_recursion_depth() -> usize {
    3
}

fn default_archive_timeout() -> u64 {
    300
}

fn default_top_percent() -> f64 {
    0.10
}

fn default_min_conflicts() -> usize {
    5
}

fn default_amount_outlier() -> f64 {
    1_000_000.0
}

pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

/// Drop repeated archive paths while keeping first-seen order.
pub fn normalize_archive_paths(paths: Vec<String>) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for path in paths {
        if !seen.contains(&path) {
            seen.push(path);
        }
    }
    seen
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_keeps_order() {
        let paths = vec![
            "/data/a.zip".to_string(),
            "/data/b.zip".to_string(),
            "/data/a.zip".to_string(),
        ];
        let result = normalize_archive_paths(paths);
        assert_eq!(result, vec!["/data/a.zip", "/data/b.zip"]);
    }

    #[test]
    fn test_normalize_empty() {
        assert!(normalize_archive_paths(vec![]).is_empty());
    }
}
