use std::collections::{BTreeMap, HashMap, HashSet};
use std::convert::TryFrom;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Duration;

use crate::model::{Source, SourceError};

static DEFAULT_INTERVAL_SECS: i64 = 60;
static DEFAULT_OUTPUT_DIR: &str = "/results";
static STAGING_DIR_NAME: &str = ".staging";

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("unable to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("unable to parse config: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("no discovery sources configured")]
    EmptyDiscovery,
    #[error("interval must be a positive number of seconds, got {0}")]
    InvalidInterval(i64),
    #[error("interval of {0}s is too large")]
    IntervalOutOfRange(u64),
    #[error("staging dir {0} must differ from the output dir")]
    StagingIsOutput(PathBuf),
    #[error(transparent)]
    InvalidSource(#[from] SourceError),
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    interval: Option<i64>,
    output_dir: Option<PathBuf>,
    staging_dir: Option<PathBuf>,
    #[serde(default)]
    configs: Vec<RawGroup>,
}

/// Mirrors a monitoring tool scrape job; only the fields used to locate
/// discovery endpoints are read.
#[derive(Debug, Deserialize)]
struct RawGroup {
    metrics_path: Option<String>,
    #[serde(default)]
    static_configs: Vec<RawStaticConfig>,
}

#[derive(Debug, Deserialize)]
struct RawStaticConfig {
    #[serde(default)]
    targets: Vec<String>,
    #[serde(default)]
    labels: BTreeMap<String, String>,
}

/// Values supplied on the command line or through the environment. They take
/// precedence over the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub interval: Option<u64>,
    pub output_dir: Option<PathBuf>,
    pub staging_dir: Option<PathBuf>,
}

/// Immutable runtime configuration, built once at startup.
#[derive(Debug, Clone)]
pub struct Config {
    pub interval: Duration,
    pub output_dir: PathBuf,
    pub staging_dir: PathBuf,
    pub discovery: Vec<Source>,
}

impl Config {
    pub fn load(path: &Path, overrides: &Overrides) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_owned(),
            source,
        })?;
        Self::from_yaml(&contents, overrides)
    }

    pub fn from_yaml(contents: &str, overrides: &Overrides) -> Result<Self, ConfigError> {
        let raw: RawConfig = if contents.trim().is_empty() {
            RawConfig::default()
        } else {
            serde_yaml::from_str(contents)?
        };

        let interval = match overrides.interval {
            Some(secs) => {
                i64::try_from(secs).map_err(|_| ConfigError::IntervalOutOfRange(secs))?
            }
            None => raw.interval.unwrap_or(DEFAULT_INTERVAL_SECS),
        };
        if interval <= 0 {
            return Err(ConfigError::InvalidInterval(interval));
        }

        let output_dir = anchor(
            overrides
                .output_dir
                .clone()
                .or(raw.output_dir)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_DIR)),
        );

        let staging_dir = match overrides.staging_dir.clone().or(raw.staging_dir) {
            Some(dir) => anchor(dir),
            None => default_staging_dir(&output_dir),
        };
        if staging_dir == output_dir {
            return Err(ConfigError::StagingIsOutput(staging_dir));
        }

        let discovery = extract_sources(raw.configs)?;
        if discovery.is_empty() {
            return Err(ConfigError::EmptyDiscovery);
        }

        Ok(Self {
            interval: Duration::from_secs(interval as u64),
            output_dir,
            staging_dir,
            discovery,
        })
    }

    /// The snapshot file names that are allowed to exist in the output dir.
    pub fn source_files(&self) -> HashSet<&str> {
        self.discovery.iter().map(|s| s.file.as_str()).collect()
    }

    pub async fn create_dirs(&self) -> std::io::Result<()> {
        for dir in &[&self.output_dir, &self.staging_dir] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }
}

/// Flattens scrape groups into one source per distinct url. The first
/// occurrence of a url keeps its labels.
fn extract_sources(groups: Vec<RawGroup>) -> Result<Vec<Source>, ConfigError> {
    let mut sources: Vec<Source> = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for group in groups {
        let path = group.metrics_path.unwrap_or_default();
        for static_config in group.static_configs {
            for target in static_config.targets {
                let url = format!("{}{}", target, path);
                if let Some(&idx) = seen.get(&url) {
                    if sources[idx].default_labels != static_config.labels {
                        tracing::warn!(
                            "duplicate discovery url {} with differing labels, keeping {:?} and ignoring {:?}",
                            url,
                            sources[idx].default_labels,
                            static_config.labels
                        );
                    }
                    continue;
                }

                let source = Source::new(&url, None, static_config.labels.clone())?;
                seen.insert(url, sources.len());
                sources.push(source);
            }
        }
    }

    let mut files: HashMap<&str, &Source> = HashMap::new();
    for source in &sources {
        if let Some(other) = files.insert(source.file.as_str(), source) {
            tracing::warn!(
                "discovery urls {} and {} both publish to {}",
                other.url,
                source.url,
                source.file
            );
        }
    }

    Ok(sources)
}

fn anchor(path: PathBuf) -> PathBuf {
    if path.is_relative() {
        Path::new("/").join(path)
    } else {
        path
    }
}

/// A hidden subdirectory of the output dir. It shares the output dir's
/// filesystem even when that is a separate mount, so publishing stays a
/// rename. Publishing and pruning only touch regular files, so it is left
/// alone there.
fn default_staging_dir(output_dir: &Path) -> PathBuf {
    output_dir.join(STAGING_DIR_NAME)
}

#[cfg(test)]
mod tests {
    use super::*;

    static VALID_CONFIG: &str = r#"
interval: 120
output_dir: results
configs:
  - job_name: service_discovery
    metrics_path: /api/v1/health/prometheus/service_discovery/
    static_configs:
      - targets:
          - https://dev.url
        labels:
          group: dev
          some_label: some_value
      - targets:
          - https://prod.url
        labels:
          group: prod
      - targets:
          - https://without.label
"#;

    #[test]
    fn extracts_sources_from_scrape_groups() {
        let config = Config::from_yaml(VALID_CONFIG, &Overrides::default()).unwrap();

        assert_eq!(config.output_dir, PathBuf::from("/results"));
        assert_eq!(config.staging_dir, PathBuf::from("/results/.staging"));
        assert_eq!(config.interval, Duration::from_secs(120));
        assert_eq!(config.discovery.len(), 3);

        let by_url: HashMap<String, &Source> = config
            .discovery
            .iter()
            .map(|s| (s.url.to_string(), s))
            .collect();

        let dev = by_url["https://dev.url/api/v1/health/prometheus/service_discovery/"];
        assert_eq!(dev.default_labels.len(), 2);
        assert_eq!(dev.default_labels["group"], "dev");
        assert_eq!(dev.default_labels["some_label"], "some_value");
        assert_eq!(
            dev.file,
            "https_dev_url_api_v1_health_prometheus_service_discovery.json"
        );

        let prod = by_url["https://prod.url/api/v1/health/prometheus/service_discovery/"];
        assert_eq!(prod.default_labels.len(), 1);
        assert_eq!(prod.default_labels["group"], "prod");

        let bare = by_url["https://without.label/api/v1/health/prometheus/service_discovery/"];
        assert!(bare.default_labels.is_empty());
    }

    #[test]
    fn applies_defaults() {
        let config = Config::from_yaml(
            "configs:\n  - static_configs:\n      - targets: [\"http://a.b/sd\"]\n",
            &Overrides::default(),
        )
        .unwrap();

        assert_eq!(config.interval, Duration::from_secs(60));
        assert_eq!(config.output_dir, PathBuf::from("/results"));
        assert_eq!(config.staging_dir, PathBuf::from("/results/.staging"));
        assert_eq!(config.discovery[0].file, "http_a_b_sd.json");
    }

    #[test]
    fn staging_defaults_inside_output_dir() {
        let overrides = Overrides {
            output_dir: Some("/mnt/shared/sd".into()),
            ..Overrides::default()
        };
        let config = Config::from_yaml(VALID_CONFIG, &overrides).unwrap();

        assert_eq!(config.staging_dir, PathBuf::from("/mnt/shared/sd/.staging"));
        assert!(config.staging_dir.starts_with(&config.output_dir));
    }

    #[tokio::test]
    async fn creates_output_and_staging_dirs() {
        let root = tempfile::tempdir().unwrap();
        let overrides = Overrides {
            output_dir: Some(root.path().join("results")),
            ..Overrides::default()
        };
        let config = Config::from_yaml(VALID_CONFIG, &overrides).unwrap();

        config.create_dirs().await.unwrap();
        config.create_dirs().await.unwrap();
        assert!(config.output_dir.is_dir());
        assert!(config.staging_dir.is_dir());
    }

    #[test]
    fn overrides_take_precedence() {
        let overrides = Overrides {
            interval: Some(5),
            output_dir: Some("/srv/sd".into()),
            staging_dir: Some("/srv/staging".into()),
        };
        let config = Config::from_yaml(VALID_CONFIG, &overrides).unwrap();

        assert_eq!(config.interval, Duration::from_secs(5));
        assert_eq!(config.output_dir, PathBuf::from("/srv/sd"));
        assert_eq!(config.staging_dir, PathBuf::from("/srv/staging"));
    }

    #[test]
    fn rejects_empty_discovery() {
        for contents in &[
            "",
            "interval: 10\n",
            "configs: []\n",
            "configs:\n  - static_configs: []\n",
            "configs:\n  - static_configs:\n      - targets: []\n",
        ] {
            assert!(
                matches!(
                    Config::from_yaml(contents, &Overrides::default()),
                    Err(ConfigError::EmptyDiscovery)
                ),
                "{:?} should be rejected",
                contents
            );
        }
    }

    #[test]
    fn rejects_invalid_values() {
        let huge = Overrides {
            interval: Some(u64::MAX),
            ..Overrides::default()
        };
        assert!(matches!(
            Config::from_yaml(VALID_CONFIG, &huge),
            Err(ConfigError::IntervalOutOfRange(secs)) if secs == u64::MAX
        ));
        assert!(matches!(
            Config::from_yaml(
                "configs:\n  - static_configs:\n      - targets: [\"not a url\"]\n",
                &Overrides::default()
            ),
            Err(ConfigError::InvalidSource(_))
        ));
        assert!(matches!(
            Config::from_yaml(
                "interval: 0\nconfigs:\n  - static_configs:\n      - targets: [\"http://a.b\"]\n",
                &Overrides::default()
            ),
            Err(ConfigError::InvalidInterval(0))
        ));
        assert!(matches!(
            Config::from_yaml("interval: soon\n", &Overrides::default()),
            Err(ConfigError::Parse(_))
        ));
        assert!(matches!(
            Config::from_yaml(
                "output_dir: /a\nstaging_dir: /a\nconfigs:\n  - static_configs:\n      - targets: [\"http://a.b\"]\n",
                &Overrides::default()
            ),
            Err(ConfigError::StagingIsOutput(_))
        ));
    }

    #[test]
    fn duplicate_urls_keep_first_labels() {
        let config = Config::from_yaml(
            r#"
configs:
  - static_configs:
      - targets: ["http://a.b/sd"]
        labels: {group: first}
  - static_configs:
      - targets: ["http://a.b/sd", "http://c.d/sd"]
        labels: {group: second}
"#,
            &Overrides::default(),
        )
        .unwrap();

        assert_eq!(config.discovery.len(), 2);
        assert_eq!(config.discovery[0].default_labels["group"], "first");
        assert_eq!(config.discovery[1].default_labels["group"], "second");
        assert_eq!(
            config.source_files(),
            vec!["http_a_b_sd.json", "http_c_d_sd.json"]
                .into_iter()
                .collect::<HashSet<_>>()
        );
    }

    #[test]
    fn load_reports_missing_file() {
        let err = Config::load(Path::new("/nonexistent/sd.yml"), &Overrides::default())
            .unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
