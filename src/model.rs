use std::collections::BTreeMap;

use http::uri::Uri;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

lazy_static! {
    static ref FILE_NAME_SEPARATORS: Regex = Regex::new(r"://|[./]").unwrap();
}

static SNAPSHOT_EXTENSION: &str = ".json";

pub type Labels = BTreeMap<String, LabelValue>;

/// A label value as it appears in a discovery document. Scalars and null are
/// accepted; objects and arrays fail the whole document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LabelValue {
    String(String),
    Number(serde_json::Number),
    Bool(bool),
    Null,
}

impl From<&str> for LabelValue {
    fn from(value: &str) -> Self {
        LabelValue::String(value.to_owned())
    }
}

/// One entry of a file-based service discovery document, used both for what
/// remote endpoints return and for what gets published. Fields other than
/// `targets` and `labels` are dropped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiscoveryRecord {
    pub targets: Vec<String>,
    pub labels: Labels,
}

impl DiscoveryRecord {
    /// Fills in every default label the record doesn't already carry.
    pub fn with_default_labels(mut self, defaults: &BTreeMap<String, String>) -> Self {
        self.labels = merge_labels(defaults, self.labels);
        self
    }
}

/// Starts from `defaults` and overwrites with `labels`, so fetched labels win
/// on collision.
pub fn merge_labels(defaults: &BTreeMap<String, String>, labels: Labels) -> Labels {
    let mut merged: Labels = defaults
        .iter()
        .map(|(key, value)| (key.clone(), LabelValue::from(value.as_str())))
        .collect();
    merged.extend(labels);
    merged
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("invalid url {url:?}: {reason}")]
    InvalidUrl { url: String, reason: String },
    #[error("url {0:?} must use http or https")]
    UnsupportedScheme(String),
    #[error("invalid snapshot file name {0:?}")]
    InvalidFileName(String),
}

/// A remote discovery endpoint and where its snapshot gets published.
#[derive(Debug, Clone, PartialEq)]
pub struct Source {
    pub url: Uri,
    pub file: String,
    pub default_labels: BTreeMap<String, String>,
}

impl Source {
    pub fn new(
        url: &str,
        file: Option<String>,
        default_labels: BTreeMap<String, String>,
    ) -> Result<Self, SourceError> {
        let uri: Uri = url.parse().map_err(|e: http::uri::InvalidUri| SourceError::InvalidUrl {
            url: url.to_owned(),
            reason: e.to_string(),
        })?;

        match uri.scheme_str() {
            Some("http") | Some("https") => {}
            _ => return Err(SourceError::UnsupportedScheme(url.to_owned())),
        }

        if uri.authority().is_none() {
            return Err(SourceError::InvalidUrl {
                url: url.to_owned(),
                reason: "missing host".into(),
            });
        }

        let file = match file {
            Some(file) => {
                if file.is_empty() || file == "." || file == ".." || file.contains('/') {
                    return Err(SourceError::InvalidFileName(file));
                }
                file
            }
            None => derive_file_name(url),
        };

        Ok(Self {
            url: uri,
            file,
            default_labels,
        })
    }
}

/// `https://a.b/x` becomes `https_a_b_x.json`.
pub fn derive_file_name(url: &str) -> String {
    let flattened = FILE_NAME_SEPARATORS.replace_all(url, "_");
    format!("{}{}", flattened.trim_matches('_'), SNAPSHOT_EXTENSION)
}
