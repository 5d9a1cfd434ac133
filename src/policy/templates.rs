//! Policy template fetch and cache
//!
//! The template source is an HTTP-fetched zip archive (a branch archive of a
//! public templates repository). Entries whose file name contains the host
//! policy marker and ends in the policy extension are parsed; one bad entry
//! is logged and skipped, never aborting the rest of the archive.

use std::collections::BTreeMap;
use std::fmt;
use std::io::{Read, Seek, Write};

use super::model::HostPolicy;
use crate::metrics::POLICY_TEMPLATES;

/// Archive entries containing this marker are host policies.
const HOST_POLICY_MARKER: &str = "hsp";
const POLICY_EXTENSION: &str = ".yaml";

/// Branch archive URL of the default template repository.
pub const DEFAULT_TEMPLATE_URL: &str =
    "https://github.com/sentryscan/policy-templates/archive/refs/heads/{branch}.zip";

/// Render the template source URL for a branch.
pub fn template_url(branch: &str) -> String {
    DEFAULT_TEMPLATE_URL.replace("{branch}", branch)
}

#[derive(Debug)]
pub enum PolicyError {
    /// The archive could not be downloaded.
    Fetch(reqwest::Error),
    /// The download could not be spooled to disk or read back.
    Io(std::io::Error),
    /// The downloaded file is not a readable zip archive.
    Archive(zip::result::ZipError),
    /// The local hostname could not be determined for the rewrite.
    Hostname(std::io::Error),
    /// A policy could not be rendered for the dry run.
    Render(serde_yaml::Error),
    /// One or more applies failed; carries the first failure.
    Apply { name: String, source: crate::agent::AgentError },
}

impl fmt::Display for PolicyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PolicyError::Fetch(e) => write!(f, "failed to fetch template archive: {}", e),
            PolicyError::Io(e) => write!(f, "failed to spool template archive: {}", e),
            PolicyError::Archive(e) => write!(f, "failed to read template archive: {}", e),
            PolicyError::Hostname(e) => write!(f, "failed to determine local hostname: {}", e),
            PolicyError::Render(e) => write!(f, "failed to render policy YAML: {}", e),
            PolicyError::Apply { name, source } => {
                write!(f, "failed to apply policy '{}': {}", name, source)
            }
        }
    }
}

impl std::error::Error for PolicyError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PolicyError::Fetch(e) => Some(e),
            PolicyError::Io(e) | PolicyError::Hostname(e) => Some(e),
            PolicyError::Archive(e) => Some(e),
            PolicyError::Render(e) => Some(e),
            PolicyError::Apply { source, .. } => Some(source),
        }
    }
}

/// Name-keyed host policy cache. Built once per fetch, read many; applies
/// mutate copies, never the cached templates.
#[derive(Debug, Default)]
pub struct TemplateCache {
    templates: BTreeMap<String, HostPolicy>,
}

impl TemplateCache {
    /// Download the archive for `branch` and parse its host policies.
    pub async fn fetch(branch: &str) -> Result<Self, PolicyError> {
        Self::fetch_url(&template_url(branch)).await
    }

    /// Download a specific archive URL and parse its host policies.
    pub async fn fetch_url(url: &str) -> Result<Self, PolicyError> {
        tracing::info!(url, "fetching policy templates");
        let bytes = reqwest::get(url)
            .await
            .and_then(|r| r.error_for_status())
            .map_err(PolicyError::Fetch)?
            .bytes()
            .await
            .map_err(PolicyError::Fetch)?;

        // Spool to a temp file; zip needs Read + Seek and archives can be
        // larger than we want to keep twice in memory.
        let mut file = tempfile::tempfile().map_err(PolicyError::Io)?;
        file.write_all(&bytes).map_err(PolicyError::Io)?;
        file.rewind().map_err(PolicyError::Io)?;

        Self::from_zip(file)
    }

    /// Parse host policies out of an opened zip archive.
    pub fn from_zip<R: Read + Seek>(reader: R) -> Result<Self, PolicyError> {
        let mut archive = zip::ZipArchive::new(reader).map_err(PolicyError::Archive)?;
        let mut cache = TemplateCache::default();

        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::warn!(index, error = %e, "skipping unreadable archive entry");
                    continue;
                }
            };

            let entry_name = entry.name().to_string();
            let file_name = entry_name.rsplit('/').next().unwrap_or(&entry_name);
            if !file_name.contains(HOST_POLICY_MARKER) || !file_name.ends_with(POLICY_EXTENSION) {
                continue;
            }

            let mut contents = String::new();
            if let Err(e) = entry.read_to_string(&mut contents) {
                POLICY_TEMPLATES.with_label_values(&["parse_failed"]).inc();
                tracing::warn!(entry = %entry_name, error = %e, "skipping unreadable template");
                continue;
            }

            match serde_yaml::from_str::<HostPolicy>(&contents) {
                Ok(policy) => {
                    POLICY_TEMPLATES.with_label_values(&["parsed"]).inc();
                    let name = policy
                        .name()
                        .map(str::to_string)
                        .unwrap_or_else(|| file_name.trim_end_matches(POLICY_EXTENSION).to_string());
                    cache.templates.insert(name, policy);
                }
                // One broken template must not abort the rest of the fetch.
                Err(e) => {
                    POLICY_TEMPLATES.with_label_values(&["parse_failed"]).inc();
                    tracing::warn!(entry = %entry_name, error = %e, "skipping unparsable template");
                }
            }
        }

        tracing::info!(count = cache.templates.len(), "policy templates cached");
        Ok(cache)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// Deterministic (name-sorted) iteration over the cached templates.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostPolicy)> {
        self.templates.iter()
    }

    pub fn get(&self, name: &str) -> Option<&HostPolicy> {
        self.templates.get(name)
    }

    pub fn insert(&mut self, name: impl Into<String>, policy: HostPolicy) {
        self.templates.insert(name.into(), policy);
    }
}
