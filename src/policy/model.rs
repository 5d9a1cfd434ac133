//! Host policy document model
//!
//! Every field that can be absent in a template is an explicit `Option`;
//! "omit empty" is the `prune` pass over this model plus
//! `skip_serializing_if`, not runtime reflection. A pruned policy
//! round-trips through YAML without reintroducing stripped fields.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Label forced to the local hostname before a policy is applied.
pub const HOSTNAME_LABEL: &str = "sentryscan.io/hostname";
/// Generic hostname label removed during the rewrite.
pub const GENERIC_HOSTNAME_LABEL: &str = "kubernetes.io/hostname";

/// Enforcement action requested on the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum PolicyAction {
    #[value(name = "Block")]
    Block,
    #[value(name = "Audit")]
    Audit,
}

impl PolicyAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyAction::Block => "Block",
            PolicyAction::Audit => "Audit",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_version: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Metadata>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spec: Option<PolicySpec>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Metadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_selector: Option<NodeSelector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub process: Option<MatchRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<MatchRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<CapabilityRules>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NodeSelector {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_labels: Option<BTreeMap<String, String>>,
}

/// Process and file rules share one shape.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_paths: Option<Vec<MatchPath>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_directories: Option<Vec<MatchDirectory>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_patterns: Option<Vec<MatchPattern>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPath {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_source: Option<Vec<MatchSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchDirectory {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recursive: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_source: Option<Vec<MatchSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchPattern {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pattern: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner_only: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_protocols: Option<Vec<MatchProtocol>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchProtocol {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_source: Option<Vec<MatchSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CapabilityRules {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub match_capabilities: Option<Vec<MatchCapability>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchCapability {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from_source: Option<Vec<MatchSource>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

/// Rewrite a present, non-empty action field. Absent actions stay absent;
/// no field is invented.
fn rewrite_action(field: &mut Option<String>, action: PolicyAction) {
    if let Some(current) = field {
        if !current.is_empty() {
            *field = Some(action.as_str().to_string());
        }
    }
}

/// `Some("")` and `None` are the same thing once pruned.
fn prune_string(field: &mut Option<String>) {
    if matches!(field.as_deref(), Some("")) {
        *field = None;
    }
}

impl HostPolicy {
    /// Template name: metadata name when present.
    pub fn name(&self) -> Option<&str> {
        self.metadata.as_ref()?.name.as_deref()
    }

    /// Pin this policy to one host: force the hostname label and drop the
    /// generic one. Creates the node selector when the template has none.
    pub fn set_local_host(&mut self, hostname: &str) {
        let spec = self.spec.get_or_insert_with(PolicySpec::default);
        let selector = spec.node_selector.get_or_insert_with(NodeSelector::default);
        let labels = selector.match_labels.get_or_insert_with(BTreeMap::new);
        labels.remove(GENERIC_HOSTNAME_LABEL);
        labels.insert(HOSTNAME_LABEL.to_string(), hostname.to_string());
    }

    /// Rewrite every non-empty action field, top-level and per match entry.
    pub fn rewrite_actions(&mut self, action: PolicyAction) {
        let Some(spec) = &mut self.spec else { return };
        rewrite_action(&mut spec.action, action);

        if let Some(rules) = &mut spec.process {
            rules.rewrite_actions(action);
        }
        if let Some(rules) = &mut spec.file {
            rules.rewrite_actions(action);
        }
        if let Some(network) = &mut spec.network {
            rewrite_action(&mut network.action, action);
            for protocol in network.match_protocols.iter_mut().flatten() {
                rewrite_action(&mut protocol.action, action);
            }
        }
        if let Some(caps) = &mut spec.capabilities {
            rewrite_action(&mut caps.action, action);
            for capability in caps.match_capabilities.iter_mut().flatten() {
                rewrite_action(&mut capability.action, action);
            }
        }
    }

    /// Recursively strip empty fields so serialization omits them.
    pub fn prune(&mut self) {
        prune_string(&mut self.api_version);
        prune_string(&mut self.kind);

        if let Some(metadata) = &mut self.metadata {
            prune_string(&mut metadata.name);
            if metadata.name.is_none() {
                self.metadata = None;
            }
        }

        if let Some(spec) = &mut self.spec {
            spec.prune();
            if spec.is_empty() {
                self.spec = None;
            }
        }
    }
}

impl MatchRules {
    fn rewrite_actions(&mut self, action: PolicyAction) {
        rewrite_action(&mut self.action, action);
        for path in self.match_paths.iter_mut().flatten() {
            rewrite_action(&mut path.action, action);
        }
        for dir in self.match_directories.iter_mut().flatten() {
            rewrite_action(&mut dir.action, action);
        }
        for pattern in self.match_patterns.iter_mut().flatten() {
            rewrite_action(&mut pattern.action, action);
        }
    }

    fn prune(&mut self) {
        prune_string(&mut self.message);
        prune_string(&mut self.action);
        prune_entries(&mut self.match_paths, |p: &mut MatchPath| {
            prune_string(&mut p.path);
            prune_string(&mut p.action);
            prune_match_sources(&mut p.from_source);
            p == &MatchPath::default()
        });
        prune_entries(&mut self.match_directories, |d: &mut MatchDirectory| {
            prune_string(&mut d.dir);
            prune_string(&mut d.action);
            prune_match_sources(&mut d.from_source);
            d == &MatchDirectory::default()
        });
        prune_entries(&mut self.match_patterns, |p: &mut MatchPattern| {
            prune_string(&mut p.pattern);
            prune_string(&mut p.action);
            p == &MatchPattern::default()
        });
    }

    fn is_empty(&self) -> bool {
        self == &MatchRules::default()
    }
}

impl PolicySpec {
    fn prune(&mut self) {
        prune_string(&mut self.message);
        prune_string(&mut self.action);

        if let Some(tags) = &mut self.tags {
            tags.retain(|t| !t.is_empty());
            if tags.is_empty() {
                self.tags = None;
            }
        }

        if let Some(selector) = &mut self.node_selector {
            if let Some(labels) = &mut selector.match_labels {
                if labels.is_empty() {
                    selector.match_labels = None;
                }
            }
            if selector.match_labels.is_none() {
                self.node_selector = None;
            }
        }

        if let Some(rules) = &mut self.process {
            rules.prune();
            if rules.is_empty() {
                self.process = None;
            }
        }
        if let Some(rules) = &mut self.file {
            rules.prune();
            if rules.is_empty() {
                self.file = None;
            }
        }
        if let Some(network) = &mut self.network {
            prune_string(&mut network.message);
            prune_string(&mut network.action);
            prune_entries(&mut network.match_protocols, |p: &mut MatchProtocol| {
                prune_string(&mut p.protocol);
                prune_string(&mut p.action);
                prune_match_sources(&mut p.from_source);
                p == &MatchProtocol::default()
            });
            if network == &NetworkRules::default() {
                self.network = None;
            }
        }
        if let Some(caps) = &mut self.capabilities {
            prune_string(&mut caps.message);
            prune_string(&mut caps.action);
            prune_entries(&mut caps.match_capabilities, |c: &mut MatchCapability| {
                prune_string(&mut c.capability);
                prune_string(&mut c.action);
                prune_match_sources(&mut c.from_source);
                c == &MatchCapability::default()
            });
            if caps == &CapabilityRules::default() {
                self.capabilities = None;
            }
        }
    }

    fn is_empty(&self) -> bool {
        self == &PolicySpec::default()
    }
}

/// Prune every entry of an optional list; drop empty entries and then the
/// list itself when nothing remains.
fn prune_entries<T, F>(list: &mut Option<Vec<T>>, mut prune_entry: F)
where
    F: FnMut(&mut T) -> bool,
{
    if let Some(entries) = list {
        let mut kept = Vec::with_capacity(entries.len());
        for mut entry in entries.drain(..) {
            if !prune_entry(&mut entry) {
                kept.push(entry);
            }
        }
        *entries = kept;
        if entries.is_empty() {
            *list = None;
        }
    }
}

fn prune_match_sources(sources: &mut Option<Vec<MatchSource>>) {
    prune_entries(sources, |s: &mut MatchSource| {
        prune_string(&mut s.path);
        s.path.is_none()
    });
}
