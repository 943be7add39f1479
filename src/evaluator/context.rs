// Evaluation context for template resolution

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

fn default_partition() -> String {
    "aws".to_string()
}

fn default_url_suffix() -> String {
    "amazonaws.com".to_string()
}

/// Immutable snapshot of the evaluation environment
///
/// Supplies everything "live" that a template may reference: the deployment
/// coordinates (account, region, stack name), caller parameter overrides,
/// SSM parameter versions and cross-stack export values. Created once per
/// resolution run and never mutated by the engine.
///
/// All maps preserve insertion order. For `ssm_parameters` the order is
/// semantic: callers insert versions in ascending recency, so the last entry
/// of a parameter's version map is its latest value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateContext {
    /// Account id, e.g. `123456789012`
    pub account: String,
    /// Region, e.g. `eu-central-1`
    pub region: String,
    /// Name of the stack being resolved
    pub stack_name: String,
    /// Partition, `aws` unless targeting an isolated partition
    #[serde(default = "default_partition")]
    pub partition: String,
    /// Domain suffix for service endpoints
    #[serde(default = "default_url_suffix")]
    pub url_suffix: String,
    /// Parameter overrides; these win over template defaults
    #[serde(default)]
    pub parameters: IndexMap<String, Value>,
    /// SSM parameter values: name, then version key, in ascending recency
    #[serde(default)]
    pub ssm_parameters: IndexMap<String, IndexMap<String, Value>>,
    /// Cross-stack export values consumed by `Fn::ImportValue`
    #[serde(default)]
    pub exports: IndexMap<String, Value>,
}

impl TemplateContext {
    /// Create a context with the given deployment coordinates
    pub fn new(
        account: impl Into<String>,
        region: impl Into<String>,
        stack_name: impl Into<String>,
    ) -> Self {
        Self {
            account: account.into(),
            region: region.into(),
            stack_name: stack_name.into(),
            partition: default_partition(),
            url_suffix: default_url_suffix(),
            parameters: IndexMap::new(),
            ssm_parameters: IndexMap::new(),
            exports: IndexMap::new(),
        }
    }

    /// Set parameter overrides
    pub fn with_parameters(mut self, parameters: IndexMap<String, Value>) -> Self {
        self.parameters = parameters;
        self
    }

    /// Set SSM parameter versions (ascending recency per parameter)
    pub fn with_ssm_parameters(
        mut self,
        ssm_parameters: IndexMap<String, IndexMap<String, Value>>,
    ) -> Self {
        self.ssm_parameters = ssm_parameters;
        self
    }

    /// Set cross-stack exports
    pub fn with_exports(mut self, exports: IndexMap<String, Value>) -> Self {
        self.exports = exports;
        self
    }

    /// Override the partition
    pub fn with_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = partition.into();
        self
    }

    /// Override the endpoint domain suffix
    pub fn with_url_suffix(mut self, url_suffix: impl Into<String>) -> Self {
        self.url_suffix = url_suffix.into();
        self
    }

    /// Look up a specific SSM parameter version
    pub fn ssm_parameter(&self, name: &str, version: &str) -> Option<&Value> {
        self.ssm_parameters.get(name)?.get(version)
    }

    /// The most recent version of an SSM parameter
    pub fn latest_ssm_parameter(&self, name: &str) -> Option<&Value> {
        self.ssm_parameters.get(name)?.values().next_back()
    }
}
