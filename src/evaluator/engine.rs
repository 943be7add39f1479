// Main template resolution engine

use std::net::{Ipv4Addr, Ipv6Addr};
use std::sync::{Arc, LazyLock};

use base64::{Engine as _, engine::general_purpose};
use indexmap::IndexMap;
use log::{debug, trace};
use regex::Regex;
use rustc_hash::FxHashMap;
use serde_json::{Map, Value};

use crate::evaluator::context::TemplateContext;
use crate::evaluator::error::{ResolveError, ResolveResult};
use crate::model::{ResourceRecord, scalar_to_string, type_name};
use crate::registry::AttributeResolver;

/// The no-value sentinel: a reference to it removes the containing slot
pub const NO_VALUE: &str = "AWS::NoValue";

/// Marker opening a dynamic reference string
const DYNAMIC_PREFIX: &str = "{{resolve:";

/// Nesting limit for the rewriter; a template deeper than this is assumed to
/// contain a reference cycle
const MAX_DEPTH: usize = 128;

static SUB_PLACEHOLDER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{([^}]+)\}").expect("placeholder pattern is valid"));

/// Outcome of resolving a single node
///
/// `Omitted` is produced by a reference to the no-value sentinel (directly or
/// through the taken branch of `Fn::If`); the containing mapping entry or
/// sequence element is dropped instead of being replaced.
#[derive(Debug, Clone, PartialEq)]
pub enum Resolved {
    /// Replacement value for the node
    Value(Value),
    /// The containing slot must be removed
    Omitted,
}

impl Resolved {
    /// The replacement value, or `None` when the slot was omitted
    pub fn into_value(self) -> Option<Value> {
        match self {
            Resolved::Value(value) => Some(value),
            Resolved::Omitted => None,
        }
    }
}

/// Template resolution engine
///
/// Owns the working document for the duration of a run. [`resolve`] folds
/// every intrinsic function, reference and dynamic-reference string into
/// literal values, prunes resources whose conditions evaluate false, and
/// strips the bookkeeping sections from the output document.
///
/// [`resolve`]: TemplateEngine::resolve
pub struct TemplateEngine {
    context: TemplateContext,
    document: Value,
    attributes: Arc<dyn AttributeResolver>,
    use_parameter_defaults: bool,
    refs: FxHashMap<String, Value>,
    mappings: Value,
    parameters: IndexMap<String, Value>,
    conditions: IndexMap<String, bool>,
    resources: IndexMap<String, ResourceRecord>,
    depth: usize,
}

impl std::fmt::Debug for TemplateEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TemplateEngine")
            .field("context", &self.context)
            .field("document", &self.document)
            .field("use_parameter_defaults", &self.use_parameter_defaults)
            .field("refs", &self.refs)
            .field("mappings", &self.mappings)
            .field("parameters", &self.parameters)
            .field("conditions", &self.conditions)
            .field("resources", &self.resources)
            .field("depth", &self.depth)
            .finish_non_exhaustive()
    }
}

impl TemplateEngine {
    /// Create an engine for one resolution run
    ///
    /// The pseudo-reference table is seeded from the context immediately;
    /// parameters, conditions and resources stay empty until [`resolve`]
    /// runs.
    ///
    /// [`resolve`]: TemplateEngine::resolve
    pub fn new(
        context: TemplateContext,
        template: Value,
        attributes: Arc<dyn AttributeResolver>,
    ) -> Self {
        let mut refs = FxHashMap::default();
        refs.insert(
            "AWS::StackId".to_string(),
            Value::String(format!(
                "arn:{}:cloudformation:{}:{}:stack/{}/{}",
                context.partition,
                context.region,
                context.account,
                context.stack_name,
                uuid::Uuid::new_v4()
            )),
        );
        refs.insert(
            "AWS::StackName".to_string(),
            Value::String(context.stack_name.clone()),
        );
        refs.insert(
            "AWS::Region".to_string(),
            Value::String(context.region.clone()),
        );
        refs.insert(
            "AWS::Partition".to_string(),
            Value::String(context.partition.clone()),
        );
        refs.insert(
            "AWS::AccountId".to_string(),
            Value::String(context.account.clone()),
        );
        refs.insert(
            "AWS::URLSuffix".to_string(),
            Value::String(context.url_suffix.clone()),
        );

        Self {
            context,
            document: template,
            attributes,
            use_parameter_defaults: false,
            refs,
            mappings: Value::Null,
            parameters: IndexMap::new(),
            conditions: IndexMap::new(),
            resources: IndexMap::new(),
            depth: 0,
        }
    }

    /// Fill parameters without a caller override from template defaults
    pub fn with_parameter_defaults(mut self, use_parameter_defaults: bool) -> Self {
        self.use_parameter_defaults = use_parameter_defaults;
        self
    }

    /// Run the full resolution pass over the document
    pub fn resolve(&mut self) -> ResolveResult<()> {
        debug!("resolving template");
        self.capture_mappings();
        self.materialize_parameters()?;
        self.evaluate_conditions()?;
        self.collect_resources()?;
        self.strip_bookkeeping();
        self.resolve_document()?;
        self.resolve_resources()?;
        self.attach_resources();
        debug!(
            "resolution finished: {} parameters, {} conditions, {} resources",
            self.parameters.len(),
            self.conditions.len(),
            self.resources.len()
        );
        Ok(())
    }

    /// The working document (fully resolved after [`resolve`] succeeds)
    ///
    /// [`resolve`]: TemplateEngine::resolve
    pub fn document(&self) -> &Value {
        &self.document
    }

    /// Consume the engine and return the resolved document
    pub fn into_document(self) -> Value {
        self.document
    }

    /// The resolved-parameters table
    pub fn parameters(&self) -> &IndexMap<String, Value> {
        &self.parameters
    }

    /// The resolved-conditions table
    pub fn conditions(&self) -> &IndexMap<String, bool> {
        &self.conditions
    }

    /// The evaluation context this run was constructed with
    pub fn context(&self) -> &TemplateContext {
        &self.context
    }

    /// Read a pseudo reference (`AWS::Region`, `AWS::AccountId`, ...)
    pub fn pseudo_ref(&self, name: &str) -> Option<&Value> {
        self.refs.get(name)
    }

    /// Declared type of a surviving resource
    pub fn resource_type(&self, logical_id: &str) -> Option<&str> {
        self.resources
            .get(logical_id)
            .map(|record| record.resource_type.as_str())
    }

    /// Whether a resource survived condition pruning
    pub fn has_resource(&self, logical_id: &str) -> bool {
        self.resources.contains_key(logical_id)
    }

    // ---- top-level phases, in resolve() order ----

    fn capture_mappings(&mut self) {
        // Mapping keys and values are looked up, never computed.
        self.mappings = self
            .document
            .get("Mappings")
            .cloned()
            .unwrap_or(Value::Null);
    }

    fn materialize_parameters(&mut self) -> ResolveResult<()> {
        self.parameters = self.context.parameters.clone();
        if !self.use_parameter_defaults {
            return Ok(());
        }
        let Some(declarations) = self.document.get("Parameters").and_then(Value::as_object) else {
            return Ok(());
        };
        for (name, declaration) in declarations {
            if self.parameters.contains_key(name) {
                continue;
            }
            let Some(default) = declaration.get("Default") else {
                continue;
            };
            let parameter_type = declaration
                .get("Type")
                .and_then(Value::as_str)
                .unwrap_or("String");
            let value = if parameter_type.starts_with("AWS::SSM::Parameter::Value") {
                // The default names an SSM parameter; the resolved value is
                // its most recent version from the context.
                let ssm_name = default.as_str().ok_or_else(|| {
                    ResolveError::MalformedArguments {
                        function: "Parameters".to_string(),
                        message: format!("SSM-typed parameter '{name}' needs a string default"),
                    }
                })?;
                self.context
                    .latest_ssm_parameter(ssm_name)
                    .cloned()
                    .ok_or_else(|| ResolveError::SsmParameterNotFound {
                        name: ssm_name.to_string(),
                    })?
            } else if parameter_type == "CommaDelimitedList" || parameter_type.starts_with("List<")
            {
                match default.as_str() {
                    Some(s) => Value::Array(
                        s.split(',')
                            .map(|part| Value::String(part.to_string()))
                            .collect(),
                    ),
                    None => default.clone(),
                }
            } else {
                default.clone()
            };
            self.parameters.insert(name.clone(), value);
        }
        Ok(())
    }

    fn evaluate_conditions(&mut self) -> ResolveResult<()> {
        let definitions: Vec<(String, Value)> = match self.document.get("Conditions") {
            Some(Value::Object(map)) => map
                .iter()
                .map(|(name, definition)| (name.clone(), definition.clone()))
                .collect(),
            _ => return Ok(()),
        };
        for (name, definition) in definitions {
            let value = self.boolean_operand(definition, "Conditions")?;
            debug!("condition {name} = {value}");
            self.conditions.insert(name, value);
        }
        Ok(())
    }

    fn collect_resources(&mut self) -> ResolveResult<()> {
        let section = match self.document.get_mut("Resources") {
            // Leave an empty placeholder so the key keeps its position.
            Some(slot) => std::mem::replace(slot, Value::Object(Map::new())),
            None => return Ok(()),
        };
        let Value::Object(entries) = section else {
            return Err(ResolveError::MalformedArguments {
                function: "Resources".to_string(),
                message: "the Resources section must be a mapping".to_string(),
            });
        };
        for (logical_id, mut body) in entries {
            if let Some(guard) = body.get("Condition") {
                let condition_name =
                    guard
                        .as_str()
                        .ok_or_else(|| ResolveError::MalformedArguments {
                            function: "Resources".to_string(),
                            message: format!(
                                "the Condition of resource '{logical_id}' must be a condition name"
                            ),
                        })?;
                if !self.condition_by_name(condition_name)? {
                    debug!("dropping resource {logical_id}: condition {condition_name} is false");
                    continue;
                }
            }
            let resource_type = body
                .get("Type")
                .and_then(Value::as_str)
                .ok_or_else(|| ResolveError::MalformedArguments {
                    function: "Resources".to_string(),
                    message: format!("resource '{logical_id}' has no Type"),
                })?
                .to_string();
            if let Some(map) = body.as_object_mut() {
                // Guard and ordering metadata have no meaning once resolution
                // is final.
                map.shift_remove("Condition");
                map.shift_remove("DependsOn");
            }
            self.resources
                .insert(logical_id, ResourceRecord::new(resource_type, body));
        }
        Ok(())
    }

    fn strip_bookkeeping(&mut self) {
        if let Some(map) = self.document.as_object_mut() {
            // Rules are validation-only and are stripped unevaluated.
            for section in ["Conditions", "Mappings", "Parameters", "Rules"] {
                map.shift_remove(section);
            }
        }
    }

    fn resolve_document(&mut self) -> ResolveResult<()> {
        let keys: Vec<String> = match self.document.as_object() {
            Some(map) => map
                .keys()
                .filter(|key| *key != "Resources")
                .cloned()
                .collect(),
            None => return Ok(()),
        };
        for key in keys {
            let taken = match self.document.get_mut(&key) {
                Some(slot) => slot.take(),
                None => continue,
            };
            match self.resolve_value(taken)? {
                Resolved::Value(value) => {
                    if let Some(slot) = self.document.get_mut(&key) {
                        *slot = value;
                    }
                }
                Resolved::Omitted => {
                    if let Some(map) = self.document.as_object_mut() {
                        map.shift_remove(&key);
                    }
                }
            }
        }
        Ok(())
    }

    fn resolve_resources(&mut self) -> ResolveResult<()> {
        let ids: Vec<String> = self.resources.keys().cloned().collect();
        for logical_id in ids {
            self.resolve_resource(&logical_id)?;
        }
        Ok(())
    }

    /// Resolve one resource's subtree, section entry by section entry, so
    /// that attribute lookups against the same resource made from inside one
    /// of its own values still see the other, not-yet-taken values.
    fn resolve_resource(&mut self, logical_id: &str) -> ResolveResult<()> {
        let sections: Vec<String> = match self.resources.get(logical_id) {
            Some(record) => match record.json.as_object() {
                Some(map) => map.keys().cloned().collect(),
                None => return Ok(()),
            },
            None => return Ok(()),
        };
        for section in sections {
            let granular = self
                .resources
                .get(logical_id)
                .and_then(|record| record.json.get(&section))
                .is_some_and(|value| value.is_object() && !is_expression_node(value));
            if granular {
                let keys: Vec<String> = self
                    .resources
                    .get(logical_id)
                    .and_then(|record| record.json.get(&section))
                    .and_then(Value::as_object)
                    .map(|map| map.keys().cloned().collect())
                    .unwrap_or_default();
                for key in keys {
                    self.resolve_resource_slot(logical_id, &section, Some(&key))?;
                }
            } else {
                self.resolve_resource_slot(logical_id, &section, None)?;
            }
        }
        Ok(())
    }

    fn resolve_resource_slot(
        &mut self,
        logical_id: &str,
        section: &str,
        key: Option<&str>,
    ) -> ResolveResult<()> {
        let taken = {
            let Some(record) = self.resources.get_mut(logical_id) else {
                return Ok(());
            };
            let slot = match key {
                Some(key) => record
                    .json
                    .get_mut(section)
                    .and_then(|value| value.get_mut(key)),
                None => record.json.get_mut(section),
            };
            match slot {
                Some(slot) if !slot.is_null() => slot.take(),
                _ => return Ok(()),
            }
        };
        let resolved = self.resolve_value(taken)?;
        let Some(record) = self.resources.get_mut(logical_id) else {
            return Ok(());
        };
        match resolved {
            Resolved::Value(value) => {
                let slot = match key {
                    Some(key) => record
                        .json
                        .get_mut(section)
                        .and_then(|target| target.get_mut(key)),
                    None => record.json.get_mut(section),
                };
                if let Some(slot) = slot {
                    *slot = value;
                }
            }
            Resolved::Omitted => {
                let owner = match key {
                    Some(_) => record.json.get_mut(section).and_then(Value::as_object_mut),
                    None => record.json.as_object_mut(),
                };
                if let Some(map) = owner {
                    map.shift_remove(key.unwrap_or(section));
                }
            }
        }
        Ok(())
    }

    fn attach_resources(&mut self) {
        let Some(slot) = self.document.get_mut("Resources") else {
            return;
        };
        let mut section = Map::new();
        for (logical_id, record) in &self.resources {
            section.insert(logical_id.clone(), record.json.clone());
        }
        *slot = Value::Object(section);
    }

    // ---- generic rewriter ----

    /// Resolve one subtree, consuming it and returning the rewritten value
    ///
    /// This is the rewriter entry point attribute resolvers call back into to
    /// fold expressions nested inside resource properties.
    pub fn resolve_value(&mut self, node: Value) -> ResolveResult<Resolved> {
        if self.depth >= MAX_DEPTH {
            return Err(ResolveError::RecursionLimitExceeded { limit: MAX_DEPTH });
        }
        self.depth += 1;
        let result = self.resolve_node(node);
        self.depth -= 1;
        result
    }

    fn resolve_node(&mut self, node: Value) -> ResolveResult<Resolved> {
        match node {
            Value::Object(mut map) => {
                if map.len() == 1 {
                    let key = map
                        .keys()
                        .next()
                        .cloned()
                        .unwrap_or_default();
                    if key == "Ref" {
                        let target = map.remove("Ref").unwrap_or(Value::Null);
                        let name =
                            target
                                .as_str()
                                .ok_or_else(|| ResolveError::MalformedArguments {
                                    function: "Ref".to_string(),
                                    message: format!(
                                        "reference target must be a string, got {}",
                                        type_name(&target)
                                    ),
                                })?;
                        if name == NO_VALUE {
                            return Ok(Resolved::Omitted);
                        }
                        return self.resolve_ref(name).map(Resolved::Value);
                    }
                    if key.starts_with("Fn::") {
                        let argument = map.remove(&key).unwrap_or(Value::Null);
                        return self.intrinsic(&key, argument);
                    }
                }
                let mut resolved = Map::new();
                for (key, value) in map {
                    match self.resolve_value(value)? {
                        Resolved::Value(value) => {
                            resolved.insert(key, value);
                        }
                        Resolved::Omitted => {}
                    }
                }
                Ok(Resolved::Value(Value::Object(resolved)))
            }
            Value::Array(items) => {
                let mut resolved = Vec::with_capacity(items.len());
                for item in items {
                    match self.resolve_value(item)? {
                        Resolved::Value(value) => resolved.push(value),
                        Resolved::Omitted => {}
                    }
                }
                Ok(Resolved::Value(Value::Array(resolved)))
            }
            Value::String(s) => {
                if s.starts_with(DYNAMIC_PREFIX) {
                    self.dynamic_reference(&s).map(Resolved::Value)
                } else {
                    Ok(Resolved::Value(Value::String(s)))
                }
            }
            other => Ok(Resolved::Value(other)),
        }
    }

    /// Resolve a reference: pseudo references first, then resources, then
    /// parameters
    pub fn resolve_ref(&mut self, name: &str) -> ResolveResult<Value> {
        if let Some(value) = self.refs.get(name) {
            return Ok(value.clone());
        }
        if self.resources.contains_key(name) {
            return self.get_attribute(name, "Ref");
        }
        if let Some(value) = self.parameters.get(name) {
            return Ok(value.clone());
        }
        Err(ResolveError::ReferenceNotFound {
            name: name.to_string(),
        })
    }

    fn dynamic_reference(&mut self, reference: &str) -> ResolveResult<Value> {
        let inner = reference
            .strip_prefix("{{")
            .and_then(|rest| rest.strip_suffix("}}"))
            .ok_or_else(|| ResolveError::DynamicReference {
                reference: reference.to_string(),
            })?;
        let parts: Vec<&str> = inner.split(':').collect();
        match parts.as_slice() {
            ["resolve", "ssm", name, version] => {
                let versions = self.context.ssm_parameters.get(*name).ok_or_else(|| {
                    ResolveError::SsmParameterNotFound {
                        name: name.to_string(),
                    }
                })?;
                versions
                    .get(*version)
                    .cloned()
                    .ok_or_else(|| ResolveError::SsmVersionNotFound {
                        name: name.to_string(),
                        version: version.to_string(),
                    })
            }
            _ => Err(ResolveError::DynamicReference {
                reference: reference.to_string(),
            }),
        }
    }

    fn get_attribute(&mut self, logical_id: &str, attribute: &str) -> ResolveResult<Value> {
        trace!("attribute lookup {logical_id}.{attribute}");
        let resolver = Arc::clone(&self.attributes);
        resolver.resolve_attribute(logical_id, attribute, self)
    }

    fn condition_by_name(&self, name: &str) -> ResolveResult<bool> {
        self.conditions
            .get(name)
            .copied()
            .ok_or_else(|| ResolveError::ConditionNotFound {
                name: name.to_string(),
            })
    }

    // ---- resource access for attribute resolvers ----

    /// Resolve a resource property in place and return it
    ///
    /// `Ok(None)` when the resource declares no such property (or the
    /// property resolved to the no-value sentinel and was removed).
    pub fn resource_property(
        &mut self,
        logical_id: &str,
        name: &str,
    ) -> ResolveResult<Option<Value>> {
        let taken = {
            let Some(record) = self.resources.get_mut(logical_id) else {
                return Err(ResolveError::ReferenceNotFound {
                    name: logical_id.to_string(),
                });
            };
            match record
                .json
                .get_mut("Properties")
                .and_then(|properties| properties.get_mut(name))
            {
                Some(slot) if !slot.is_null() => slot.take(),
                _ => return Ok(None),
            }
        };
        match self.resolve_value(taken)? {
            Resolved::Value(value) => {
                if let Some(slot) = self
                    .resources
                    .get_mut(logical_id)
                    .and_then(|record| record.json.get_mut("Properties"))
                    .and_then(|properties| properties.get_mut(name))
                {
                    *slot = value.clone();
                }
                Ok(Some(value))
            }
            Resolved::Omitted => {
                if let Some(properties) = self
                    .resources
                    .get_mut(logical_id)
                    .and_then(|record| record.json.get_mut("Properties"))
                    .and_then(Value::as_object_mut)
                {
                    properties.shift_remove(name);
                }
                Ok(None)
            }
        }
    }

    /// Read a memoized entry from a resource's metadata
    pub fn resource_metadata(&self, logical_id: &str, key: &str) -> Option<Value> {
        self.resources
            .get(logical_id)?
            .json
            .get("Metadata")?
            .get(key)
            .cloned()
    }

    /// Memoize a value into a resource's metadata, creating the section when
    /// missing
    pub fn set_resource_metadata(&mut self, logical_id: &str, key: &str, value: Value) {
        let Some(record) = self.resources.get_mut(logical_id) else {
            return;
        };
        let Some(root) = record.json.as_object_mut() else {
            return;
        };
        let metadata = root
            .entry("Metadata".to_string())
            .or_insert_with(|| Value::Object(Map::new()));
        if let Some(map) = metadata.as_object_mut() {
            map.insert(key.to_string(), value);
        }
    }

    // ---- intrinsic functions ----

    fn intrinsic(&mut self, name: &str, argument: Value) -> ResolveResult<Resolved> {
        trace!("intrinsic {name}");
        let value = match name {
            "Fn::Sub" => self.fn_sub(argument)?,
            "Fn::GetAtt" => self.fn_get_att(argument)?,
            "Fn::ImportValue" => self.fn_import_value(argument)?,
            "Fn::Or" => self.fn_or(argument)?,
            "Fn::And" => self.fn_and(argument)?,
            "Fn::Not" => self.fn_not(argument)?,
            "Fn::Equals" => self.fn_equals(argument)?,
            "Fn::Contains" => self.fn_contains(argument)?,
            "Fn::If" => return self.fn_if(argument),
            "Fn::Join" => self.fn_join(argument)?,
            "Fn::Select" => self.fn_select(argument)?,
            "Fn::Split" => self.fn_split(argument)?,
            "Fn::GetAZs" => self.fn_get_azs(argument)?,
            "Fn::FindInMap" => self.fn_find_in_map(argument)?,
            "Fn::Cidr" => self.fn_cidr(argument)?,
            "Fn::Length" => self.fn_length(argument)?,
            "Fn::Base64" => self.fn_base64(argument)?,
            _ => {
                return Err(ResolveError::UnknownIntrinsic {
                    name: name.to_string(),
                });
            }
        };
        Ok(Resolved::Value(value))
    }

    /// Resolve an intrinsic argument that must produce a value
    fn resolve_argument(&mut self, node: Value, function: &'static str) -> ResolveResult<Value> {
        match self.resolve_value(node)? {
            Resolved::Value(value) => Ok(value),
            Resolved::Omitted => Err(ResolveError::MalformedArguments {
                function: function.to_string(),
                message: "argument resolved to no value".to_string(),
            }),
        }
    }

    /// Resolve an element of a boolean intrinsic: condition references are
    /// looked up, everything else must resolve to a boolean
    fn boolean_operand(&mut self, node: Value, function: &'static str) -> ResolveResult<bool> {
        if let Value::Object(map) = &node {
            if map.len() == 1 {
                if let Some(name) = map.get("Condition").and_then(Value::as_str) {
                    return self.condition_by_name(name);
                }
            }
        }
        match self.resolve_argument(node, function)? {
            Value::Bool(value) => Ok(value),
            other => Err(ResolveError::MalformedArguments {
                function: function.to_string(),
                message: format!("expected a boolean operand, got {}", type_name(&other)),
            }),
        }
    }

    fn fn_sub(&mut self, argument: Value) -> ResolveResult<Value> {
        let (template, substitutions) = match argument {
            Value::String(s) => (s, Map::new()),
            Value::Array(items) => {
                let [template, substitutions] = take_items(items, "Fn::Sub")?;
                let template = template
                    .as_str()
                    .ok_or_else(|| ResolveError::MalformedArguments {
                        function: "Fn::Sub".to_string(),
                        message: "the first element must be a template string".to_string(),
                    })?
                    .to_string();
                match self.resolve_argument(substitutions, "Fn::Sub")? {
                    Value::Object(map) => (template, map),
                    other => {
                        return Err(ResolveError::MalformedArguments {
                            function: "Fn::Sub".to_string(),
                            message: format!(
                                "the second element must be a substitution mapping, got {}",
                                type_name(&other)
                            ),
                        });
                    }
                }
            }
            other => {
                return Err(ResolveError::MalformedArguments {
                    function: "Fn::Sub".to_string(),
                    message: format!(
                        "expected a template string or [template, substitutions], got {}",
                        type_name(&other)
                    ),
                });
            }
        };

        let mut output = String::new();
        let mut cursor = 0;
        for captures in SUB_PLACEHOLDER.captures_iter(&template) {
            let matched = captures.get(0).map(|m| (m.start(), m.end()));
            let Some((start, end)) = matched else {
                continue;
            };
            let name = &captures[1];
            output.push_str(&template[cursor..start]);
            let replacement = if name == NO_VALUE {
                String::new()
            } else if let Some(supplied) = substitutions.get(name) {
                sub_replacement(name, supplied)?
            } else if let Some((logical_id, attribute)) = name.split_once('.') {
                let value = self.get_attribute(logical_id, attribute)?;
                sub_replacement(name, &value)?
            } else {
                let value = self.resolve_ref(name)?;
                sub_replacement(name, &value)?
            };
            output.push_str(&replacement);
            cursor = end;
        }
        output.push_str(&template[cursor..]);
        Ok(Value::String(output))
    }

    fn fn_get_att(&mut self, argument: Value) -> ResolveResult<Value> {
        let (logical_id, attribute) = match &argument {
            Value::String(path) => {
                let Some((logical_id, attribute)) = path.split_once('.') else {
                    return Err(ResolveError::MalformedArguments {
                        function: "Fn::GetAtt".to_string(),
                        message: format!("expected 'logicalId.attribute', got '{path}'"),
                    });
                };
                (logical_id.to_string(), attribute.to_string())
            }
            Value::Array(items) => match items.as_slice() {
                [Value::String(logical_id), Value::String(attribute)] => {
                    (logical_id.clone(), attribute.clone())
                }
                _ => {
                    return Err(ResolveError::MalformedArguments {
                        function: "Fn::GetAtt".to_string(),
                        message: "expected [logicalId, attribute] as two strings".to_string(),
                    });
                }
            },
            other => {
                return Err(ResolveError::MalformedArguments {
                    function: "Fn::GetAtt".to_string(),
                    message: format!("unsupported argument of type {}", type_name(other)),
                });
            }
        };
        self.get_attribute(&logical_id, &attribute)
    }

    fn fn_import_value(&mut self, argument: Value) -> ResolveResult<Value> {
        let name = self.string_argument(argument, "Fn::ImportValue")?;
        self.context
            .exports
            .get(&name)
            .cloned()
            .ok_or(ResolveError::ExportNotFound { name })
    }

    fn fn_or(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::Or")?;
        let mut result = false;
        for item in items {
            result |= self.boolean_operand(item, "Fn::Or")?;
        }
        Ok(Value::Bool(result))
    }

    fn fn_and(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::And")?;
        let mut result = true;
        for item in items {
            result &= self.boolean_operand(item, "Fn::And")?;
        }
        Ok(Value::Bool(result))
    }

    fn fn_not(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::Not")?;
        let [operand] = take_items(items, "Fn::Not")?;
        Ok(Value::Bool(!self.boolean_operand(operand, "Fn::Not")?))
    }

    fn fn_equals(&mut self, argument: Value) -> ResolveResult<Value> {
        let resolved = self.resolve_argument(argument, "Fn::Equals")?;
        let items = match resolved {
            Value::Array(items) => items,
            other => {
                return Err(ResolveError::MalformedArguments {
                    function: "Fn::Equals".to_string(),
                    message: format!("needs a list with two items, got {}", type_name(&other)),
                });
            }
        };
        let [left, right] = take_items(items, "Fn::Equals")?;
        Ok(Value::Bool(left == right))
    }

    fn fn_contains(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::Contains")?;
        let [haystack, needle] = take_items(items, "Fn::Contains")?;
        let haystack = self.resolve_argument(haystack, "Fn::Contains")?;
        let needle = self.resolve_argument(needle, "Fn::Contains")?;
        match (&haystack, &needle) {
            (Value::Array(items), _) => Ok(Value::Bool(items.contains(&needle))),
            (Value::String(s), Value::String(sub)) => Ok(Value::Bool(s.contains(sub))),
            _ => Err(ResolveError::MalformedArguments {
                function: "Fn::Contains".to_string(),
                message: format!(
                    "cannot test {} membership in {}",
                    type_name(&needle),
                    type_name(&haystack)
                ),
            }),
        }
    }

    fn fn_if(&mut self, argument: Value) -> ResolveResult<Resolved> {
        let items = sequence(argument, "Fn::If")?;
        let [condition, when_true, when_false] = take_items(items, "Fn::If")?;
        let name = condition
            .as_str()
            .ok_or_else(|| ResolveError::MalformedArguments {
                function: "Fn::If".to_string(),
                message: "the first element must be a condition name".to_string(),
            })?;
        // Only the taken branch is evaluated.
        if self.condition_by_name(name)? {
            self.resolve_value(when_true)
        } else {
            self.resolve_value(when_false)
        }
    }

    fn fn_join(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::Join")?;
        let [delimiter, parts] = take_items(items, "Fn::Join")?;
        let delimiter = self.string_argument(delimiter, "Fn::Join")?;
        let parts = match self.resolve_argument(parts, "Fn::Join")? {
            Value::Array(parts) => parts,
            other => {
                return Err(ResolveError::MalformedArguments {
                    function: "Fn::Join".to_string(),
                    message: format!("the second element must be a sequence, got {}", type_name(&other)),
                });
            }
        };
        let mut joined = Vec::with_capacity(parts.len());
        for part in &parts {
            joined.push(scalar_to_string(part).ok_or_else(|| {
                ResolveError::MalformedArguments {
                    function: "Fn::Join".to_string(),
                    message: format!("cannot join a {} element", type_name(part)),
                }
            })?);
        }
        Ok(Value::String(joined.join(&delimiter)))
    }

    fn fn_select(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::Select")?;
        let [index, source] = take_items(items, "Fn::Select")?;
        let index = self.integer_argument(index, "Fn::Select")?;
        let source = match self.resolve_argument(source, "Fn::Select")? {
            Value::Array(items) => items,
            other => {
                return Err(ResolveError::MalformedArguments {
                    function: "Fn::Select".to_string(),
                    message: format!("the second element must be a sequence, got {}", type_name(&other)),
                });
            }
        };
        let size = source.len();
        usize::try_from(index)
            .ok()
            .and_then(|index| source.into_iter().nth(index))
            .ok_or(ResolveError::IndexOutOfBounds { index, size })
    }

    fn fn_split(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::Split")?;
        let [delimiter, source] = take_items(items, "Fn::Split")?;
        let delimiter = self.string_argument(delimiter, "Fn::Split")?;
        if delimiter.is_empty() {
            return Err(ResolveError::MalformedArguments {
                function: "Fn::Split".to_string(),
                message: "delimiter must not be empty".to_string(),
            });
        }
        let source = self.string_argument(source, "Fn::Split")?;
        Ok(Value::Array(
            source
                .split(delimiter.as_str())
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ))
    }

    fn fn_get_azs(&mut self, argument: Value) -> ResolveResult<Value> {
        let region = match self.resolve_argument(argument, "Fn::GetAZs")? {
            Value::Null => None,
            Value::String(s) if s.is_empty() => None,
            Value::String(s) => Some(s),
            other => {
                return Err(ResolveError::MalformedArguments {
                    function: "Fn::GetAZs".to_string(),
                    message: format!("expected a region name, got {}", type_name(&other)),
                });
            }
        };
        let region = region.unwrap_or_else(|| self.context.region.clone());
        Ok(Value::Array(
            ["a", "b", "c"]
                .iter()
                .map(|zone| Value::String(format!("{region}{zone}")))
                .collect(),
        ))
    }

    fn fn_find_in_map(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::FindInMap")?;
        let [map_name, top_key, second_key] = take_items(items, "Fn::FindInMap")?;
        let map_name = self.string_argument(map_name, "Fn::FindInMap")?;
        let top_key = self.string_argument(top_key, "Fn::FindInMap")?;
        let second_key = self.string_argument(second_key, "Fn::FindInMap")?;
        let map = self
            .mappings
            .get(&map_name)
            .ok_or_else(|| ResolveError::MappingNotFound {
                name: map_name.clone(),
            })?;
        let nested = map
            .get(&top_key)
            .ok_or_else(|| ResolveError::MappingKeyNotFound {
                name: map_name.clone(),
                key: top_key.clone(),
            })?;
        nested
            .get(&second_key)
            .cloned()
            .ok_or(ResolveError::MappingKeyNotFound {
                name: map_name,
                key: second_key,
            })
    }

    fn fn_cidr(&mut self, argument: Value) -> ResolveResult<Value> {
        let items = sequence(argument, "Fn::Cidr")?;
        let [base, count, mask_bits] = take_items(items, "Fn::Cidr")?;
        let base = self.string_argument(base, "Fn::Cidr")?;
        let count = self.integer_argument(count, "Fn::Cidr")?;
        let mask_bits = self.integer_argument(mask_bits, "Fn::Cidr")?;
        let count = u64::try_from(count).map_err(|_| ResolveError::MalformedArguments {
            function: "Fn::Cidr".to_string(),
            message: format!("subnet count must be non-negative, got {count}"),
        })?;
        let mask_bits = u32::try_from(mask_bits).map_err(|_| ResolveError::MalformedArguments {
            function: "Fn::Cidr".to_string(),
            message: format!("mask bits must be non-negative, got {mask_bits}"),
        })?;
        let subnets =
            cidr_subnets(&base, count, mask_bits).map_err(|message| {
                ResolveError::MalformedArguments {
                    function: "Fn::Cidr".to_string(),
                    message,
                }
            })?;
        Ok(Value::Array(subnets.into_iter().map(Value::String).collect()))
    }

    fn fn_length(&mut self, argument: Value) -> ResolveResult<Value> {
        match self.resolve_argument(argument, "Fn::Length")? {
            Value::Array(items) => Ok(Value::from(items.len())),
            other => Err(ResolveError::MalformedArguments {
                function: "Fn::Length".to_string(),
                message: format!("expected a sequence, got {}", type_name(&other)),
            }),
        }
    }

    fn fn_base64(&mut self, argument: Value) -> ResolveResult<Value> {
        match self.resolve_argument(argument, "Fn::Base64")? {
            Value::String(s) => Ok(Value::String(general_purpose::STANDARD.encode(s))),
            other => Err(ResolveError::MalformedArguments {
                function: "Fn::Base64".to_string(),
                message: format!("expected a string, got {}", type_name(&other)),
            }),
        }
    }

    // ---- argument helpers ----

    fn string_argument(&mut self, node: Value, function: &'static str) -> ResolveResult<String> {
        let resolved = self.resolve_argument(node, function)?;
        scalar_to_string(&resolved).ok_or_else(|| ResolveError::MalformedArguments {
            function: function.to_string(),
            message: format!("expected a string, got {}", type_name(&resolved)),
        })
    }

    fn integer_argument(&mut self, node: Value, function: &'static str) -> ResolveResult<i64> {
        match self.resolve_argument(node, function)? {
            Value::Number(n) => n.as_i64().ok_or_else(|| ResolveError::MalformedArguments {
                function: function.to_string(),
                message: format!("expected an integer, got {n}"),
            }),
            Value::String(s) => {
                s.trim()
                    .parse()
                    .map_err(|_| ResolveError::MalformedArguments {
                        function: function.to_string(),
                        message: format!("expected an integer, got '{s}'"),
                    })
            }
            other => Err(ResolveError::MalformedArguments {
                function: function.to_string(),
                message: format!("expected an integer, got {}", type_name(&other)),
            }),
        }
    }
}

/// Whether a value is a one-key `Ref`/`Fn::*` expression node
fn is_expression_node(value: &Value) -> bool {
    match value.as_object() {
        Some(map) if map.len() == 1 => map
            .keys()
            .next()
            .is_some_and(|key| key == "Ref" || key.starts_with("Fn::")),
        _ => false,
    }
}

fn sequence(argument: Value, function: &'static str) -> ResolveResult<Vec<Value>> {
    match argument {
        Value::Array(items) => Ok(items),
        other => Err(ResolveError::MalformedArguments {
            function: function.to_string(),
            message: format!("expected a sequence, got {}", type_name(&other)),
        }),
    }
}

/// Convert a sequence into exactly `N` elements, or fail with the element
/// count mismatch
fn take_items<const N: usize>(
    items: Vec<Value>,
    function: &'static str,
) -> ResolveResult<[Value; N]> {
    let actual = items.len();
    items
        .try_into()
        .map_err(|_| ResolveError::MalformedArguments {
            function: function.to_string(),
            message: format!("expected {N} elements, got {actual}"),
        })
}

fn sub_replacement(name: &str, value: &Value) -> ResolveResult<String> {
    scalar_to_string(value).ok_or_else(|| ResolveError::MalformedArguments {
        function: "Fn::Sub".to_string(),
        message: format!("placeholder '${{{name}}}' resolved to a non-scalar value"),
    })
}

/// Split a base CIDR into its first `count` subnets
///
/// The per-subnet prefix length is the address family's bit width (32 for
/// IPv4, 64 for IPv6) minus `mask_bits`.
fn cidr_subnets(base: &str, count: u64, mask_bits: u32) -> Result<Vec<String>, String> {
    let (address, prefix) = base
        .split_once('/')
        .ok_or_else(|| format!("invalid CIDR block '{base}'"))?;
    let prefix: u32 = prefix
        .parse()
        .map_err(|_| format!("invalid prefix length in '{base}'"))?;

    if address.contains(':') {
        let address: Ipv6Addr = address
            .parse()
            .map_err(|_| format!("invalid IPv6 address in '{base}'"))?;
        if prefix > 128 {
            return Err(format!("prefix /{prefix} is out of range for IPv6"));
        }
        if mask_bits >= 64 {
            return Err(format!("mask bits {mask_bits} out of range for IPv6"));
        }
        let new_prefix = 64 - mask_bits;
        if new_prefix < prefix {
            return Err(format!(
                "cannot split a /{prefix} network into /{new_prefix} subnets"
            ));
        }
        let network = u128::from(address) & mask_u128(prefix);
        let step = 1u128 << (128 - new_prefix);
        let available = available_subnets(new_prefix - prefix);
        if count > available {
            return Err(format!(
                "a /{prefix} network holds only {available} /{new_prefix} subnets, {count} requested"
            ));
        }
        Ok((0..count)
            .map(|i| format!("{}/{}", Ipv6Addr::from(network + u128::from(i) * step), new_prefix))
            .collect())
    } else {
        let address: Ipv4Addr = address
            .parse()
            .map_err(|_| format!("invalid IPv4 address in '{base}'"))?;
        if prefix > 32 {
            return Err(format!("prefix /{prefix} is out of range for IPv4"));
        }
        if mask_bits >= 32 {
            return Err(format!("mask bits {mask_bits} out of range for IPv4"));
        }
        let new_prefix = 32 - mask_bits;
        if new_prefix < prefix {
            return Err(format!(
                "cannot split a /{prefix} network into /{new_prefix} subnets"
            ));
        }
        let network = u64::from(u32::from(address)) & mask_u64(prefix);
        let step = 1u64 << (32 - new_prefix);
        let available = available_subnets(new_prefix - prefix);
        if count > available {
            return Err(format!(
                "a /{prefix} network holds only {available} /{new_prefix} subnets, {count} requested"
            ));
        }
        Ok((0..count)
            .map(|i| {
                let subnet = u32::try_from(network + i * step).unwrap_or(u32::MAX);
                format!("{}/{}", Ipv4Addr::from(subnet), new_prefix)
            })
            .collect())
    }
}

fn available_subnets(extra_bits: u32) -> u64 {
    if extra_bits >= 64 {
        u64::MAX
    } else {
        1u64 << extra_bits
    }
}

fn mask_u128(prefix: u32) -> u128 {
    if prefix == 0 { 0 } else { !0u128 << (128 - prefix) }
}

fn mask_u64(prefix: u32) -> u64 {
    let full = 0xffff_ffffu64;
    if prefix == 0 {
        0
    } else {
        full & (full << (32 - prefix))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cidr_v4_split() {
        let subnets = cidr_subnets("10.0.0.0/16", 2, 8).unwrap();
        assert_eq!(subnets, vec!["10.0.0.0/24", "10.0.1.0/24"]);
    }

    #[test]
    fn test_cidr_v4_masks_host_bits() {
        let subnets = cidr_subnets("192.168.1.77/24", 2, 4).unwrap();
        assert_eq!(subnets, vec!["192.168.1.0/28", "192.168.1.16/28"]);
    }

    #[test]
    fn test_cidr_v4_exhausted() {
        let err = cidr_subnets("10.0.0.0/24", 300, 8).unwrap_err();
        assert!(err.contains("256"), "unexpected message: {err}");
    }

    #[test]
    fn test_cidr_v6_prefix_width() {
        let subnets = cidr_subnets("2001:db8::/32", 2, 16).unwrap();
        assert_eq!(subnets[0], "2001:db8::/48");
        assert_eq!(subnets[1], "2001:db8:1::/48");
    }

    #[test]
    fn test_cidr_rejects_impossible_split() {
        assert!(cidr_subnets("10.0.0.0/28", 2, 8).is_err());
        assert!(cidr_subnets("10.0.0.0", 1, 8).is_err());
    }

    #[test]
    fn test_expression_node_detection() {
        let node: Value = serde_json::json!({"Ref": "X"});
        assert!(is_expression_node(&node));
        let node: Value = serde_json::json!({"Fn::Join": []});
        assert!(is_expression_node(&node));
        let node: Value = serde_json::json!({"Ref": "X", "Other": 1});
        assert!(!is_expression_node(&node));
        let node: Value = serde_json::json!({"Name": "X"});
        assert!(!is_expression_node(&node));
    }
}
