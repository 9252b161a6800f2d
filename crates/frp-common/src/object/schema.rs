//! Structural schema derivation
//!
//! The API server only accepts self-contained, normalized schemas when a new
//! kind is registered. Schemas are generated once from the spec types with
//! schemars and then rewritten: references are inlined, single-member
//! `allOf` wrappers are flattened, nullable unions collapse into `nullable`,
//! enum defaults are made members of their enum and pattern-keyed maps
//! become `additionalProperties`.

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use schemars::gen::SchemaSettings;
use serde_json::{json, Map, Value};

use super::{ObjectMeta, ObjectSpec, StatusDocument};
use crate::{Error, Result};

const DEFINITIONS_PREFIX: &str = "#/definitions/";

/// Object name used for schema validation errors
const SCHEMA_CONTEXT: &str = "schema";

/// Rewrite `root` into a structural schema, inlining `definitions`
pub fn structural_schema(root: Value, definitions: &Map<String, Value>) -> Result<Value> {
    Normalizer {
        definitions,
        resolving: Vec::new(),
    }
    .normalize(root)
}

struct Normalizer<'a> {
    definitions: &'a Map<String, Value>,
    /// Definitions currently being inlined, for cycle detection
    resolving: Vec<String>,
}

impl Normalizer<'_> {
    fn normalize(&mut self, node: Value) -> Result<Value> {
        let Value::Object(mut node) = node else {
            return Ok(node);
        };

        if let Some(reference) = node.remove("$ref") {
            return self.inline(&reference, node);
        }

        if let Some(all_of) = node.remove("allOf") {
            let member = single_member(all_of)?;
            let member = self.normalize(member)?;
            if let Value::Object(member) = member {
                node.extend(member);
            }
            return self.normalize(Value::Object(node));
        }

        if let Some(member) = take_nullable_member(&mut node) {
            node.insert("nullable".into(), Value::Bool(true));
            if let Value::Object(member) = self.normalize(member)? {
                node.extend(member);
            }
            return self.normalize(Value::Object(node));
        }

        collapse_null_type(&mut node);
        include_default_in_enum(&mut node);

        if node.get("type").and_then(Value::as_str) == Some("object") {
            if let Some(default) = node.get_mut("default") {
                strip_nulls(default);
            }
        }

        if let Some(Value::Object(patterns)) = node.remove("patternProperties") {
            if let Some((_, first)) = patterns.into_iter().next() {
                node.insert("additionalProperties".into(), first);
            }
        }

        if let Some(Value::Object(properties)) = node.get_mut("properties") {
            for property in properties.values_mut() {
                *property = self.normalize(property.take())?;
            }
        }
        match node.get_mut("items") {
            Some(Value::Array(items)) => {
                for item in items.iter_mut() {
                    *item = self.normalize(item.take())?;
                }
            }
            Some(items @ Value::Object(_)) => *items = self.normalize(items.take())?,
            _ => {}
        }
        if let Some(additional @ Value::Object(_)) = node.get_mut("additionalProperties") {
            *additional = self.normalize(additional.take())?;
        }

        Ok(Value::Object(node))
    }

    fn inline(&mut self, reference: &Value, siblings: Map<String, Value>) -> Result<Value> {
        let name = reference
            .as_str()
            .and_then(|r| r.strip_prefix(DEFINITIONS_PREFIX))
            .ok_or_else(|| {
                Error::validation_for(SCHEMA_CONTEXT, format!("unsupported reference {reference}"))
            })?;
        if self.resolving.iter().any(|r| r == name) {
            return Err(Error::validation_for(
                SCHEMA_CONTEXT,
                format!("recursive definition {name} cannot be inlined"),
            ));
        }
        let definition = self.definitions.get(name).cloned().ok_or_else(|| {
            Error::validation_for(SCHEMA_CONTEXT, format!("unknown definition {name}"))
        })?;

        let mut merged = match definition {
            Value::Object(map) => map,
            other => return Ok(other),
        };
        merged.extend(siblings);

        self.resolving.push(name.to_string());
        let inlined = self.normalize(Value::Object(merged));
        self.resolving.pop();
        inlined
    }
}

fn single_member(all_of: Value) -> Result<Value> {
    match all_of {
        Value::Array(mut members) if members.len() == 1 => Ok(members.remove(0)),
        Value::Array(members) => Err(Error::validation_for(
            SCHEMA_CONTEXT,
            format!("cannot flatten allOf with {} members", members.len()),
        )),
        other => Err(Error::validation_for(
            SCHEMA_CONTEXT,
            format!("allOf must be an array, got {other}"),
        )),
    }
}

fn is_null_schema(schema: &Value) -> bool {
    schema.get("type").and_then(Value::as_str) == Some("null")
}

/// `anyOf: [X, {type: null}]` (in either order) yields `X`
fn take_nullable_member(node: &mut Map<String, Value>) -> Option<Value> {
    let Some(Value::Array(branches)) = node.get("anyOf") else {
        return None;
    };
    if branches.len() != 2 || !branches.iter().any(is_null_schema) {
        return None;
    }
    let Some(Value::Array(branches)) = node.remove("anyOf") else {
        return None;
    };
    branches.into_iter().find(|b| !is_null_schema(b))
}

/// `type: [T, "null"]` becomes `type: T, nullable: true`
fn collapse_null_type(node: &mut Map<String, Value>) {
    let Some(Value::Array(types)) = node.get_mut("type") else {
        return;
    };
    let before = types.len();
    types.retain(|t| t != "null");
    let nullable = types.len() != before;
    if types.len() == 1 {
        let only = types.remove(0);
        node.insert("type".into(), only);
    }
    if nullable {
        node.insert("nullable".into(), Value::Bool(true));
    }
}

/// The API server rejects defaults that are not members of their enum
fn include_default_in_enum(node: &mut Map<String, Value>) {
    if node.get("type").and_then(Value::as_str) != Some("string") {
        return;
    }
    let Some(default) = node.get("default").filter(|d| !d.is_null()).cloned() else {
        return;
    };
    if let Some(Value::Array(values)) = node.get_mut("enum") {
        if !values.contains(&default) {
            values.push(default);
        }
    }
}

fn strip_nulls(value: &mut Value) {
    match value {
        Value::Object(map) => {
            map.retain(|_, v| !v.is_null());
            map.values_mut().for_each(strip_nulls);
        }
        Value::Array(items) => items.iter_mut().for_each(strip_nulls),
        _ => {}
    }
}

/// Structural schema of a whole object of kind `S::API`, without metadata
pub fn describe_schema<S: ObjectSpec>() -> Result<Value> {
    let mut generator = SchemaSettings::draft07().into_generator();
    let metadata = generator.subschema_for::<ObjectMeta>();
    let spec = generator.subschema_for::<S>();
    let status = generator.subschema_for::<S::Status>();

    let definitions = generator
        .take_definitions()
        .into_iter()
        .map(|(name, schema)| serde_json::to_value(schema).map(|v| (name, v)))
        .collect::<serde_json::Result<Map<String, Value>>>()?;

    let mut properties = Map::new();
    properties.insert("apiVersion".into(), json!({"type": "string"}));
    properties.insert("kind".into(), json!({"type": "string"}));
    properties.insert("metadata".into(), serde_json::to_value(metadata)?);
    properties.insert(S::SPEC_FIELD.into(), serde_json::to_value(spec)?);
    if let Some(sub) = S::Status::SUBRESOURCE {
        properties.insert(sub.into(), serde_json::to_value(status)?);
    }
    let root = json!({"type": "object", "properties": properties});

    let mut schema = structural_schema(root, &definitions)?;

    // Metadata is supplied by the API server.
    if let Some(Value::Object(properties)) = schema.get_mut("properties") {
        properties.remove("metadata");
    }
    if let Some(Value::Array(required)) = schema.get_mut("required") {
        required.retain(|r| r != "metadata");
    }
    Ok(schema)
}

/// CustomResourceDefinition document registering kind `S::API`
pub fn describe_crd<S: ObjectSpec>() -> Result<Value> {
    let api = S::API;
    let schema = describe_schema::<S>()?;
    let scope = if api.namespaced { "Namespaced" } else { "Cluster" };
    let mut version = json!({
        "name": api.version,
        "served": true,
        "storage": true,
        "schema": {"openAPIV3Schema": schema},
    });
    if let Some(sub) = S::Status::SUBRESOURCE {
        version["subresources"] = json!({ sub: {} });
    }
    Ok(json!({
        "apiVersion": "apiextensions.k8s.io/v1",
        "kind": "CustomResourceDefinition",
        "metadata": {"name": format!("{}.{}", api.plural, api.group)},
        "spec": {
            "group": api.group,
            "names": {
                "kind": api.kind,
                "listKind": format!("{}List", api.kind),
                "plural": api.plural,
                "singular": api.singular(),
            },
            "scope": scope,
            "versions": [version],
        }
    }))
}

/// Typed CustomResourceDefinition for kind `S::API`
pub fn custom_resource_definition<S: ObjectSpec>() -> Result<CustomResourceDefinition> {
    serde_json::from_value(describe_crd::<S>()?)
        .map_err(|e| Error::serialization_for_kind("CustomResourceDefinition", e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;
    use crate::object::NoStatus;
    use crate::store::ApiType;
    use schemars::JsonSchema;
    use serde::{Deserialize, Serialize};

    #[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
    #[serde(rename_all = "lowercase")]
    enum Mode {
        Active,
        Passive,
    }

    fn default_mode() -> Mode {
        Mode::Active
    }

    #[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
    struct Inner {
        port: u16,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        host: Option<String>,
    }

    /// Fixture covering every rewrite
    #[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    struct FixtureSpec {
        /// Operating mode
        #[serde(default = "default_mode")]
        mode: Mode,
        #[serde(default)]
        #[schemars(schema_with = "crate::labels::label_set_schema")]
        selector: LabelSet,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        inner: Option<Inner>,
        #[serde(default)]
        list: Vec<Inner>,
    }

    #[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema)]
    #[serde(rename_all = "camelCase")]
    struct FixtureStatus {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        config_hash: Option<String>,
    }

    impl StatusDocument for FixtureStatus {}

    impl ObjectSpec for FixtureSpec {
        type Status = FixtureStatus;
        const API: ApiType = ApiType {
            group: "frp.gou177.cyou",
            version: "v1",
            kind: "Fixture",
            plural: "fixtures",
            namespaced: true,
        };
    }

    #[derive(Clone, Debug, Serialize, Deserialize, JsonSchema)]
    struct PlainSpec {
        value: String,
    }

    impl ObjectSpec for PlainSpec {
        type Status = NoStatus;
        const API: ApiType = ApiType {
            group: "frp.gou177.cyou",
            version: "v1",
            kind: "Plain",
            plural: "plains",
            namespaced: false,
        };
    }

    fn contains_key(value: &Value, key: &str) -> bool {
        match value {
            Value::Object(map) => {
                map.contains_key(key) || map.values().any(|v| contains_key(v, key))
            }
            Value::Array(items) => items.iter().any(|v| contains_key(v, key)),
            _ => false,
        }
    }

    // =========================================================================
    // Derived schemas
    // =========================================================================

    #[test]
    fn derived_schema_is_self_contained() {
        let schema = describe_schema::<FixtureSpec>().unwrap();
        assert!(!contains_key(&schema, "$ref"));
        assert!(!contains_key(&schema, "allOf"));
        assert!(!contains_key(&schema, "anyOf"));
        assert!(!contains_key(&schema, "patternProperties"));
        assert!(!contains_key(&schema, "definitions"));
    }

    #[test]
    fn metadata_is_stripped() {
        let schema = describe_schema::<FixtureSpec>().unwrap();
        assert!(schema["properties"].get("metadata").is_none());
        assert!(schema["properties"].get("spec").is_some());
    }

    #[test]
    fn enum_default_already_present_is_not_duplicated() {
        let schema = describe_schema::<FixtureSpec>().unwrap();
        let mode = &schema["properties"]["spec"]["properties"]["mode"];
        assert_eq!(mode["type"], "string");
        assert_eq!(mode["default"], "active");
        assert_eq!(mode["enum"], json!(["active", "passive"]));
        assert_eq!(mode["description"], "Operating mode");
    }

    #[test]
    fn label_map_becomes_additional_properties() {
        let schema = describe_schema::<FixtureSpec>().unwrap();
        let selector = &schema["properties"]["spec"]["properties"]["selector"];
        assert_eq!(selector["type"], "object");
        assert_eq!(selector["additionalProperties"]["type"], "string");
        assert_eq!(
            selector["additionalProperties"]["pattern"],
            crate::labels::LABEL_VALUE_PATTERN
        );
    }

    #[test]
    fn optional_and_nested_fields_are_inlined() {
        let schema = describe_schema::<FixtureSpec>().unwrap();
        let spec = &schema["properties"]["spec"]["properties"];
        assert_eq!(spec["inner"]["nullable"], true);
        assert_eq!(spec["inner"]["properties"]["port"]["type"], "integer");
        assert_eq!(spec["inner"]["properties"]["host"]["type"], "string");
        assert_eq!(spec["inner"]["properties"]["host"]["nullable"], true);
        assert_eq!(spec["list"]["items"]["properties"]["port"]["type"], "integer");
    }

    #[test]
    fn status_is_a_subresource() {
        let crd = describe_crd::<FixtureSpec>().unwrap();
        assert_eq!(crd["metadata"]["name"], "fixtures.frp.gou177.cyou");
        assert_eq!(crd["spec"]["scope"], "Namespaced");
        assert_eq!(crd["spec"]["names"]["singular"], "fixture");
        let version = &crd["spec"]["versions"][0];
        assert_eq!(version["subresources"], json!({"status": {}}));
        assert!(version["schema"]["openAPIV3Schema"]["properties"]
            .get("status")
            .is_some());
    }

    #[test]
    fn kinds_without_status_have_no_subresources() {
        let crd = describe_crd::<PlainSpec>().unwrap();
        assert_eq!(crd["spec"]["scope"], "Cluster");
        let version = &crd["spec"]["versions"][0];
        assert!(version.get("subresources").is_none());
        assert!(version["schema"]["openAPIV3Schema"]["properties"]
            .get("status")
            .is_none());
    }

    #[test]
    fn crd_parses_into_typed_definition() {
        let crd = custom_resource_definition::<FixtureSpec>().unwrap();
        assert_eq!(crd.spec.group, "frp.gou177.cyou");
        assert_eq!(crd.spec.versions.len(), 1);
        assert!(crd.spec.versions[0].schema.is_some());
    }

    // =========================================================================
    // Rewrites on hand-written schemas
    // =========================================================================

    #[test]
    fn default_missing_from_enum_is_added() {
        let root = json!({"type": "string", "enum": ["a", "b"], "default": "c"});
        let out = structural_schema(root, &Map::new()).unwrap();
        assert_eq!(out["enum"], json!(["a", "b", "c"]));
    }

    #[test]
    fn single_all_of_member_overrides_wrapper() {
        let mut defs = Map::new();
        defs.insert("Port".into(), json!({"type": "integer", "description": "inner"}));
        let root = json!({
            "allOf": [{"$ref": "#/definitions/Port"}],
            "default": 7000,
            "description": "outer"
        });
        let out = structural_schema(root, &defs).unwrap();
        assert_eq!(
            out,
            json!({"type": "integer", "default": 7000, "description": "inner"})
        );
    }

    #[test]
    fn multi_member_all_of_is_rejected() {
        let root = json!({"allOf": [{"type": "string"}, {"type": "integer"}]});
        let err = structural_schema(root, &Map::new()).unwrap_err();
        assert!(matches!(err, Error::Validation { .. }));
    }

    #[test]
    fn unknown_and_recursive_references_are_rejected() {
        let root = json!({"$ref": "#/definitions/Missing"});
        assert!(structural_schema(root, &Map::new()).is_err());

        let mut defs = Map::new();
        defs.insert(
            "Node".into(),
            json!({"type": "object", "properties": {"next": {"$ref": "#/definitions/Node"}}}),
        );
        let err = structural_schema(json!({"$ref": "#/definitions/Node"}), &defs).unwrap_err();
        assert!(err.to_string().contains("recursive"));
    }

    #[test]
    fn object_defaults_drop_nulls() {
        let root = json!({
            "type": "object",
            "default": {"tcp": 7000, "kcp": null, "nested": {"x": null, "y": 1}}
        });
        let out = structural_schema(root, &Map::new()).unwrap();
        assert_eq!(out["default"], json!({"tcp": 7000, "nested": {"y": 1}}));
    }
}
