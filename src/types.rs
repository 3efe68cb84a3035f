//! Core domain types for docforge.
//!
//! Release tags, the API document model handed over by the extractor, the
//! example manifest, and the records persisted into every version directory.

use std::fmt;

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::config::CategoryDef;

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// A release tag of the form `vMAJOR.MINOR.PATCH`.
///
/// Ordering is numeric on (major, minor, patch), so `v0.10.0 > v0.9.3`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Tag {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl Tag {
    pub fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse a tag strictly: a leading `v` and exactly three ASCII-digit
    /// components. Anything else (`v1.2`, `v1.2.3-rc1`, `1.2.3`) is `None`.
    pub fn parse(s: &str) -> Option<Self> {
        let rest = s.strip_prefix('v')?;
        let mut parts = rest.split('.');
        let major = parse_component(parts.next()?)?;
        let minor = parse_component(parts.next()?)?;
        let patch = parse_component(parts.next()?)?;
        if parts.next().is_some() {
            return None;
        }
        Some(Self::new(major, minor, patch))
    }

    /// Milestones are the first release of a minor line (`vX.Y.0`).
    pub fn is_milestone(&self) -> bool {
        self.patch == 0
    }

    /// The minor line this tag belongs to.
    pub fn minor_version(&self) -> MinorVersion {
        MinorVersion {
            major: self.major,
            minor: self.minor,
        }
    }
}

fn parse_component(s: &str) -> Option<u32> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "v{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl TryFrom<String> for Tag {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Tag::parse(&value).ok_or_else(|| format!("not a release tag: {value}"))
    }
}

impl From<Tag> for String {
    fn from(tag: Tag) -> Self {
        tag.to_string()
    }
}

// ---------------------------------------------------------------------------
// MinorVersion
// ---------------------------------------------------------------------------

/// A `MAJOR.MINOR` key, used for the minimum supported version of a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct MinorVersion {
    pub major: u32,
    pub minor: u32,
}

impl MinorVersion {
    pub fn new(major: u32, minor: u32) -> Self {
        Self { major, minor }
    }

    pub fn parse(s: &str) -> Option<Self> {
        let (major, minor) = s.trim().split_once('.')?;
        Some(Self::new(parse_component(major)?, parse_component(minor)?))
    }
}

impl fmt::Display for MinorVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl TryFrom<String> for MinorVersion {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        MinorVersion::parse(&value).ok_or_else(|| format!("not a MAJOR.MINOR version: {value}"))
    }
}

impl From<MinorVersion> for String {
    fn from(v: MinorVersion) -> Self {
        v.to_string()
    }
}

// ---------------------------------------------------------------------------
// Per-entity outcomes
// ---------------------------------------------------------------------------

/// Result of processing one entity (module, class, example, ...).
///
/// A skipped entity never suppresses its siblings; the caller folds the
/// outcomes into a [`SkipReport`].
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome<T> {
    Ok(T),
    Skipped(String),
}

/// One entity that was left out, and why.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Skipped {
    pub entity: String,
    pub reason: String,
}

/// Aggregated skips for one collaborator invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SkipReport {
    pub skipped: Vec<Skipped>,
}

impl SkipReport {
    pub fn record(&mut self, entity: impl Into<String>, reason: impl Into<String>) {
        self.skipped.push(Skipped {
            entity: entity.into(),
            reason: reason.into(),
        });
    }

    /// Unwrap an outcome, recording the skip under `entity`.
    pub fn take<T>(&mut self, entity: &str, outcome: Outcome<T>) -> Option<T> {
        match outcome {
            Outcome::Ok(value) => Some(value),
            Outcome::Skipped(reason) => {
                self.record(entity, reason);
                None
            }
        }
    }

    pub fn merge(&mut self, other: SkipReport) {
        self.skipped.extend(other.skipped);
    }

    pub fn is_empty(&self) -> bool {
        self.skipped.is_empty()
    }

    pub fn len(&self) -> usize {
        self.skipped.len()
    }
}

// ---------------------------------------------------------------------------
// API document
// ---------------------------------------------------------------------------

/// A function or method as handed over by the extractor.
///
/// Only `name` and `description` are interpreted; everything else the
/// extractor emits (signatures, rendered docstrings, source) rides along in
/// `extra` and is written back to `api.json` untouched.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiFunction {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// A class with its methods, in declaration order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiClass {
    pub name: String,
    pub description: String,
    pub methods: Vec<ApiFunction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One documented module.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApiModule {
    pub name: String,
    pub description: String,
    pub classes: Vec<ApiClass>,
    pub functions: Vec<ApiFunction>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ApiModule {
    /// Modules with neither classes nor functions are not documented.
    pub fn is_empty(&self) -> bool {
        self.classes.is_empty() && self.functions.is_empty()
    }
}

/// The API document for one (package, tag), modules in extraction order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApiDocument {
    pub package: String,
    pub modules: Vec<ApiModule>,
}

impl ApiDocument {
    /// Validate raw extractor output (`{modules: {name: {...}}}`) into the
    /// typed model. Malformed entities are skipped and reported; the rest
    /// of the document survives.
    pub fn from_value(package: &str, value: &Value) -> (Self, SkipReport) {
        let mut report = SkipReport::default();
        let mut modules = Vec::new();

        if let Some(raw_modules) = value.get("modules").and_then(Value::as_object) {
            for (module_name, raw) in raw_modules {
                let outcome = parse_module(module_name, raw, &mut report);
                if let Some(module) = report.take(module_name, outcome) {
                    modules.push(module);
                }
            }
        }

        let package = value
            .get("package")
            .and_then(Value::as_str)
            .unwrap_or(package)
            .to_string();
        (Self { package, modules }, report)
    }
}

impl Serialize for ApiDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        struct Modules<'a>(&'a [ApiModule]);

        impl Serialize for Modules<'_> {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut map = serializer.serialize_map(Some(self.0.len()))?;
                for module in self.0 {
                    map.serialize_entry(&module.name, module)?;
                }
                map.end()
            }
        }

        let mut map = serializer.serialize_map(Some(2))?;
        map.serialize_entry("package", &self.package)?;
        map.serialize_entry("modules", &Modules(&self.modules))?;
        map.end()
    }
}

fn parse_module(module_name: &str, raw: &Value, report: &mut SkipReport) -> Outcome<ApiModule> {
    let Some(obj) = raw.as_object() else {
        return Outcome::Skipped("module is not an object".into());
    };

    let mut extra = obj.clone();
    extra.remove("name");
    let description = take_string(&mut extra, "description");

    let mut classes = Vec::new();
    if let Some(Value::Array(raw_classes)) = extra.remove("classes") {
        for (i, raw_class) in raw_classes.into_iter().enumerate() {
            let label = entity_label(module_name, &raw_class, i);
            let outcome = parse_class(&label, raw_class, report);
            if let Some(class) = report.take(&label, outcome) {
                classes.push(class);
            }
        }
    }

    let mut functions = Vec::new();
    if let Some(Value::Array(raw_functions)) = extra.remove("functions") {
        for (i, raw_function) in raw_functions.into_iter().enumerate() {
            let label = entity_label(module_name, &raw_function, i);
            let outcome = parse_function(raw_function);
            if let Some(function) = report.take(&label, outcome) {
                functions.push(function);
            }
        }
    }

    Outcome::Ok(ApiModule {
        name: module_name.to_string(),
        description,
        classes,
        functions,
        extra,
    })
}

fn parse_class(label: &str, raw: Value, report: &mut SkipReport) -> Outcome<ApiClass> {
    let Value::Object(mut obj) = raw else {
        return Outcome::Skipped("class is not an object".into());
    };
    let Some(name) = non_empty_name(&obj) else {
        return Outcome::Skipped("class has no name".into());
    };
    obj.remove("name");
    let description = take_string(&mut obj, "description");

    let mut methods = Vec::new();
    if let Some(Value::Array(raw_methods)) = obj.remove("methods") {
        for (i, raw_method) in raw_methods.into_iter().enumerate() {
            let method_label = entity_label(label, &raw_method, i);
            let outcome = parse_function(raw_method);
            if let Some(method) = report.take(&method_label, outcome) {
                methods.push(method);
            }
        }
    }

    Outcome::Ok(ApiClass {
        name,
        description,
        methods,
        extra: obj,
    })
}

fn parse_function(raw: Value) -> Outcome<ApiFunction> {
    let Value::Object(mut obj) = raw else {
        return Outcome::Skipped("entry is not an object".into());
    };
    let Some(name) = non_empty_name(&obj) else {
        return Outcome::Skipped("entry has no name".into());
    };
    obj.remove("name");
    let description = take_string(&mut obj, "description");
    Outcome::Ok(ApiFunction {
        name,
        description,
        extra: obj,
    })
}

fn non_empty_name(obj: &Map<String, Value>) -> Option<String> {
    obj.get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn take_string(obj: &mut Map<String, Value>, key: &str) -> String {
    match obj.remove(key) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

fn entity_label(parent: &str, raw: &Value, index: usize) -> String {
    match raw.get("name").and_then(Value::as_str) {
        Some(name) if !name.is_empty() => format!("{parent}.{name}"),
        _ => format!("{parent}[{index}]"),
    }
}

// ---------------------------------------------------------------------------
// Examples and manifests
// ---------------------------------------------------------------------------

/// Metadata for one example notebook, as listed in `manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExampleMeta {
    pub slug: String,
    pub file: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub category: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default = "default_true")]
    pub executable: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
}

impl ExampleMeta {
    /// The notebook file name without its extension; keys execution results.
    pub fn stem(&self) -> &str {
        self.file.strip_suffix(".ipynb").unwrap_or(&self.file)
    }
}

fn default_true() -> bool {
    true
}

/// `static/{package}/{tag}/manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionManifest {
    pub package: String,
    pub tag: String,
    #[serde(default)]
    pub notebooks: Vec<ExampleMeta>,
    #[serde(default)]
    pub categories: Vec<CategoryDef>,
}

/// One row of the package-level version list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VersionInfo {
    pub tag: String,
    pub released: String,
    pub has_examples: bool,
}

/// `static/{package}/manifest.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageManifest {
    pub package: String,
    pub latest_tag: String,
    pub versions: Vec<VersionInfo>,
}

// ---------------------------------------------------------------------------
// Index records
// ---------------------------------------------------------------------------

/// What a search or crossref record points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryKind {
    Page,
    Module,
    Class,
    Method,
    Function,
    Example,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Page => "page",
            Self::Module => "module",
            Self::Class => "class",
            Self::Method => "method",
            Self::Function => "function",
            Self::Example => "example",
        }
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One flat record in `search-index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchEntry {
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub name: String,
    pub description: String,
    pub path: String,
    pub package_id: String,
    pub module_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
}

/// One target in `crossref-index.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CrossrefEntry {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub package_id: String,
    pub module_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_class: Option<String>,
    pub path: String,
}

/// `embeddings-index.json`: one `dim`-wide vector per search entry, packed
/// as little-endian f32 and base64 encoded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingIndex {
    pub model: String,
    pub dim: usize,
    pub count: usize,
    pub embeddings: String,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
