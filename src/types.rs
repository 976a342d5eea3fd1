//! Core data model: [`ExtractItem`], [`ExtractResult`], and the small
//! resource-tree representation an extraction produces.

use std::collections::BTreeMap;

/// A file awaiting or undergoing extraction, as read from one row of the
/// `get-items` cursor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractItem {
    /// Absolute file URL (`file:///...`).
    pub url: String,
    /// Graph-internal integer identifier.
    pub id: i64,
    /// Stable identifier used when synthesizing graph resources for this item.
    pub content_id: String,
    /// Mime type as recorded in the graph.
    pub mime_type: String,
    /// The graph this item lives in (e.g. "audio", "pictures").
    pub graph: String,
}

/// A single subject-predicate-object triple in a synthesized [`Resource`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Triple {
    pub predicate: String,
    pub object: Value,
}

/// The object side of a triple: either a literal value or a link to
/// another synthesized resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    Literal(String),
    Resource(Box<Resource>),
}

/// A tree of triples rooted at a synthesized identifier, ready to be
/// serialized into the graph. `rdf_types` holds the type hierarchy this
/// resource claims to implement; `properties` holds everything else,
/// keyed by predicate so repeated predicates collapse deterministically
/// under a `BTreeMap` (ordering matters for golden-file-style tests that
/// compare serialized resources).
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Resource {
    pub identifier: String,
    pub rdf_types: Vec<String>,
    pub properties: BTreeMap<String, Vec<Value>>,
}

impl Resource {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            rdf_types: Vec::new(),
            properties: BTreeMap::new(),
        }
    }

    pub fn with_type(mut self, rdf_type: impl Into<String>) -> Self {
        self.rdf_types.push(rdf_type.into());
        self
    }

    pub fn with_literal(mut self, predicate: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .entry(predicate.into())
            .or_default()
            .push(Value::Literal(value.into()));
        self
    }

    pub fn with_resource(mut self, predicate: impl Into<String>, value: Resource) -> Self {
        self.properties
            .entry(predicate.into())
            .or_default()
            .push(Value::Resource(Box::new(value)));
        self
    }

    /// Whether this resource carries nothing beyond its type hierarchy
    /// (spec §4.2: "result is structurally empty" still produces a
    /// minimal resource with only the hash recorded).
    pub fn is_empty_of_content(&self) -> bool {
        self.properties.is_empty()
    }

    /// Flattens this resource's type hierarchy and properties into
    /// `(predicate, object)` pairs, recursing into nested
    /// [`Value::Resource`] sub-trees so a linked resource's own triples
    /// are carried alongside the link itself. The graph store's
    /// `resources` table has no separate subject column (spec §6's
    /// `insert-resource` is scoped to one file), so every triple in the
    /// tree — root and nested — lands against the same file.
    pub fn flatten_triples(&self) -> Vec<(String, String)> {
        let mut triples = Vec::with_capacity(self.rdf_types.len() + self.properties.len());
        for rdf_type in &self.rdf_types {
            triples.push(("rdf:type".to_string(), rdf_type.clone()));
        }
        for (predicate, values) in &self.properties {
            for value in values {
                match value {
                    Value::Literal(text) => triples.push((predicate.clone(), text.clone())),
                    Value::Resource(nested) => {
                        triples.push((predicate.clone(), nested.identifier.clone()));
                        triples.extend(nested.flatten_triples());
                    }
                }
            }
        }
        triples
    }
}

/// The outcome of one handler invocation, ready to be appended to the
/// Sparql Buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractResult {
    pub file: String,
    pub mime_type: String,
    pub graph: String,
    pub resource: Resource,
    /// Hint consumed by text-heavy handlers; echoed back here so the
    /// commit pass can log it, not re-derived.
    pub max_text_bytes: usize,
    /// The versioned extractor hash that produced this result, written
    /// back via `update-hash` on commit.
    pub extractor_hash: String,
}
