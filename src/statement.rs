//! Statement definitions and the statement registry.
//!
//! A [`StatementDefinition`] is the parsed form of one declarative SQL
//! statement: id, template, parameter spec, and result shape. Definitions
//! are registered once at startup through [`RegistryBuilder`]; the built
//! [`StatementRegistry`] is immutable and safe for concurrent lock-free
//! lookup.

use crate::error::{MapResult, MapperError};
use crate::value::ValueType;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// What kind of round-trip a statement performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StatementKind {
    /// Produces rows.
    Query,
    /// Produces an affected-row count (INSERT/UPDATE/DELETE/DDL).
    Update,
    /// Update executed once for a sequence of parameter rows.
    Batch,
}

/// One declared statement parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParameterSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Named type handler applied on the encode side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
    /// Accepts a variable-length argument list; the template's lone
    /// placeholder group expands to one placeholder per value (IN lists).
    /// Must be the statement's only parameter.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub expand: bool,
}

impl ParameterSpec {
    pub fn new(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            name: name.into(),
            value_type,
            handler: None,
            expand: false,
        }
    }

    /// An expanding parameter: binds a whole argument list, each element
    /// typed `value_type`.
    pub fn list(name: impl Into<String>, value_type: ValueType) -> Self {
        Self {
            expand: true,
            ..Self::new(name, value_type)
        }
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }
}

/// One column-to-field binding in an object result shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldBinding {
    /// Result-set column name.
    pub column: String,
    /// Field name in the mapped row handed to the object layer.
    pub field: String,
    #[serde(rename = "type")]
    pub value_type: ValueType,
    /// Named type handler applied on the decode side.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handler: Option<String>,
}

impl FieldBinding {
    pub fn new(
        column: impl Into<String>,
        field: impl Into<String>,
        value_type: ValueType,
    ) -> Self {
        Self {
            column: column.into(),
            field: field.into(),
            value_type,
            handler: None,
        }
    }

    pub fn with_handler(mut self, handler: impl Into<String>) -> Self {
        self.handler = Some(handler.into());
        self
    }
}

/// Declared shape of a statement's result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultShape {
    /// No result set (updates).
    None,
    /// Single-column scalar rows, surfaced under the `value` column.
    Scalar(ValueType),
    /// Field-mapping table applied to every row.
    Object(Vec<FieldBinding>),
}

/// An immutable, registered statement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementDefinition {
    /// Unique id, conventionally `Interface.method`.
    pub id: String,
    pub kind: StatementKind,
    /// SQL template with `?` (SQLite/MySQL) or `$n` (PostgreSQL)
    /// placeholders.
    pub sql: String,
    #[serde(default)]
    pub parameters: Vec<ParameterSpec>,
    pub result: ResultShape,
    /// Per-statement execution timeout override, milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Per-statement row fetch limit override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fetch_limit: Option<u32>,
}

impl StatementDefinition {
    pub fn query(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StatementKind::Query,
            sql: sql.into(),
            parameters: Vec::new(),
            result: ResultShape::Object(Vec::new()),
            timeout_ms: None,
            fetch_limit: None,
        }
    }

    pub fn update(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: StatementKind::Update,
            sql: sql.into(),
            parameters: Vec::new(),
            result: ResultShape::None,
            timeout_ms: None,
            fetch_limit: None,
        }
    }

    pub fn batch(id: impl Into<String>, sql: impl Into<String>) -> Self {
        Self {
            kind: StatementKind::Batch,
            ..Self::update(id, sql)
        }
    }

    pub fn with_parameter(mut self, spec: ParameterSpec) -> Self {
        self.parameters.push(spec);
        self
    }

    pub fn with_result(mut self, result: ResultShape) -> Self {
        self.result = result;
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_fetch_limit(mut self, fetch_limit: u32) -> Self {
        self.fetch_limit = Some(fetch_limit);
        self
    }

    /// Structural validation run at registration time.
    fn validate(&self) -> MapResult<()> {
        if self.id.trim().is_empty() {
            return Err(MapperError::config("statement id must not be empty"));
        }
        if self.sql.trim().is_empty() {
            return Err(MapperError::config(format!(
                "statement '{}' has an empty SQL template",
                self.id
            )));
        }
        let placeholders = count_placeholders(&self.sql);
        if placeholders != self.parameters.len() {
            return Err(MapperError::config(format!(
                "statement '{}' declares {} parameters but the template has {} placeholders",
                self.id,
                self.parameters.len(),
                placeholders
            )));
        }
        if self.parameters.iter().any(|p| p.expand) {
            if self.parameters.len() != 1 {
                return Err(MapperError::config(format!(
                    "statement '{}' declares an expanding parameter alongside others",
                    self.id
                )));
            }
            if self.kind == StatementKind::Batch {
                return Err(MapperError::config(format!(
                    "batch statement '{}' cannot declare an expanding parameter",
                    self.id
                )));
            }
        }
        match (self.kind, &self.result) {
            (StatementKind::Query, ResultShape::None) => Err(MapperError::config(format!(
                "query statement '{}' must declare a result shape",
                self.id
            ))),
            (StatementKind::Update | StatementKind::Batch, ResultShape::Scalar(_))
            | (StatementKind::Update | StatementKind::Batch, ResultShape::Object(_)) => {
                Err(MapperError::config(format!(
                    "update statement '{}' cannot declare a result shape",
                    self.id
                )))
            }
            _ => Ok(()),
        }
    }
}

/// Count bind placeholders in a SQL template.
///
/// Counts `?` markers outside string literals, or the highest `$n` index
/// for PostgreSQL-style templates. Templates mixing both styles count as
/// whichever yields more, which validation will then reject against the
/// parameter spec.
pub(crate) fn count_placeholders(sql: &str) -> usize {
    let mut question_marks = 0usize;
    let mut max_dollar = 0usize;
    let mut chars = sql.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            if c == '\'' {
                // '' escapes a quote inside a literal
                if chars.peek() == Some(&'\'') {
                    chars.next();
                } else {
                    in_string = false;
                }
            }
            continue;
        }
        match c {
            '\'' => in_string = true,
            '?' => question_marks += 1,
            '$' => {
                let mut digits = String::new();
                while let Some(d) = chars.peek() {
                    if d.is_ascii_digit() {
                        digits.push(*d);
                        chars.next();
                    } else {
                        break;
                    }
                }
                if let Ok(n) = digits.parse::<usize>() {
                    max_dollar = max_dollar.max(n);
                }
            }
            _ => {}
        }
    }
    question_marks.max(max_dollar)
}

/// Builder populated once at startup, then frozen into a registry.
#[derive(Debug, Default)]
pub struct RegistryBuilder {
    statements: HashMap<String, Arc<StatementDefinition>>,
    order: Vec<String>,
}

impl RegistryBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a definition. Duplicate ids fail and the first registration
    /// is retained.
    pub fn register(&mut self, def: StatementDefinition) -> MapResult<&mut Self> {
        def.validate()?;
        if self.statements.contains_key(&def.id) {
            return Err(MapperError::duplicate_statement(&def.id));
        }
        self.order.push(def.id.clone());
        self.statements.insert(def.id.clone(), Arc::new(def));
        Ok(self)
    }

    /// Register every definition in a JSON array document.
    pub fn register_json(&mut self, json: &str) -> MapResult<&mut Self> {
        let defs: Vec<StatementDefinition> = serde_json::from_str(json)
            .map_err(|e| MapperError::config(format!("invalid statement document: {}", e)))?;
        for def in defs {
            self.register(def)?;
        }
        Ok(self)
    }

    pub fn build(self) -> StatementRegistry {
        tracing::info!(statements = self.statements.len(), "statement registry built");
        StatementRegistry {
            statements: Arc::new(self.statements),
        }
    }
}

/// Read-only statement lookup. Cheap to clone, lock-free to read.
#[derive(Debug, Clone)]
pub struct StatementRegistry {
    statements: Arc<HashMap<String, Arc<StatementDefinition>>>,
}

impl StatementRegistry {
    pub fn resolve(&self, id: &str) -> MapResult<Arc<StatementDefinition>> {
        self.statements
            .get(id)
            .cloned()
            .ok_or_else(|| MapperError::unknown_statement(id))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.statements.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.statements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
