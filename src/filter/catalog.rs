use std::collections::HashMap;

use super::error::FilterError;
use super::types::{quote_identifier, ColumnRef, JoinStep, ValueType};

#[derive(Debug, Clone)]
pub struct ColumnDef {
    pub name: String,
    pub value_type: ValueType,
    /// Never returned to clients (password hashes and the like).
    pub hidden: bool,
}

/// A relationship that can be materialized next to the base rows.
#[derive(Debug, Clone)]
pub struct Relationship {
    pub name: String,
    pub target: String,
    /// Column on the owning entity.
    pub local_column: String,
    /// Column on the target entity.
    pub remote_column: String,
    /// One-to-many relationships load as arrays, many-to-one as objects.
    pub many: bool,
}

/// Physical description of one persisted entity.
#[derive(Debug, Clone)]
pub struct EntityDef {
    pub name: String,
    pub table: String,
    pub primary_key: String,
    pub columns: Vec<ColumnDef>,
    pub relationships: Vec<Relationship>,
    pub owner_column: Option<String>,
    pub owner_extra_column: Option<String>,
    pub log_fields: Vec<String>,
}

impl EntityDef {
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: "id".to_string(),
            columns: vec![],
            relationships: vec![],
            owner_column: None,
            owner_extra_column: None,
            log_fields: vec![],
        }
    }

    pub fn column(mut self, name: &str, value_type: ValueType) -> Self {
        self.columns.push(ColumnDef { name: name.to_string(), value_type, hidden: false });
        self
    }

    pub fn hidden_column(mut self, name: &str, value_type: ValueType) -> Self {
        self.columns.push(ColumnDef { name: name.to_string(), value_type, hidden: true });
        self
    }

    /// id, created_at, updated_at, created_by, updated_by, description, changelog
    pub fn base_fields(self) -> Self {
        self.column("id", ValueType::Uuid)
            .column("created_at", ValueType::Timestamp)
            .column("updated_at", ValueType::Timestamp)
            .column("created_by", ValueType::Uuid)
            .column("updated_by", ValueType::Uuid)
            .column("description", ValueType::Text)
            .column("changelog", ValueType::Json)
    }

    pub fn has_many(mut self, name: &str, target: &str, remote_column: &str) -> Self {
        self.relationships.push(Relationship {
            name: name.to_string(),
            target: target.to_string(),
            local_column: self.primary_key.clone(),
            remote_column: remote_column.to_string(),
            many: true,
        });
        self
    }

    pub fn belongs_to(mut self, name: &str, target: &str, local_column: &str) -> Self {
        self.relationships.push(Relationship {
            name: name.to_string(),
            target: target.to_string(),
            local_column: local_column.to_string(),
            remote_column: "id".to_string(),
            many: false,
        });
        self
    }

    pub fn owned_by(mut self, column: &str, extra: Option<&str>) -> Self {
        self.owner_column = Some(column.to_string());
        self.owner_extra_column = extra.map(str::to_string);
        self
    }

    pub fn log_fields(mut self, fields: &[&str]) -> Self {
        self.log_fields = fields.iter().map(|f| f.to_string()).collect();
        self
    }

    pub fn column_def(&self, name: &str) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_def(name).is_some()
    }

    pub fn visible_columns(&self) -> impl Iterator<Item = &ColumnDef> {
        self.columns.iter().filter(|c| !c.hidden)
    }

    pub fn is_changelog_tracked(&self) -> bool {
        self.has_column("changelog") && !self.log_fields.is_empty()
    }
}

/// How a straight-mapped prefix is joined when the query does not override it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefaultJoin {
    /// Follow the base entity's declared relationship to the target.
    Relationship,
    /// `target.<target_column> = base.<base_column>`
    OnBase { base_column: String, target_column: String },
}

#[derive(Debug, Clone)]
pub struct ModelMapEntry {
    pub entity: String,
    pub join: DefaultJoin,
}

/// All registered entities plus the global prefix → entity map.
///
/// Built once at startup and shared read-only afterwards.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    entities: HashMap<String, EntityDef>,
    model_map: HashMap<String, ModelMapEntry>,
}

impl Catalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an entity and maps its own name as a prefix.
    pub fn register(mut self, entity: EntityDef) -> Self {
        self.model_map.insert(
            entity.name.clone(),
            ModelMapEntry { entity: entity.name.clone(), join: DefaultJoin::Relationship },
        );
        self.entities.insert(entity.name.clone(), entity);
        self
    }

    /// Maps an extra prefix (e.g. `changed_by`) onto a registered entity.
    pub fn alias(mut self, prefix: &str, entity: &str, join: DefaultJoin) -> Self {
        self.model_map
            .insert(prefix.to_string(), ModelMapEntry { entity: entity.to_string(), join });
        self
    }

    pub fn entity(&self, name: &str) -> Result<&EntityDef, FilterError> {
        self.entities
            .get(name)
            .ok_or_else(|| FilterError::UnknownEntity(name.to_string()))
    }

    pub fn model_map(&self, prefix: &str) -> Option<&ModelMapEntry> {
        self.model_map.get(prefix)
    }

    pub fn table(&self, entity: &str) -> Result<&str, FilterError> {
        Ok(self.entity(entity)?.table.as_str())
    }

    /// `"<table>"."<column>"` for a column of a registered entity.
    pub fn column_sql(&self, entity: &str, column: &str) -> Result<String, FilterError> {
        Ok(format!("{}.{}", quote_identifier(self.table(entity)?), quote_identifier(column)))
    }

    /// Join step from `base` to the prefix's entity when no override applies.
    pub fn default_join(&self, base: &str, prefix: &str) -> Result<Vec<JoinStep>, FilterError> {
        let entry = self
            .model_map(prefix)
            .ok_or_else(|| FilterError::UnknownEntity(prefix.to_string()))?;
        match &entry.join {
            DefaultJoin::OnBase { base_column, target_column } => Ok(vec![JoinStep {
                target: entry.entity.clone(),
                left: ColumnRef::new(entry.entity.clone(), target_column.clone()),
                right: ColumnRef::new(base, base_column.clone()),
            }]),
            DefaultJoin::Relationship => self.relationship_join(base, &entry.entity),
        }
    }

    /// Join inferred from a relationship declared on `base` towards `target`.
    pub fn relationship_join(&self, base: &str, target: &str) -> Result<Vec<JoinStep>, FilterError> {
        if base == target {
            return Ok(vec![]);
        }
        let relationship = self
            .entity(base)?
            .relationships
            .iter()
            .find(|r| r.target == target)
            .ok_or_else(|| FilterError::NoJoinPath { from: base.to_string(), to: target.to_string() })?;
        Ok(vec![JoinStep {
            target: target.to_string(),
            left: ColumnRef::new(target, relationship.remote_column.clone()),
            right: ColumnRef::new(base, relationship.local_column.clone()),
        }])
    }
}
