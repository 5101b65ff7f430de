use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::catalog::Catalog;
use super::error::FilterError;
use super::registry::{format_key, ColumnRegistry, MappingOverride};
use super::types::ValueType;

/// Kind of widget the UI renders for a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    #[default]
    Text,
    Image,
    Datetime,
    Url,
    Integer,
    Chart,
    QrCode,
    Enum,
    Boolean,
    Tag,
    Array,
}

fn default_true() -> bool {
    true
}

/// UI-facing annotation of one readable field (the `table_mapping` entry).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FieldAnnotation {
    pub key_name: String,
    pub column_name: String,
    #[serde(default)]
    pub column_type: ColumnType,
    #[serde(default = "default_true")]
    pub default_visibility: bool,
    #[serde(default)]
    pub is_editable: bool,
    #[serde(default)]
    pub is_filterable: bool,
    #[serde(default)]
    pub is_sortable: bool,
    #[serde(default)]
    pub is_searchable: bool,
    #[serde(default)]
    pub is_multiselect: bool,
    #[serde(default = "default_true")]
    pub show_in_table: bool,
    #[serde(default = "default_true")]
    pub show_in_page: bool,
    #[serde(default)]
    pub order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_values: Option<BTreeMap<String, Value>>,
    #[serde(default)]
    pub filter_by: Option<String>,
    #[serde(default)]
    pub update_by: Option<String>,
}

impl FieldAnnotation {
    pub fn new(key_name: &str, column_name: &str) -> Self {
        Self {
            key_name: key_name.to_string(),
            column_name: column_name.to_string(),
            column_type: ColumnType::Text,
            default_visibility: true,
            is_editable: false,
            is_filterable: false,
            is_sortable: false,
            is_searchable: false,
            is_multiselect: false,
            show_in_table: true,
            show_in_page: true,
            order: 0,
            group: None,
            available_values: None,
            filter_by: Some(key_name.to_string()),
            update_by: Some(key_name.to_string()),
        }
    }

    fn fill_defaults(mut self) -> Self {
        if self.filter_by.is_none() {
            self.filter_by = Some(self.key_name.clone());
        }
        if self.update_by.is_none() {
            self.update_by = Some(self.key_name.clone());
        }
        self
    }
}

/// On-disk layout of `schemas/<entity>.yaml`.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct SchemaFile {
    entity: String,
    #[serde(default)]
    period: Option<String>,
    #[serde(default)]
    search: Vec<String>,
    #[serde(default)]
    filter: BTreeMap<String, ValueType>,
    #[serde(default)]
    sort: Vec<String>,
    #[serde(default)]
    writable: Vec<String>,
    #[serde(default)]
    mapping: HashMap<String, MappingOverride>,
    #[serde(default)]
    read: Vec<FieldAnnotation>,
}

/// Immutable per-endpoint declaration of what may be searched, filtered,
/// sorted and written. Keys are stored fully qualified.
#[derive(Debug, Clone)]
pub struct QueryParameterSchema {
    entity: String,
    period_column: String,
    search: Vec<String>,
    filter: HashMap<String, ValueType>,
    sort: BTreeSet<String>,
    writable: BTreeSet<String>,
    mapping: HashMap<String, MappingOverride>,
    read: Vec<FieldAnnotation>,
}

impl QueryParameterSchema {
    pub fn builder(entity: &str) -> QueryParameterSchemaBuilder {
        QueryParameterSchemaBuilder {
            entity: entity.to_string(),
            period_column: None,
            search: vec![],
            filter: vec![],
            sort: vec![],
            writable: vec![],
            mapping: HashMap::new(),
            read: vec![],
        }
    }

    pub fn from_yaml(source: &str, catalog: &Catalog) -> Result<Self, FilterError> {
        let file: SchemaFile = serde_yaml::from_str(source)
            .map_err(|e| FilterError::InvalidSchema(e.to_string()))?;

        let mut builder = Self::builder(&file.entity)
            .search(&file.search.iter().map(String::as_str).collect::<Vec<_>>())
            .sort(&file.sort.iter().map(String::as_str).collect::<Vec<_>>())
            .writable(&file.writable.iter().map(String::as_str).collect::<Vec<_>>());
        if let Some(period) = &file.period {
            builder = builder.period(period);
        }
        for (key, value_type) in file.filter {
            builder = builder.filter(&key, value_type);
        }
        for (prefix, mapping) in file.mapping {
            builder = builder.mapping(&prefix, mapping);
        }
        for annotation in file.read {
            builder = builder.read(annotation);
        }
        builder.build(catalog)
    }

    pub fn entity(&self) -> &str {
        &self.entity
    }

    pub fn period_column(&self) -> &str {
        &self.period_column
    }

    pub fn search_columns(&self) -> &[String] {
        &self.search
    }

    /// Registered filter annotation for a bare or qualified key.
    pub fn filter_annotation(&self, key: &str) -> Option<ValueType> {
        self.filter.get(&format_key(key, &self.entity)).copied()
    }

    pub fn is_sortable(&self, key: &str) -> bool {
        self.sort.contains(&format_key(key, &self.entity))
    }

    pub fn sortable_columns(&self) -> impl Iterator<Item = &String> {
        self.sort.iter()
    }

    pub fn is_writable(&self, field: &str) -> bool {
        self.writable.contains(field)
    }

    pub fn mapping(&self) -> &HashMap<String, MappingOverride> {
        &self.mapping
    }

    pub fn read(&self) -> &[FieldAnnotation] {
        &self.read
    }

    pub fn registry<'a>(&'a self, catalog: &'a Catalog) -> ColumnRegistry<'a> {
        ColumnRegistry::new(catalog, &self.entity, &self.mapping)
    }

    /// `{key_name: annotation}` served as `table_mapping` with `meta=true`.
    pub fn table_mapping(&self) -> Value {
        let mut read: Vec<&FieldAnnotation> = self.read.iter().collect();
        read.sort_by_key(|a| a.order);
        let map = read
            .into_iter()
            .map(|a| (a.key_name.clone(), serde_json::to_value(a).unwrap_or(Value::Null)))
            .collect::<serde_json::Map<_, _>>();
        Value::Object(map)
    }
}

pub struct QueryParameterSchemaBuilder {
    entity: String,
    period_column: Option<String>,
    search: Vec<String>,
    filter: Vec<(String, ValueType)>,
    sort: Vec<String>,
    writable: Vec<String>,
    mapping: HashMap<String, MappingOverride>,
    read: Vec<FieldAnnotation>,
}

impl QueryParameterSchemaBuilder {
    pub fn period(mut self, column: &str) -> Self {
        self.period_column = Some(column.to_string());
        self
    }

    pub fn search(mut self, keys: &[&str]) -> Self {
        self.search.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn filter(mut self, key: &str, value_type: ValueType) -> Self {
        self.filter.push((key.to_string(), value_type));
        self
    }

    pub fn sort(mut self, keys: &[&str]) -> Self {
        self.sort.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn writable(mut self, fields: &[&str]) -> Self {
        self.writable.extend(fields.iter().map(|k| k.to_string()));
        self
    }

    pub fn mapping(mut self, prefix: &str, mapping: MappingOverride) -> Self {
        self.mapping.insert(prefix.to_string(), mapping);
        self
    }

    pub fn read(mut self, annotation: FieldAnnotation) -> Self {
        self.read.push(annotation.fill_defaults());
        self
    }

    /// Validates every declared key against the catalog and freezes the schema.
    pub fn build(self, catalog: &Catalog) -> Result<QueryParameterSchema, FilterError> {
        let invalid = |key: &str, e: FilterError| {
            FilterError::InvalidSchema(format!("{}: {}: {}", self.entity, key, e))
        };
        let entity_def = catalog
            .entity(&self.entity)
            .map_err(|e| FilterError::InvalidSchema(e.to_string()))?;
        let registry = ColumnRegistry::new(catalog, &self.entity, &self.mapping);

        let period_column = self.period_column.clone().unwrap_or_else(|| "created_at".to_string());
        registry.resolve(&period_column).map_err(|e| invalid(&period_column, e))?;

        let mut search = Vec::with_capacity(self.search.len());
        for key in &self.search {
            registry.resolve(key).map_err(|e| invalid(key, e))?;
            search.push(format_key(key, &self.entity));
        }

        let mut filter = HashMap::with_capacity(self.filter.len());
        for (key, value_type) in &self.filter {
            let reference = registry.resolve(key).map_err(|e| invalid(key, e))?;
            let stored = catalog
                .entity(&reference.entity)
                .map_err(|e| invalid(key, e))?
                .column_def(&reference.column_name)
                .map(|c| c.value_type);
            if let Some(stored) = stored.filter(|stored| !stored.accepts(*value_type)) {
                return Err(FilterError::InvalidSchema(format!(
                    "{}: {}: filter declared as {:?} but the column holds {:?}",
                    self.entity, key, value_type, stored
                )));
            }
            filter.insert(format_key(key, &self.entity), *value_type);
        }

        let mut sort = BTreeSet::new();
        for key in &self.sort {
            registry.resolve(key).map_err(|e| invalid(key, e))?;
            sort.insert(format_key(key, &self.entity));
        }

        let mut writable = BTreeSet::new();
        for field in &self.writable {
            if !entity_def.has_column(field) {
                return Err(invalid(
                    field,
                    FilterError::UnknownColumn { entity: self.entity.clone(), column: field.clone() },
                ));
            }
            writable.insert(field.clone());
        }

        for annotation in &self.read {
            if annotation.is_filterable {
                if let Some(filter_by) = &annotation.filter_by {
                    registry.resolve(filter_by).map_err(|e| invalid(filter_by, e))?;
                }
            }
        }

        Ok(QueryParameterSchema {
            entity: self.entity.clone(),
            period_column,
            search,
            filter,
            sort,
            writable,
            mapping: self.mapping.clone(),
            read: self.read.clone(),
        })
    }
}

/// All endpoint schemas keyed by entity name; read-only after startup.
#[derive(Debug, Clone, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, QueryParameterSchema>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, schema: QueryParameterSchema) {
        self.schemas.insert(schema.entity.clone(), schema);
    }

    pub fn get(&self, entity: &str) -> Result<&QueryParameterSchema, FilterError> {
        self.schemas
            .get(entity)
            .ok_or_else(|| FilterError::UnknownEntity(entity.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::catalog::{DefaultJoin, EntityDef};

    fn catalog() -> Catalog {
        Catalog::new()
            .register(EntityDef::new("user", "user").base_fields().column("email", ValueType::Text))
            .register(
                EntityDef::new("cargo_insurance", "CargoInsurance")
                    .base_fields()
                    .column("cargo_type", ValueType::Text)
                    .column("rate", ValueType::Float)
                    .column("date", ValueType::Timestamp),
            )
            .alias(
                "changed_by",
                "user",
                DefaultJoin::OnBase { base_column: "updated_by".into(), target_column: "id".into() },
            )
    }

    const YAML: &str = r#"
entity: cargo_insurance
period: date
search: [cargo_type]
filter:
  rate: float
  cargo_type: text
  changed_by__email: text
sort: [rate, cargo_insurance__date]
writable: [rate, cargo_type, date]
read:
  - key_name: rate
    column_name: Rate
    column_type: integer
    is_filterable: true
    order: 2
  - key_name: cargo_type
    column_name: Cargo type
    order: 1
"#;

    #[test]
    fn loads_yaml_with_qualified_keys() {
        let schema = QueryParameterSchema::from_yaml(YAML, &catalog()).unwrap();
        assert_eq!(schema.entity(), "cargo_insurance");
        assert_eq!(schema.period_column(), "date");
        assert_eq!(schema.search_columns(), ["cargo_insurance__cargo_type".to_string()]);
        assert_eq!(schema.filter_annotation("rate"), Some(ValueType::Float));
        assert_eq!(schema.filter_annotation("changed_by__email"), Some(ValueType::Text));
        assert!(schema.is_sortable("date"));
        assert!(schema.is_sortable("cargo_insurance__rate"));
        assert!(!schema.is_sortable("created_at"));
    }

    #[test]
    fn annotations_default_filter_and_update_keys() {
        let schema = QueryParameterSchema::from_yaml(YAML, &catalog()).unwrap();
        let rate = &schema.read()[0];
        assert_eq!(rate.filter_by.as_deref(), Some("rate"));
        assert_eq!(rate.update_by.as_deref(), Some("rate"));
        assert_eq!(rate.column_type, ColumnType::Integer);
        assert!(rate.show_in_table);

        let mapping = schema.table_mapping();
        let keys: Vec<&String> = mapping.as_object().unwrap().keys().collect();
        assert!(keys.contains(&&"rate".to_string()));
        assert_eq!(mapping["rate"]["column_name"], "Rate");
    }

    #[test]
    fn unknown_annotation_keys_fail_fast() {
        let yaml = "entity: cargo_insurance\nread:\n  - key_name: rate\n    column_name: Rate\n    is_fancy: true\n";
        assert!(matches!(
            QueryParameterSchema::from_yaml(yaml, &catalog()),
            Err(FilterError::InvalidSchema(_))
        ));
    }

    #[test]
    fn unknown_columns_fail_fast() {
        let result = QueryParameterSchema::builder("cargo_insurance")
            .sort(&["volume"])
            .build(&catalog());
        assert!(matches!(result, Err(FilterError::InvalidSchema(msg)) if msg.contains("volume")));

        let result = QueryParameterSchema::builder("cargo_insurance")
            .filter("warehouse__name", ValueType::Text)
            .build(&catalog());
        assert!(matches!(result, Err(FilterError::InvalidSchema(_))));
    }

    #[test]
    fn filter_types_must_match_the_catalog() {
        let yaml = "entity: cargo_insurance\nfilter:\n  rate: text\n";
        let err = QueryParameterSchema::from_yaml(yaml, &catalog()).unwrap_err();
        assert!(matches!(err, FilterError::InvalidSchema(msg) if msg.contains("rate")));

        let result = QueryParameterSchema::builder("cargo_insurance")
            .filter("changed_by__email", ValueType::Uuid)
            .build(&catalog());
        assert!(matches!(result, Err(FilterError::InvalidSchema(_))));

        let schema = QueryParameterSchema::builder("cargo_insurance")
            .filter("rate", ValueType::Integer)
            .filter("date", ValueType::Date)
            .build(&catalog())
            .unwrap();
        assert_eq!(schema.filter_annotation("rate"), Some(ValueType::Integer));
    }

    #[test]
    fn period_defaults_to_created_at() {
        let schema = QueryParameterSchema::builder("user").build(&catalog()).unwrap();
        assert_eq!(schema.period_column(), "created_at");
        assert!(schema.search_columns().is_empty());
    }
}
