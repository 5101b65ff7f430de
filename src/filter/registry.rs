use std::collections::HashMap;

use serde::Deserialize;

use super::catalog::Catalog;
use super::error::FilterError;
use super::types::{ColumnReference, JoinStep, ValueType};

/// Endpoint-specific replacement for a prefix's entity and join path.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MappingOverride {
    pub entity: String,
    #[serde(default)]
    pub path: Vec<JoinStep>,
}

/// Resolves `field` and `<entity>__<field>` keys for one query context.
pub struct ColumnRegistry<'a> {
    catalog: &'a Catalog,
    entity: &'a str,
    overrides: &'a HashMap<String, MappingOverride>,
}

impl<'a> ColumnRegistry<'a> {
    pub fn new(
        catalog: &'a Catalog,
        entity: &'a str,
        overrides: &'a HashMap<String, MappingOverride>,
    ) -> Self {
        Self { catalog, entity, overrides }
    }

    pub fn entity(&self) -> &str {
        self.entity
    }

    pub fn catalog(&self) -> &Catalog {
        self.catalog
    }

    /// Fully-qualified form of a key; bare keys get the query's entity prefix.
    pub fn qualify(&self, key: &str) -> String {
        format_key(key, self.entity)
    }

    pub fn resolve(&self, key: &str) -> Result<ColumnReference, FilterError> {
        let (entity, column_name, join_path) = match key.split_once("__") {
            Some((prefix, column)) => {
                let (entity, path) = match self.overrides.get(prefix) {
                    Some(mapping) if mapping.path.is_empty() => (
                        mapping.entity.clone(),
                        self.catalog.relationship_join(self.entity, &mapping.entity)?,
                    ),
                    Some(mapping) => (mapping.entity.clone(), mapping.path.clone()),
                    None => {
                        let entry = self
                            .catalog
                            .model_map(prefix)
                            .ok_or_else(|| FilterError::UnknownEntity(prefix.to_string()))?;
                        (entry.entity.clone(), self.catalog.default_join(self.entity, prefix)?)
                    }
                };
                (entity, column.to_string(), path)
            }
            None => (self.entity.to_string(), key.to_string(), vec![]),
        };

        let def = self.catalog.entity(&entity)?;
        if !def.has_column(&column_name) {
            return Err(FilterError::UnknownColumn { entity, column: column_name });
        }

        Ok(ColumnReference { entity, column_name, join_path })
    }

    pub fn value_type(&self, reference: &ColumnReference) -> Result<ValueType, FilterError> {
        self.catalog
            .entity(&reference.entity)?
            .column_def(&reference.column_name)
            .map(|c| c.value_type)
            .ok_or_else(|| FilterError::UnknownColumn {
                entity: reference.entity.clone(),
                column: reference.column_name.clone(),
            })
    }
}

pub fn format_key(key: &str, entity: &str) -> String {
    if key.contains("__") {
        key.to_string()
    } else {
        format!("{}__{}", entity, key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::catalog::{DefaultJoin, EntityDef};
    use crate::filter::types::ColumnRef;

    fn catalog() -> Catalog {
        Catalog::new()
            .register(
                EntityDef::new("user", "user")
                    .base_fields()
                    .column("email", ValueType::Text)
                    .has_many("sessions", "sessions", "user_id"),
            )
            .register(
                EntityDef::new("sessions", "sessions")
                    .column("id", ValueType::Uuid)
                    .column("user_id", ValueType::Uuid)
                    .belongs_to("user", "user", "user_id"),
            )
            .register(
                EntityDef::new("cargo_insurance", "CargoInsurance")
                    .base_fields()
                    .column("rate", ValueType::Float),
            )
            .alias(
                "changed_by",
                "user",
                DefaultJoin::OnBase { base_column: "updated_by".into(), target_column: "id".into() },
            )
    }

    #[test]
    fn bare_keys_resolve_against_the_query_entity() {
        let catalog = catalog();
        let overrides = HashMap::new();
        let registry = ColumnRegistry::new(&catalog, "cargo_insurance", &overrides);
        let reference = registry.resolve("rate").unwrap();
        assert_eq!(reference.entity, "cargo_insurance");
        assert_eq!(reference.column_name, "rate");
        assert!(reference.join_path.is_empty());
    }

    #[test]
    fn resolve_is_idempotent() {
        let catalog = catalog();
        let overrides = HashMap::new();
        let registry = ColumnRegistry::new(&catalog, "sessions", &overrides);
        for key in ["user_id", "user__email", "sessions__id"] {
            assert_eq!(registry.resolve(key).unwrap(), registry.resolve(key).unwrap());
        }
    }

    #[test]
    fn qualified_keys_follow_relationships() {
        let catalog = catalog();
        let overrides = HashMap::new();
        let registry = ColumnRegistry::new(&catalog, "sessions", &overrides);
        let reference = registry.resolve("user__email").unwrap();
        assert_eq!(reference.entity, "user");
        assert_eq!(
            reference.join_path,
            vec![JoinStep {
                target: "user".into(),
                left: ColumnRef::new("user", "id"),
                right: ColumnRef::new("sessions", "user_id"),
            }]
        );
    }

    #[test]
    fn aliases_use_their_default_join() {
        let catalog = catalog();
        let overrides = HashMap::new();
        let registry = ColumnRegistry::new(&catalog, "cargo_insurance", &overrides);
        let reference = registry.resolve("changed_by__email").unwrap();
        assert_eq!(reference.entity, "user");
        assert_eq!(reference.join_path[0].right, ColumnRef::new("cargo_insurance", "updated_by"));
    }

    #[test]
    fn overrides_take_precedence_over_the_model_map() {
        let catalog = catalog();
        let mut overrides = HashMap::new();
        let path = vec![JoinStep {
            target: "user".into(),
            left: ColumnRef::new("user", "id"),
            right: ColumnRef::new("cargo_insurance", "created_by"),
        }];
        overrides.insert("changed_by".to_string(), MappingOverride { entity: "user".into(), path: path.clone() });
        let registry = ColumnRegistry::new(&catalog, "cargo_insurance", &overrides);
        assert_eq!(registry.resolve("changed_by__email").unwrap().join_path, path);
    }

    #[test]
    fn unknown_prefixes_and_columns_fail() {
        let catalog = catalog();
        let overrides = HashMap::new();
        let registry = ColumnRegistry::new(&catalog, "cargo_insurance", &overrides);
        assert!(matches!(registry.resolve("warehouse__name"), Err(FilterError::UnknownEntity(e)) if e == "warehouse"));
        assert!(matches!(
            registry.resolve("cargo_insurance__volume"),
            Err(FilterError::UnknownColumn { column, .. }) if column == "volume"
        ));
        assert!(matches!(registry.resolve("user__nickname"), Err(FilterError::UnknownColumn { .. }) | Err(FilterError::NoJoinPath { .. })));
    }

    #[test]
    fn format_key_qualifies_bare_names_only() {
        assert_eq!(format_key("rate", "cargo_insurance"), "cargo_insurance__rate");
        assert_eq!(format_key("user__email", "sessions"), "user__email");
    }
}
