use super::catalog::{Catalog, EntityDef};
use super::error::FilterError;
use super::types::{DescriptorValue, FilterDescriptor, FilterOp, IdSelector, SqlValue, VisibilityScope};

/// Accumulates WHERE fragments and their positional parameters.
pub struct FilterWhere<'a> {
    catalog: &'a Catalog,
    param_values: Vec<SqlValue>,
    conditions: Vec<String>,
}

impl<'a> FilterWhere<'a> {
    pub fn new(catalog: &'a Catalog) -> Self {
        Self { catalog, param_values: vec![], conditions: vec![] }
    }

    /// Owner-column restriction; a no-op for entities without owner columns.
    pub fn visibility(&mut self, entity: &EntityDef, scope: &VisibilityScope) -> Result<(), FilterError> {
        let owner_columns: Vec<&String> =
            entity.owner_column.iter().chain(entity.owner_extra_column.iter()).collect();
        if owner_columns.is_empty() {
            tracing::debug!(entity = %entity.name, "Visibility scope ignored: entity has no owner column");
            return Ok(());
        }
        for column in owner_columns {
            let column = self.catalog.column_sql(&entity.name, column)?;
            let owners = self.param(SqlValue::UuidArray(scope.owners.clone()));
            self.conditions.push(if scope.allow_null_owner {
                format!("({} = ANY({}) OR {} IS NULL)", column, owners, column)
            } else {
                format!("{} = ANY({})", column, owners)
            });
        }
        Ok(())
    }

    pub fn ids(&mut self, entity: &EntityDef, selector: &IdSelector) -> Result<(), FilterError> {
        let column = self.catalog.column_sql(&entity.name, &entity.primary_key)?;
        let condition = match selector {
            IdSelector::One(id) => format!("{} = {}", column, self.param(SqlValue::Uuid(*id))),
            IdSelector::Many(ids) => format!("{} = ANY({})", column, self.param(SqlValue::UuidArray(ids.clone()))),
        };
        self.conditions.push(condition);
        Ok(())
    }

    /// One combined full-text match over every searchable column.
    pub fn search(&mut self, descriptors: &[&FilterDescriptor]) -> Result<(), FilterError> {
        let Some(first) = descriptors.first() else {
            return Ok(());
        };
        let DescriptorValue::Terms(terms) = &first.value else {
            return Err(FilterError::InvalidSearch("search descriptor carries no terms".to_string()));
        };
        let columns = descriptors
            .iter()
            .map(|d| self.catalog.column_sql(&d.column.entity, &d.column.column_name))
            .collect::<Result<Vec<_>, _>>()?;
        let query = self.param(SqlValue::Text(terms.join(" & ")));
        self.conditions.push(format!(
            "to_tsvector(concat_ws(' ', {})) @@ to_tsquery({})",
            columns.join(", "),
            query
        ));
        Ok(())
    }

    pub fn descriptor(&mut self, descriptor: &FilterDescriptor) -> Result<(), FilterError> {
        let reference = &descriptor.column;
        let column = self.catalog.column_sql(&reference.entity, &reference.column_name)?;

        match (&descriptor.operator, &descriptor.value) {
            (FilterOp::Gte | FilterOp::Lte | FilterOp::Eq, DescriptorValue::Scalar(value)) => {
                let param = self.param(value.clone());
                self.conditions
                    .push(format!("{} {} {}", column, descriptor.operator.comparison_sql(), param));
            }
            (FilterOp::Range, DescriptorValue::Range(start, end)) => {
                let start = self.param(start.clone());
                let end = self.param(end.clone());
                self.conditions.push(format!("{} >= {}", column, start));
                self.conditions.push(format!("{} < {}", column, end));
            }
            (FilterOp::In, DescriptorValue::List(values)) => {
                let is_array = self
                    .catalog
                    .entity(&reference.entity)?
                    .column_def(&reference.column_name)
                    .map(|c| c.value_type.is_array())
                    .unwrap_or(false);
                let condition = self.membership(&column, values, is_array);
                self.conditions.push(match (condition, descriptor.includes_null) {
                    (Some(condition), true) => format!("({} IS NULL OR {})", column, condition),
                    (Some(condition), false) => condition,
                    (None, true) => format!("{} IS NULL", column),
                    (None, false) => "1=0".to_string(),
                });
            }
            (FilterOp::FullText, _) => {
                return self.search(&[descriptor]);
            }
            (FilterOp::SortAsc | FilterOp::SortDesc, _) => {}
            (operator, value) => {
                return Err(FilterError::InvalidFilterValue {
                    column: reference.column_name.clone(),
                    reason: format!("{:?} cannot take {:?}", operator, value),
                });
            }
        }
        Ok(())
    }

    /// `col IN (...)`, or one `$n = ANY(col)` per value for array columns.
    fn membership(&mut self, column: &str, values: &[SqlValue], is_array: bool) -> Option<String> {
        if values.is_empty() {
            return None;
        }
        if is_array {
            let parts: Vec<String> = values
                .iter()
                .map(|v| format!("{} = ANY({})", self.param(v.clone()), column))
                .collect();
            Some(if parts.len() == 1 { parts.join("") } else { format!("({})", parts.join(" AND ")) })
        } else {
            let params: Vec<String> = values.iter().map(|v| self.param(v.clone())).collect();
            Some(format!("{} IN ({})", column, params.join(", ")))
        }
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.conditions.len()
    }

    /// Collapses every condition added since `start` into one OR group.
    pub fn any_of(&mut self, start: usize) {
        if self.conditions.len() <= start + 1 {
            return;
        }
        let group: Vec<String> = self.conditions.drain(start..).collect();
        self.conditions.push(format!("({})", group.join(" OR ")));
    }

    pub fn finish(self) -> (Vec<String>, Vec<SqlValue>) {
        (self.conditions, self.param_values)
    }

    fn param(&mut self, value: SqlValue) -> String {
        self.param_values.push(value);
        format!("${}", self.param_values.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::{ColumnReference, ValueType};
    use uuid::Uuid;

    fn catalog() -> Catalog {
        Catalog::new()
            .register(
                EntityDef::new("user", "user")
                    .base_fields()
                    .column("email", ValueType::Text)
                    .column("aliases", ValueType::TextArray),
            )
            .register(
                EntityDef::new("document", "document")
                    .base_fields()
                    .column("owner_id", ValueType::Uuid)
                    .owned_by("owner_id", None),
            )
    }

    fn reference(column: &str) -> ColumnReference {
        ColumnReference { entity: "user".into(), column_name: column.into(), join_path: vec![] }
    }

    fn membership(column: &str, values: Vec<SqlValue>, includes_null: bool) -> FilterDescriptor {
        FilterDescriptor {
            column: reference(column),
            operator: FilterOp::In,
            value: DescriptorValue::List(values),
            includes_null,
        }
    }

    #[test]
    fn membership_with_null_markers_adds_is_null_branch() {
        let catalog = catalog();
        let mut filter = FilterWhere::new(&catalog);
        filter
            .descriptor(&membership(
                "email",
                vec![SqlValue::Text("a@x".into()), SqlValue::Text("b@x".into())],
                true,
            ))
            .unwrap();
        let (conditions, params) = filter.finish();
        assert_eq!(
            conditions,
            vec![r#"("user"."email" IS NULL OR "user"."email" IN ($1, $2))"#.to_string()]
        );
        assert_eq!(params.len(), 2);
    }

    #[test]
    fn membership_of_only_nulls_is_an_is_null_test() {
        let catalog = catalog();
        let mut filter = FilterWhere::new(&catalog);
        filter.descriptor(&membership("email", vec![], true)).unwrap();
        assert_eq!(filter.finish().0, vec![r#""user"."email" IS NULL"#.to_string()]);
    }

    #[test]
    fn array_columns_use_any_per_value() {
        let catalog = catalog();
        let mut filter = FilterWhere::new(&catalog);
        filter
            .descriptor(&membership(
                "aliases",
                vec![SqlValue::Text("a".into()), SqlValue::Text("b".into())],
                false,
            ))
            .unwrap();
        assert_eq!(
            filter.finish().0,
            vec![r#"($1 = ANY("user"."aliases") AND $2 = ANY("user"."aliases"))"#.to_string()]
        );
    }

    #[test]
    fn ranges_are_half_open() {
        let catalog = catalog();
        let mut filter = FilterWhere::new(&catalog);
        filter
            .descriptor(&FilterDescriptor {
                column: reference("created_at"),
                operator: FilterOp::Range,
                value: DescriptorValue::Range(SqlValue::Integer(1), SqlValue::Integer(2)),
                includes_null: false,
            })
            .unwrap();
        assert_eq!(
            filter.finish().0,
            vec![r#""user"."created_at" >= $1"#.to_string(), r#""user"."created_at" < $2"#.to_string()]
        );
    }

    #[test]
    fn search_concatenates_columns_into_one_match() {
        let catalog = catalog();
        let terms = DescriptorValue::Terms(vec!["a\\&b".into(), "c".into()]);
        let first = FilterDescriptor {
            column: reference("email"),
            operator: FilterOp::FullText,
            value: terms.clone(),
            includes_null: false,
        };
        let second = FilterDescriptor { column: reference("description"), ..first.clone() };
        let mut filter = FilterWhere::new(&catalog);
        filter.search(&[&first, &second]).unwrap();
        let (conditions, params) = filter.finish();
        assert_eq!(
            conditions,
            vec![r#"to_tsvector(concat_ws(' ', "user"."email", "user"."description")) @@ to_tsquery($1)"#.to_string()]
        );
        assert_eq!(params, vec![SqlValue::Text("a\\&b & c".into())]);
    }

    #[test]
    fn visibility_only_applies_to_owned_entities() {
        let catalog = catalog();
        let scope = VisibilityScope { owners: vec![Uuid::nil()], allow_null_owner: true };

        let mut filter = FilterWhere::new(&catalog);
        filter.visibility(catalog.entity("user").unwrap(), &scope).unwrap();
        assert!(filter.is_empty());

        let mut filter = FilterWhere::new(&catalog);
        filter.visibility(catalog.entity("document").unwrap(), &scope).unwrap();
        assert_eq!(
            filter.finish().0,
            vec![r#"("document"."owner_id" = ANY($1) OR "document"."owner_id" IS NULL)"#.to_string()]
        );
    }
}
