use super::catalog::{Catalog, EntityDef};
use super::error::FilterError;
use super::types::{FilterDescriptor, FilterOp};

pub struct FilterOrder;

impl FilterOrder {
    /// Requested sort, else `created_at DESC` when the entity has one. Nulls always last.
    pub fn resolve(
        catalog: &Catalog,
        entity: &EntityDef,
        sort: Option<&FilterDescriptor>,
    ) -> Result<Vec<String>, FilterError> {
        match sort {
            Some(descriptor) => {
                let column = catalog.column_sql(&descriptor.column.entity, &descriptor.column.column_name)?;
                let direction = if descriptor.operator == FilterOp::SortDesc { "DESC" } else { "ASC" };
                Ok(vec![format!("{} {} NULLS LAST", column, direction)])
            }
            None if entity.has_column("created_at") => {
                Ok(vec![format!("{} DESC NULLS LAST", catalog.column_sql(&entity.name, "created_at")?)])
            }
            None => Ok(vec![]),
        }
    }

    pub fn generate(order: &[String]) -> String {
        if order.is_empty() {
            return String::new();
        }
        format!("ORDER BY {}", order.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::types::{ColumnReference, DescriptorValue, ValueType};

    fn catalog() -> Catalog {
        Catalog::new()
            .register(EntityDef::new("cargo_insurance", "CargoInsurance").base_fields().column("rate", ValueType::Float))
            .register(EntityDef::new("tag", "tag").column("id", ValueType::Uuid))
    }

    #[test]
    fn defaults_to_newest_first() {
        let catalog = catalog();
        let order = FilterOrder::resolve(&catalog, catalog.entity("cargo_insurance").unwrap(), None).unwrap();
        assert_eq!(FilterOrder::generate(&order), r#"ORDER BY "CargoInsurance"."created_at" DESC NULLS LAST"#);
    }

    #[test]
    fn explicit_sort_keeps_nulls_last() {
        let catalog = catalog();
        let sort = FilterDescriptor {
            column: ColumnReference { entity: "cargo_insurance".into(), column_name: "rate".into(), join_path: vec![] },
            operator: FilterOp::SortAsc,
            value: DescriptorValue::None,
            includes_null: false,
        };
        let order = FilterOrder::resolve(&catalog, catalog.entity("cargo_insurance").unwrap(), Some(&sort)).unwrap();
        assert_eq!(order, vec![r#""CargoInsurance"."rate" ASC NULLS LAST"#.to_string()]);
    }

    #[test]
    fn entities_without_created_at_are_unordered() {
        let catalog = catalog();
        let order = FilterOrder::resolve(&catalog, catalog.entity("tag").unwrap(), None).unwrap();
        assert_eq!(FilterOrder::generate(&order), "");
    }
}
