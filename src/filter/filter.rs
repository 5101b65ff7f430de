use std::collections::HashMap;

use super::catalog::{Catalog, EntityDef, Relationship};
use super::error::FilterError;
use super::filter_order::FilterOrder;
use super::filter_where::FilterWhere;
use super::types::{
    quote_identifier, EagerLoad, FilterDescriptor, FilterOp, IdSelector, JoinStep, SqlResult, SqlValue,
    VisibilityScope,
};

/// Composes one SELECT (plus its count) for a base entity.
pub struct QueryBuilder<'a> {
    catalog: &'a Catalog,
    entity: &'a EntityDef,
    ids: Option<IdSelector>,
    visibility: Option<VisibilityScope>,
    eager: EagerLoad,
    column: Option<String>,
    match_any: bool,
}

impl<'a> QueryBuilder<'a> {
    pub fn new(catalog: &'a Catalog, entity: &str) -> Result<Self, FilterError> {
        Ok(Self {
            catalog,
            entity: catalog.entity(entity)?,
            ids: None,
            visibility: None,
            eager: EagerLoad::default(),
            column: None,
            match_any: false,
        })
    }

    pub fn ids(mut self, ids: Option<IdSelector>) -> Self {
        self.ids = ids;
        self
    }

    pub fn visibility(mut self, scope: Option<VisibilityScope>) -> Self {
        self.visibility = scope;
        self
    }

    pub fn eager(mut self, eager: EagerLoad) -> Self {
        self.eager = eager;
        self
    }

    /// OR the filter conditions together instead of AND.
    pub fn match_any(mut self, match_any: bool) -> Self {
        self.match_any = match_any;
        self
    }

    /// Select a single column; rows come back flattened to bare values.
    pub fn select_column(mut self, column: &str) -> Result<Self, FilterError> {
        if !self.entity.has_column(column) {
            return Err(FilterError::UnknownColumn { entity: self.entity.name.clone(), column: column.to_string() });
        }
        self.column = Some(column.to_string());
        Ok(self)
    }

    pub fn build<'d, I>(self, descriptors: I) -> Result<SelectQuery, FilterError>
    where
        I: IntoIterator<Item = &'d FilterDescriptor>,
    {
        let catalog = self.catalog;
        let entity = self.entity;
        let mut filter_where = FilterWhere::new(catalog);

        if let Some(scope) = &self.visibility {
            filter_where.visibility(entity, scope)?;
        }

        let mut joins = Vec::new();
        let mut sort = None;
        if let Some(ids) = &self.ids {
            // Id lookups bypass filter, sort and search entirely.
            filter_where.ids(entity, ids)?;
        } else {
            let descriptors: Vec<&FilterDescriptor> = descriptors.into_iter().collect();
            let search: Vec<&FilterDescriptor> =
                descriptors.iter().copied().filter(|d| d.operator == FilterOp::FullText).collect();
            let start = filter_where.len();
            filter_where.search(&search)?;
            for descriptor in &descriptors {
                if descriptor.operator.is_sort() {
                    sort = Some(*descriptor);
                } else if descriptor.operator != FilterOp::FullText {
                    filter_where.descriptor(descriptor)?;
                }
            }
            if self.match_any {
                filter_where.any_of(start);
            }
            joins = self.joins(&descriptors)?;
        }

        let order = FilterOrder::resolve(catalog, entity, sort)?;
        let (conditions, params) = filter_where.finish();

        Ok(SelectQuery {
            entity: entity.name.clone(),
            from: quote_identifier(&entity.table),
            select: self.select_list()?,
            joins,
            conditions,
            order,
            params,
            single_column: self.column.is_some(),
        })
    }

    /// Outer joins for every hop referenced by a descriptor, at most one per entity.
    fn joins(&self, descriptors: &[&FilterDescriptor]) -> Result<Vec<String>, FilterError> {
        let mut joined: HashMap<&str, Option<&JoinStep>> = HashMap::new();
        joined.insert(self.entity.name.as_str(), None);

        let mut joins = Vec::new();
        for descriptor in descriptors {
            for step in &descriptor.column.join_path {
                match joined.get(step.target.as_str()) {
                    Some(Some(existing)) if *existing == step => continue,
                    Some(_) => return Err(FilterError::AmbiguousJoin(step.target.clone())),
                    None => {}
                }
                joins.push(format!(
                    "LEFT OUTER JOIN {} ON {} = {}",
                    quote_identifier(self.catalog.table(&step.target)?),
                    self.catalog.column_sql(&step.left.entity, &step.left.column)?,
                    self.catalog.column_sql(&step.right.entity, &step.right.column)?,
                ));
                joined.insert(step.target.as_str(), Some(step));
            }
        }
        Ok(joins)
    }

    fn select_list(&self) -> Result<String, FilterError> {
        if let Some(column) = &self.column {
            return Ok(format!(
                "json_build_object('{}', {})",
                column,
                self.catalog.column_sql(&self.entity.name, column)?
            ));
        }

        let table = quote_identifier(&self.entity.table);
        let mut pairs = object_pairs(self.entity, &table);
        for relationship in &self.entity.relationships {
            if self.eager.loads(&relationship.name) {
                pairs.push(format!("'{}', {}", relationship.name, self.eager_subquery(relationship, &table)?));
            }
        }
        Ok(format!("json_build_object({})", pairs.join(", ")))
    }

    /// Correlated subquery materializing one relationship as JSON.
    fn eager_subquery(&self, relationship: &Relationship, base: &str) -> Result<String, FilterError> {
        let target = self.catalog.entity(&relationship.target)?;
        let alias = format!("r_{}", relationship.name);
        let object = json_object(target, &alias);
        let condition = format!(
            "{}.{} = {}.{}",
            alias,
            quote_identifier(&relationship.remote_column),
            base,
            quote_identifier(&relationship.local_column)
        );
        let from = format!("{} {}", quote_identifier(&target.table), alias);

        Ok(if relationship.many {
            let order = if target.has_column("created_at") {
                format!(" ORDER BY {}.\"created_at\"", alias)
            } else {
                String::new()
            };
            format!(
                "COALESCE((SELECT json_agg({}{}) FROM {} WHERE {}), '[]'::json)",
                object, order, from, condition
            )
        } else {
            format!("(SELECT {} FROM {} WHERE {})", object, from, condition)
        })
    }
}

/// `json_build_object(...)` over the client-visible columns of an entity.
pub fn json_object(entity: &EntityDef, qualifier: &str) -> String {
    format!("json_build_object({})", object_pairs(entity, qualifier).join(", "))
}

fn object_pairs(entity: &EntityDef, qualifier: &str) -> Vec<String> {
    entity
        .visible_columns()
        .map(|c| format!("'{}', {}.{}", c.name, qualifier, quote_identifier(&c.name)))
        .collect()
}

/// A compiled, unexecuted query. Rows are selected as one JSON value named `data`.
#[derive(Debug, Clone)]
pub struct SelectQuery {
    pub entity: String,
    from: String,
    select: String,
    pub joins: Vec<String>,
    pub conditions: Vec<String>,
    pub order: Vec<String>,
    pub params: Vec<SqlValue>,
    pub single_column: bool,
}

impl SelectQuery {
    pub fn to_sql(&self, limit: Option<u64>, offset: Option<u64>) -> SqlResult {
        let mut parts = vec![format!("SELECT {} AS \"data\" FROM {}", self.select, self.from)];
        parts.extend(self.joins.iter().cloned());
        parts.push(self.where_clause());
        parts.push(FilterOrder::generate(&self.order));
        if let Some(limit) = limit {
            parts.push(format!("LIMIT {}", limit));
        }
        if let Some(offset) = offset {
            parts.push(format!("OFFSET {}", offset));
        }
        SqlResult { query: join_parts(parts), params: self.params.clone() }
    }

    /// Same joins and conditions, no ordering.
    pub fn to_count_sql(&self) -> SqlResult {
        let mut parts = vec![format!("SELECT COUNT(*) AS count FROM {}", self.from)];
        parts.extend(self.joins.iter().cloned());
        parts.push(self.where_clause());
        SqlResult { query: join_parts(parts), params: self.params.clone() }
    }

    pub fn join_count(&self) -> usize {
        self.joins.len()
    }

    fn where_clause(&self) -> String {
        if self.conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.conditions.join(" AND "))
        }
    }
}

fn join_parts(parts: Vec<String>) -> String {
    parts.into_iter().filter(|s| !s.is_empty()).collect::<Vec<_>>().join(" ")
}
