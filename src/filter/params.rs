use serde::Deserialize;

use super::catalog::Catalog;
use super::error::FilterError;
use super::schema::QueryParameterSchema;
use super::types::{FilterDescriptor, FilterOp};
use super::validators;
use crate::config::FilterConfig;

/// Query-string parameters exactly as received; everything stays a string
/// until validation so malformed values become 422s instead of extractor errors.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawQueryParams {
    pub page: Option<String>,
    pub size: Option<String>,
    pub meta: Option<String>,
    pub search: Option<String>,
    pub period: Option<String>,
    pub ascending: Option<String>,
    pub descending: Option<String>,
    pub gt: Option<String>,
    pub lt: Option<String>,
    pub eq: Option<String>,
    pub filters: Option<String>,
}

/// A fully validated parameter set, ready for the query builder.
#[derive(Debug, Clone, PartialEq)]
pub struct QueryParameters {
    pub search: Vec<FilterDescriptor>,
    pub period: Option<FilterDescriptor>,
    pub filters: Vec<FilterDescriptor>,
    pub comparisons: Vec<FilterDescriptor>,
    pub sort: Option<FilterDescriptor>,
    pub page: u32,
    pub size: u32,
    pub meta: bool,
}

impl Default for QueryParameters {
    fn default() -> Self {
        Self::with_size(FilterConfig::default().default_page_size)
    }
}

impl QueryParameters {
    pub fn with_size(size: u32) -> Self {
        Self {
            search: vec![],
            period: None,
            filters: vec![],
            comparisons: vec![],
            sort: None,
            page: 1,
            size,
            meta: false,
        }
    }

    pub fn parse(
        raw: &RawQueryParams,
        schema: &QueryParameterSchema,
        catalog: &Catalog,
        config: &FilterConfig,
    ) -> Result<Self, FilterError> {
        // Cross-field check runs before either sort value is looked at.
        if raw.ascending.is_some() && raw.descending.is_some() {
            return Err(FilterError::DoubleSort);
        }

        let registry = schema.registry(catalog);
        let mut params = Self::with_size(config.default_page_size);

        params.page = parse_positive("page", raw.page.as_deref(), 1)?;
        params.size = parse_positive("size", raw.size.as_deref(), config.default_page_size)?;
        if let Some(max) = config.max_page_size {
            if params.size > max {
                if config.debug_logging {
                    tracing::warn!("Page size {} exceeds max {}, capping to max", params.size, max);
                }
                params.size = max;
            }
        }
        params.meta = raw
            .meta
            .as_deref()
            .map(|m| matches!(m.trim().to_ascii_lowercase().as_str(), "true" | "1"))
            .unwrap_or(false);

        if let Some(search) = raw.search.as_deref() {
            params.search = validators::search(search, schema, &registry)?;
        }
        if let Some(period) = raw.period.as_deref() {
            params.period = Some(validators::period(period, schema, &registry)?);
        }
        if let Some(filters) = raw.filters.as_deref() {
            params.filters = validators::filters(filters, schema, &registry)?;
        }
        for (raw_value, operator) in [(&raw.gt, FilterOp::Gte), (&raw.lt, FilterOp::Lte), (&raw.eq, FilterOp::Eq)] {
            if let Some(value) = raw_value.as_deref() {
                params.comparisons.extend(validators::comparison(value, operator, schema, &registry)?);
            }
        }
        if let Some(column) = raw.ascending.as_deref() {
            params.sort = Some(validators::sort(column, FilterOp::SortAsc, schema, &registry)?);
        }
        if let Some(column) = raw.descending.as_deref() {
            params.sort = Some(validators::sort(column, FilterOp::SortDesc, schema, &registry)?);
        }

        if config.debug_logging {
            tracing::debug!(
                entity = schema.entity(),
                descriptors = params.descriptors().count(),
                "Parsed query parameters"
            );
        }
        Ok(params)
    }

    /// Every descriptor in application order: search, period, filters, comparisons, sort.
    pub fn descriptors(&self) -> impl Iterator<Item = &FilterDescriptor> {
        self.search
            .iter()
            .chain(self.period.iter())
            .chain(self.filters.iter())
            .chain(self.comparisons.iter())
            .chain(self.sort.iter())
    }

    pub fn offset(&self) -> u64 {
        u64::from(self.page.saturating_sub(1)) * u64::from(self.size)
    }
}

fn parse_positive(name: &'static str, raw: Option<&str>, default: u32) -> Result<u32, FilterError> {
    let Some(raw) = raw else {
        return Ok(default);
    };
    let value: i64 = raw
        .trim()
        .parse()
        .map_err(|_| FilterError::InvalidFormat { kind: name, reason: format!("{:?} is not an integer", raw) })?;
    if value < 1 {
        return Err(FilterError::InvalidPagination(name));
    }
    u32::try_from(value)
        .map_err(|_| FilterError::InvalidFormat { kind: name, reason: format!("{} is too large", value) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::catalog::EntityDef;
    use crate::filter::types::ValueType;

    fn catalog() -> Catalog {
        Catalog::new().register(
            EntityDef::new("cargo_insurance", "CargoInsurance")
                .base_fields()
                .column("cargo_type", ValueType::Text)
                .column("rate", ValueType::Float)
                .column("date", ValueType::Timestamp),
        )
    }

    fn schema(catalog: &Catalog) -> QueryParameterSchema {
        QueryParameterSchema::builder("cargo_insurance")
            .period("date")
            .filter("rate", ValueType::Float)
            .sort(&["rate"])
            .build(catalog)
            .unwrap()
    }

    #[test]
    fn double_sort_is_rejected_regardless_of_columns() {
        let catalog = catalog();
        let schema = schema(&catalog);
        let raw = RawQueryParams {
            ascending: Some("\"not_a_column\"".into()),
            descending: Some("\"rate\"".into()),
            ..Default::default()
        };
        let err = QueryParameters::parse(&raw, &schema, &catalog, &FilterConfig::default()).unwrap_err();
        assert_eq!(err.to_string(), "Can not apply two sorts");
    }

    #[test]
    fn defaults_to_first_page_of_fifty() {
        let catalog = catalog();
        let schema = schema(&catalog);
        let params =
            QueryParameters::parse(&RawQueryParams::default(), &schema, &catalog, &FilterConfig::default()).unwrap();
        assert_eq!((params.page, params.size, params.meta), (1, 50, false));
        assert_eq!(params.descriptors().count(), 0);
        assert_eq!(params.offset(), 0);
    }

    #[test]
    fn pagination_must_be_positive() {
        let catalog = catalog();
        let schema = schema(&catalog);
        for (page, size) in [("0", "10"), ("1", "0"), ("-3", "10")] {
            let raw = RawQueryParams { page: Some(page.into()), size: Some(size.into()), ..Default::default() };
            assert!(matches!(
                QueryParameters::parse(&raw, &schema, &catalog, &FilterConfig::default()),
                Err(FilterError::InvalidPagination(_))
            ));
        }
    }

    #[test]
    fn page_size_is_capped() {
        let catalog = catalog();
        let schema = schema(&catalog);
        let config = FilterConfig { default_page_size: 50, max_page_size: Some(100), debug_logging: false };
        let raw = RawQueryParams { page: Some("3".into()), size: Some("500".into()), ..Default::default() };
        let params = QueryParameters::parse(&raw, &schema, &catalog, &config).unwrap();
        assert_eq!(params.size, 100);
        assert_eq!(params.offset(), 200);
    }

    #[test]
    fn collects_descriptors_from_every_parameter() {
        let catalog = catalog();
        let schema = schema(&catalog);
        let raw = RawQueryParams {
            period: Some("2024-01-01:2024-01-31".into()),
            gt: Some(r#"{"rate": 1}"#.into()),
            lt: Some(r#"{"rate": 9}"#.into()),
            filters: Some(r#"{"rate": [2.5, null]}"#.into()),
            descending: Some("\"rate\"".into()),
            meta: Some("true".into()),
            ..Default::default()
        };
        let params = QueryParameters::parse(&raw, &schema, &catalog, &FilterConfig::default()).unwrap();
        assert!(params.meta);
        assert_eq!(params.comparisons.len(), 2);
        assert_eq!(params.comparisons[0].operator, FilterOp::Gte);
        assert_eq!(params.sort.as_ref().map(|s| s.operator), Some(FilterOp::SortDesc));
        assert_eq!(params.descriptors().count(), 5);
    }
}
