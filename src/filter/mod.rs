pub mod catalog;
pub mod error;
pub mod filter;
pub mod filter_order;
pub mod filter_where;
pub mod params;
pub mod registry;
pub mod schema;
pub mod types;
pub mod validators;

pub use catalog::{Catalog, DefaultJoin, EntityDef};
pub use error::FilterError;
pub use filter::{QueryBuilder, SelectQuery};
pub use params::{QueryParameters, RawQueryParams};
pub use registry::{ColumnRegistry, MappingOverride};
pub use schema::{FieldAnnotation, QueryParameterSchema, SchemaRegistry};
pub use types::*;
