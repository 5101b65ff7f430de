pub mod cargo_insurance;
pub mod sessions;
pub mod user;

use crate::filter::{Catalog, DefaultJoin, EntityDef, FilterError, QueryParameterSchema, SchemaRegistry, ValueType};

pub use cargo_insurance::{expand_rates, with_cost, RatesByDate};
pub use sessions::{sessions_to_replace, NewSession, Session};
pub use user::User;

const USER_SCHEMA: &str = include_str!("../../../schemas/user.yaml");
const SESSIONS_SCHEMA: &str = include_str!("../../../schemas/sessions.yaml");
const CARGO_INSURANCE_SCHEMA: &str = include_str!("../../../schemas/cargo_insurance.yaml");

/// Every persisted entity plus the `changed_by` prefix.
pub fn catalog() -> Catalog {
    Catalog::new()
        .register(
            EntityDef::new("user", "user")
                .base_fields()
                .column("first_name", ValueType::Text)
                .column("last_name", ValueType::Text)
                .column("full_name", ValueType::Text)
                .column("email", ValueType::Text)
                .hidden_column("hashed_password", ValueType::Text)
                .column("is_active", ValueType::Boolean)
                .column("is_staff", ValueType::Boolean)
                .column("is_superuser", ValueType::Boolean)
                .column("allow_basic_login", ValueType::Boolean)
                .column("aliases", ValueType::TextArray)
                .column("picture", ValueType::Text)
                .has_many("sessions", "sessions", "user_id")
                .log_fields(&[
                    "email",
                    "is_active",
                    "is_staff",
                    "is_superuser",
                    "allow_basic_login",
                    "first_name",
                    "last_name",
                ]),
        )
        .register(
            EntityDef::new("sessions", "sessions")
                .column("id", ValueType::Uuid)
                .column("cookie", ValueType::Text)
                .column("access_token", ValueType::Text)
                .column("refresh_token", ValueType::Text)
                .column("token_type", ValueType::Text)
                .column("expires_at", ValueType::Integer)
                .column("created_at", ValueType::Timestamp)
                .column("user_id", ValueType::Uuid)
                .belongs_to("user", "user", "user_id"),
        )
        .register(
            EntityDef::new("cargo_insurance", "CargoInsurance")
                .base_fields()
                .column("cargo_type", ValueType::Text)
                .column("rate", ValueType::Float)
                .column("date", ValueType::Timestamp)
                .log_fields(&["cargo_type", "rate", "date"]),
        )
        .alias(
            "changed_by",
            "user",
            DefaultJoin::OnBase { base_column: "updated_by".to_string(), target_column: "id".to_string() },
        )
}

/// Parses and validates the embedded endpoint schemas against `catalog`.
pub fn schemas(catalog: &Catalog) -> Result<SchemaRegistry, FilterError> {
    let mut registry = SchemaRegistry::new();
    for source in [USER_SCHEMA, SESSIONS_SCHEMA, CARGO_INSURANCE_SCHEMA] {
        registry.insert(QueryParameterSchema::from_yaml(source, catalog)?);
    }
    Ok(registry)
}
