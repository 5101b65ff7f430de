use axum::{
    extract::{Query, State},
    routing::{get, post},
    Extension, Json, Router,
};
use serde::Deserialize;
use serde_json::Value;

use super::entity::{EntityApi, Operation};
use crate::database::models::{expand_rates, with_cost, RatesByDate};
use crate::filter::RawQueryParams;
use crate::middleware::{ApiResponse, ApiResult, AuthContext};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    EntityApi::new("cargo_insurance")
        .exclude(&[Operation::Paginate])
        .router()
        .route("/list", get(list))
        .route("/create_all", post(create_all))
}

fn api() -> EntityApi {
    EntityApi::new("cargo_insurance")
}

/// Declared cargo value; when present every row gains `cost` and `full_cost`.
#[derive(Debug, Default, Deserialize)]
pub struct CostQuery {
    #[serde(default)]
    pub cost: Option<f64>,
}

/// Applies `with_cost` to a page (`{items, ...}`) or a bare list of rows.
pub fn price_rows(mut data: Value, cost: f64) -> Value {
    let rows = if data.is_array() { Some(&mut data) } else { data.get_mut("items") };
    if let Some(Value::Array(rows)) = rows {
        for row in rows.iter_mut() {
            *row = with_cost(row.take(), cost);
        }
    }
    data
}

/// GET /list - Tariff rows, optionally priced for a declared cost
async fn list(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Query(cost): Query<CostQuery>,
    Query(raw): Query<RawQueryParams>,
) -> ApiResult<Value> {
    let (data, meta) = api().list(&state, &auth, &raw).await?;
    let data = match cost.cost {
        Some(cost) => price_rows(data, cost),
        None => data,
    };
    Ok(ApiResponse::retrieved(data).with_meta(meta))
}

/// POST /create_all - Bulk insert `{date: [{cargo_type, rate}]}`
async fn create_all(
    State(state): State<AppState>,
    Extension(auth): Extension<AuthContext>,
    Json(rates): Json<RatesByDate>,
) -> ApiResult<Value> {
    let rows = api().insert(&state, &auth, expand_rates(rates)).await?;
    Ok(ApiResponse::added(Value::Array(rows)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn prices_every_row_of_a_page() {
        let page = json!({
            "items": [{"rate": 0.5}, {"rate": null}],
            "total": 2, "page": 1, "size": 50, "pages": 1,
        });
        let priced = price_rows(page, 200.0);
        assert_eq!(priced["items"][0]["cost"], 200.0);
        assert_eq!(priced["items"][0]["full_cost"], 100.0);
        assert_eq!(priced["items"][1]["full_cost"], Value::Null);
        assert_eq!(priced["total"], 2);
    }

    #[test]
    fn prices_a_bare_list() {
        let priced = price_rows(json!([{"rate": 2.0}]), 10.0);
        assert_eq!(priced[0]["full_cost"], 20.0);
    }
}
