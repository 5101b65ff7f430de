use axum::Router;

use super::entity::{EntityApi, Operation};
use crate::state::AppState;

/// `GET /list` and `DELETE /:id`; sessions are created only by logging in.
pub fn router() -> Router<AppState> {
    EntityApi::new("sessions")
        .exclude(&[Operation::Get, Operation::Create, Operation::Update])
        .router()
}
