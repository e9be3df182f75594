use crate::{
    entities::FulfillmentStatus,
    errors::ServiceError,
    handlers::common::success_response,
    services::orders::OrderResponse,
    AppState,
};
use axum::{
    extract::{Path, Query, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

/// Routes for order lookup and lifecycle operations. Orders are addressed by
/// reference only; internal ids never appear in the API.
pub fn order_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(list_orders))
        .route("/:reference", get(get_order))
        .route("/:reference/fulfillment", post(update_fulfillment))
        .route("/:reference/cancel", post(cancel_order))
}

#[derive(Debug, Deserialize)]
pub struct ListOrdersQuery {
    pub customer_id: Uuid,
    #[serde(default = "default_page")]
    pub page: u64,
    #[serde(default = "default_per_page")]
    pub per_page: u64,
}

fn default_page() -> u64 {
    1
}
fn default_per_page() -> u64 {
    20
}

#[derive(Debug, Serialize)]
pub struct OrderListResponse {
    pub orders: Vec<OrderResponse>,
    pub total: u64,
    pub page: u64,
    pub per_page: u64,
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let (order, items) = state.services.orders.get_with_items(&reference).await?;
    Ok(success_response(OrderResponse::from_model(order, items)))
}

/// Customer order history, newest first.
async fn list_orders(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<impl IntoResponse, ServiceError> {
    let (orders, total) = state
        .services
        .orders
        .list_for_customer(query.customer_id, query.page, query.per_page)
        .await?;

    let mut responses = Vec::with_capacity(orders.len());
    for order in orders {
        let (order, items) = state.services.orders.get_with_items(&order.reference).await?;
        responses.push(OrderResponse::from_model(order, items));
    }

    Ok(success_response(OrderListResponse {
        orders: responses,
        total,
        page: query.page,
        per_page: query.per_page,
    }))
}

#[derive(Debug, Deserialize)]
pub struct UpdateFulfillmentRequest {
    pub status: FulfillmentStatus,
}

/// Guarded fulfillment progression for the fulfillment collaborator.
async fn update_fulfillment(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
    Json(payload): Json<UpdateFulfillmentRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state
        .services
        .orders
        .update_fulfillment(&reference, payload.status)
        .await?;

    let (order, items) = state.services.orders.get_with_items(&order.reference).await?;
    Ok(success_response(OrderResponse::from_model(order, items)))
}

async fn cancel_order(
    State(state): State<Arc<AppState>>,
    Path(reference): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let order = state.services.orders.cancel(&reference).await?;

    let (order, items) = state.services.orders.get_with_items(&order.reference).await?;
    Ok(success_response(OrderResponse::from_model(order, items)))
}
