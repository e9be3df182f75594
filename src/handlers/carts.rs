use crate::{
    entities::{CartModel, CartStatus},
    errors::ServiceError,
    handlers::common::{created_response, success_response, validate_input},
    services::carts::CartWithItems,
    AppState,
};
use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{delete, get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Routes for the cart collaborator interface.
pub fn cart_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", post(get_or_create_cart))
        .route("/:session_id", get(get_cart))
        .route("/:session_id", delete(clear_cart))
        .route("/:session_id/items", put(upsert_item))
        .route("/:session_id/items/:variant_id", delete(remove_item))
}

#[derive(Debug, Deserialize, Validate)]
pub struct CreateCartRequest {
    #[validate(length(min = 1, max = 255))]
    pub session_id: String,
    pub customer_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Validate)]
pub struct UpsertItemRequest {
    pub variant_id: Uuid,
    pub quantity: i32,
}

#[derive(Debug, Serialize)]
pub struct CartResponse {
    pub session_id: String,
    pub status: CartStatus,
    pub updated_at: DateTime<Utc>,
    pub items: Vec<CartItemResponse>,
}

#[derive(Debug, Serialize)]
pub struct CartItemResponse {
    pub variant_id: Uuid,
    pub quantity: i32,
}

impl From<CartWithItems> for CartResponse {
    fn from(cart: CartWithItems) -> Self {
        Self {
            session_id: cart.cart.session_id,
            status: cart.cart.status,
            updated_at: cart.cart.updated_at,
            items: cart
                .items
                .into_iter()
                .map(|item| CartItemResponse {
                    variant_id: item.variant_id,
                    quantity: item.quantity,
                })
                .collect(),
        }
    }
}

async fn get_or_create_cart(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCartRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    validate_input(&payload)?;

    let cart: CartModel = state
        .services
        .carts
        .get_or_create(&payload.session_id, payload.customer_id)
        .await?;

    Ok(created_response(CartResponse {
        session_id: cart.session_id,
        status: cart.status,
        updated_at: cart.updated_at,
        items: vec![],
    }))
}

async fn get_cart(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state.services.carts.get_with_items(&session_id).await?;
    Ok(success_response(CartResponse::from(cart)))
}

async fn upsert_item(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
    Json(payload): Json<UpsertItemRequest>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .upsert_item(&session_id, payload.variant_id, payload.quantity)
        .await?;
    Ok(success_response(CartResponse::from(cart)))
}

async fn remove_item(
    State(state): State<Arc<AppState>>,
    Path((session_id, variant_id)): Path<(String, Uuid)>,
) -> Result<impl IntoResponse, ServiceError> {
    let cart = state
        .services
        .carts
        .remove_item(&session_id, variant_id)
        .await?;
    Ok(success_response(CartResponse::from(cart)))
}

async fn clear_cart(
    State(state): State<Arc<AppState>>,
    Path(session_id): Path<String>,
) -> Result<impl IntoResponse, ServiceError> {
    state.services.carts.clear(&session_id).await?;
    Ok(success_response(serde_json::json!({ "cleared": true })))
}
