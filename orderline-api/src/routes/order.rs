//! Order lookup endpoint.

use std::sync::Arc;

use axum::{
    extract::{Path, State},
    Json,
};
use orderline_core::Order;
use orderline_ingest::GetOrderById;

use crate::error::{ApiError, ApiResult};

/// GET /api/order/:id - Serve an order from the read cache.
///
/// Never touches the store, so reads stay fast while the database is slow or
/// down.
pub async fn get_order(
    State(orders): State<GetOrderById>,
    Path(order_uid): Path<String>,
) -> ApiResult<Json<Arc<Order>>> {
    match orders.execute(&order_uid) {
        Some(order) => Ok(Json(order)),
        None => {
            tracing::debug!(order_uid = %order_uid, "Order not in cache");
            Err(ApiError::order_not_found(order_uid))
        }
    }
}
