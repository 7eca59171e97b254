use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tonic::metadata::MetadataMap;
use tonic::{Request, Response, Status};

use crate::domain::order::{
    ErrorCategory, Order, OrderCommandHandler, OrderError, OrderStatus, PlaceOrder,
    RequestedItem,
};

const GRPC_TIMEOUT_HEADER: &str = "grpc-timeout";

// ============================================================================
// gRPC Transport Adapter
// ============================================================================
//
// Wire messages for the order service and the mapping from ingestion errors
// to status codes. The messages are declared with the prost derive, in the
// same shape `prost-build` emits for `order.proto`.
//
// ============================================================================

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderItemRequest {
    #[prost(int64, tag = "1")]
    pub product_id: i64,
    #[prost(int32, tag = "2")]
    pub quantity: i32,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateOrderRequest {
    #[prost(int64, tag = "1")]
    pub user_id: i64,
    #[prost(int64, tag = "2")]
    pub restaurant_id: i64,
    #[prost(message, repeated, tag = "3")]
    pub items: ::prost::alloc::vec::Vec<OrderItemRequest>,
    #[prost(string, tag = "4")]
    pub delivery_address: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct CreateOrderResponse {
    #[prost(int64, tag = "1")]
    pub order_id: i64,
    #[prost(string, tag = "2")]
    pub status: ::prost::alloc::string::String,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetOrderRequest {
    #[prost(int64, tag = "1")]
    pub order_id: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct OrderItemResponse {
    #[prost(int64, tag = "1")]
    pub product_id: i64,
    #[prost(int32, tag = "2")]
    pub quantity: i32,
    #[prost(int64, tag = "3")]
    pub price: i64,
}

#[derive(Clone, PartialEq, ::prost::Message)]
pub struct GetOrderResponse {
    #[prost(int64, tag = "1")]
    pub order_id: i64,
    #[prost(int64, tag = "2")]
    pub user_id: i64,
    #[prost(int64, tag = "3")]
    pub restaurant_id: i64,
    #[prost(message, repeated, tag = "4")]
    pub items: ::prost::alloc::vec::Vec<OrderItemResponse>,
    #[prost(string, tag = "5")]
    pub status: ::prost::alloc::string::String,
    /// RFC 3339
    #[prost(string, tag = "6")]
    pub created_at: ::prost::alloc::string::String,
}

impl From<CreateOrderRequest> for PlaceOrder {
    fn from(request: CreateOrderRequest) -> Self {
        PlaceOrder {
            user_id: request.user_id,
            restaurant_id: request.restaurant_id,
            items: request
                .items
                .into_iter()
                .map(|item| RequestedItem {
                    product_id: item.product_id,
                    quantity: item.quantity,
                })
                .collect(),
            delivery_address: Some(request.delivery_address).filter(|a| !a.is_empty()),
        }
    }
}

impl From<Order> for GetOrderResponse {
    fn from(order: Order) -> Self {
        GetOrderResponse {
            order_id: order.id,
            user_id: order.user_id,
            restaurant_id: order.restaurant_id,
            items: order
                .items
                .into_iter()
                .map(|item| OrderItemResponse {
                    product_id: item.product_id,
                    quantity: item.quantity,
                    price: item.price,
                })
                .collect(),
            status: order.status.to_string(),
            created_at: order.created_at.to_rfc3339(),
        }
    }
}

impl From<OrderError> for Status {
    fn from(err: OrderError) -> Self {
        let message = err.to_string();
        match (&err, err.category()) {
            (OrderError::DeadlineExceeded(_), _) => Status::deadline_exceeded(message),
            (_, ErrorCategory::Validation) => Status::invalid_argument(message),
            (_, ErrorCategory::Conflict) => Status::not_found(message),
            (_, ErrorCategory::Transient) => Status::unavailable(message),
            (_, ErrorCategory::Internal) => Status::internal(message),
        }
    }
}

/// Parse a `grpc-timeout` value: at most 8 digits followed by a unit
/// (`H`, `M`, `S`, `m`, `u`, `n`).
fn parse_grpc_timeout(value: &str) -> Option<Duration> {
    if value.len() < 2 || value.len() > 9 || !value.is_ascii() {
        return None;
    }
    let (digits, unit) = value.split_at(value.len() - 1);
    let amount: u64 = digits.parse().ok()?;
    let timeout = match unit {
        "H" => Duration::from_secs(amount * 60 * 60),
        "M" => Duration::from_secs(amount * 60),
        "S" => Duration::from_secs(amount),
        "m" => Duration::from_millis(amount),
        "u" => Duration::from_micros(amount),
        "n" => Duration::from_nanos(amount),
        _ => return None,
    };
    Some(timeout)
}

fn client_timeout(metadata: &MetadataMap) -> Option<Duration> {
    let value = metadata.get(GRPC_TIMEOUT_HEADER)?.to_str().ok()?;
    let parsed = parse_grpc_timeout(value);
    if parsed.is_none() {
        tracing::debug!(value = value, "Ignoring malformed grpc-timeout");
    }
    parsed
}

/// Order service endpoints. Each call must finish within `request_timeout`
/// or the client's `grpc-timeout`, whichever is shorter.
pub struct OrderGrpcService {
    handler: Arc<OrderCommandHandler>,
    request_timeout: Duration,
}

impl OrderGrpcService {
    pub fn new(handler: Arc<OrderCommandHandler>, request_timeout: Duration) -> Self {
        Self {
            handler,
            request_timeout,
        }
    }

    fn deadline(&self, metadata: &MetadataMap) -> Instant {
        let timeout = client_timeout(metadata)
            .map_or(self.request_timeout, |client| client.min(self.request_timeout));
        Instant::now() + timeout
    }

    pub async fn create_order(
        &self,
        request: Request<CreateOrderRequest>,
    ) -> Result<Response<CreateOrderResponse>, Status> {
        let deadline = self.deadline(request.metadata());
        let order_id = self
            .handler
            .place_order(request.into_inner().into(), deadline)
            .await?;

        Ok(Response::new(CreateOrderResponse {
            order_id,
            status: OrderStatus::Created.to_string(),
        }))
    }

    pub async fn get_order(
        &self,
        request: Request<GetOrderRequest>,
    ) -> Result<Response<GetOrderResponse>, Status> {
        let deadline = self.deadline(request.metadata());
        let order = self
            .handler
            .get_order(request.into_inner().order_id, deadline)
            .await?;

        Ok(Response::new(order.into()))
    }
}
