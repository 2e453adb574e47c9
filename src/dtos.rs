use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{
    Address, AddressType, AuditLog, Order, OrderLineItem, OrderStatus, OrderStatusHistory, ProductService,
    Review, Role, User, Vendor,
};

pub trait Response {}

#[derive(Debug, Deserialize, Serialize)]
pub struct ApiError {
    pub error: String,
}
impl Response for ApiError {}

#[derive(Debug, Deserialize, Serialize)]
pub struct MessageResponse {
    pub message: String,
}
impl Response for MessageResponse {}

#[derive(Deserialize, Serialize)]
pub struct EmptyResponse {}
impl Response for EmptyResponse {}

// users
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UserResponse {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub display_name: String,
    pub phone_number: Option<String>,
    pub role: Role,
    pub is_staff: bool,
}
impl Response for UserResponse {}

impl From<&User> for UserResponse {
    fn from(user: &User) -> Self {
        UserResponse {
            id: user.id.clone(),
            username: user.username.clone(),
            email: user.email.clone(),
            first_name: user.first_name.clone(),
            last_name: user.last_name.clone(),
            display_name: user.display_name.clone(),
            phone_number: user.phone_number.clone(),
            role: user.role,
            is_staff: user.role == Role::Admin,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub access: String,
    pub refresh: String,
}
impl Response for AuthResponse {}

#[derive(Debug, Deserialize, Serialize)]
pub struct TokenRefreshResponse {
    pub access: String,
}
impl Response for TokenRefreshResponse {}

// vendors
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VendorResponse {
    pub id: String,
    pub user_id: String,
    pub name: String,
    pub category: String,
    pub profile_description: String,
    pub phone_number: String,
    pub email: String,
    pub address: String,
    pub is_verified: bool,
    pub average_rating: f64,
    pub review_count: u32,
    pub total_orders: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
impl Response for VendorResponse {}

impl From<&Vendor> for VendorResponse {
    fn from(vendor: &Vendor) -> Self {
        VendorResponse {
            id: vendor.id.clone(),
            user_id: vendor.user_id.clone(),
            name: vendor.name.clone(),
            category: vendor.category.clone(),
            profile_description: vendor.profile_description.clone(),
            phone_number: vendor.phone_number.clone(),
            email: vendor.email.clone(),
            address: vendor.address.clone(),
            is_verified: vendor.is_verified,
            average_rating: vendor.average_rating,
            review_count: vendor.review_count,
            total_orders: vendor.total_orders,
            created_at: vendor.created_at,
            updated_at: vendor.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetVendorsResponse {
    pub vendors: Vec<VendorResponse>,
}
impl Response for GetVendorsResponse {}

#[derive(Debug, Deserialize, Serialize)]
pub struct VendorStatsResponse {
    pub total_products: usize,
    pub total_reviews: u32,
    pub average_rating: f64,
    pub total_orders: u32,
    pub can_accept_orders: bool,
}
impl Response for VendorStatsResponse {}

// products/services
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ProductServiceResponse {
    pub id: String,
    pub vendor_id: String,
    pub name: String,
    pub description: String,
    pub current_price_cents: i64,
    pub is_service: bool,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
impl Response for ProductServiceResponse {}

impl From<&ProductService> for ProductServiceResponse {
    fn from(product: &ProductService) -> Self {
        ProductServiceResponse {
            id: product.id.clone(),
            vendor_id: product.vendor_id.clone(),
            name: product.name.clone(),
            description: product.description.clone(),
            current_price_cents: product.current_price_cents,
            is_service: product.is_service,
            is_available: product.is_available,
            created_at: product.created_at,
            updated_at: product.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetProductsServicesResponse {
    pub products_services: Vec<ProductServiceResponse>,
}
impl Response for GetProductsServicesResponse {}

// orders
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderLineItemResponse {
    pub id: String,
    pub product_service_id: String,
    pub product_name: String,
    pub quantity: u32,
    pub unit_price_snapshot_cents: i64,
    pub discount_applied_cents: i64,
    pub line_total_cents: i64,
    pub quantity_fulfilled: u32,
    pub quantity_remaining: u32,
}

impl From<&OrderLineItem> for OrderLineItemResponse {
    fn from(line: &OrderLineItem) -> Self {
        OrderLineItemResponse {
            id: line.id.clone(),
            product_service_id: line.product_service_id.clone(),
            product_name: line.product_name.clone(),
            quantity: line.quantity,
            unit_price_snapshot_cents: line.unit_price_snapshot_cents,
            discount_applied_cents: line.discount_applied_cents,
            line_total_cents: line.line_total_cents,
            quantity_fulfilled: line.quantity_fulfilled,
            quantity_remaining: line.quantity_remaining(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrderResponse {
    pub id: String,
    pub order_uid: String,
    pub vendor_id: String,
    pub customer_id: String,
    pub total_amount_cents: i64,
    pub current_status: OrderStatus,
    pub is_completed: bool,
    pub line_items: Vec<OrderLineItemResponse>,
    pub status_history: Vec<OrderStatusHistory>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}
impl Response for OrderResponse {}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        OrderResponse {
            id: order.id.clone(),
            order_uid: order.order_uid.clone(),
            vendor_id: order.vendor_id.clone(),
            customer_id: order.customer_id.clone(),
            total_amount_cents: order.total_amount_cents,
            current_status: order.current_status,
            is_completed: order.is_completed,
            line_items: order.line_items.iter().map(OrderLineItemResponse::from).collect(),
            status_history: order.status_history.clone(),
            created_at: order.created_at,
            updated_at: order.updated_at,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetOrdersResponse {
    pub orders: Vec<OrderResponse>,
}
impl Response for GetOrdersResponse {}

#[derive(Debug, Deserialize, Serialize)]
pub struct OrderStatsResponse {
    pub total_orders: usize,
    pub pending_orders: usize,
    pub completed_orders: usize,
    pub total_revenue_cents: i64,
    pub completion_rate: f64,
}
impl Response for OrderStatsResponse {}

// reviews
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ReviewResponse {
    pub id: String,
    pub order_id: String,
    pub vendor_id: String,
    pub customer_id: String,
    pub customer_name: String,
    pub rating: u8,
    pub comment: Option<String>,
    pub created_at: DateTime<Utc>,
}
impl Response for ReviewResponse {}

impl From<&Review> for ReviewResponse {
    fn from(review: &Review) -> Self {
        ReviewResponse {
            id: review.id.clone(),
            order_id: review.order_id.clone(),
            vendor_id: review.vendor_id.clone(),
            customer_id: review.customer_id.clone(),
            customer_name: review.customer_name.clone(),
            rating: review.rating,
            comment: review.comment.clone(),
            created_at: review.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetReviewsResponse {
    pub reviews: Vec<ReviewResponse>,
}
impl Response for GetReviewsResponse {}

// addresses
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AddressResponse {
    pub id: String,
    pub address_type: AddressType,
    pub line1: String,
    pub line2: Option<String>,
    pub city: String,
    pub state_province: Option<String>,
    pub postal_code: String,
    pub country_code: Option<String>,
    pub is_default: bool,
    pub full_address: String,
    pub created_at: DateTime<Utc>,
}
impl Response for AddressResponse {}

impl From<&Address> for AddressResponse {
    fn from(address: &Address) -> Self {
        AddressResponse {
            id: address.id.clone(),
            address_type: address.address_type,
            line1: address.line1.clone(),
            line2: address.line2.clone(),
            city: address.city.clone(),
            state_province: address.state_province.clone(),
            postal_code: address.postal_code.clone(),
            country_code: address.country_code.clone(),
            is_default: address.is_default,
            full_address: address.full_address(),
            created_at: address.created_at,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetAddressesResponse {
    pub addresses: Vec<AddressResponse>,
}
impl Response for GetAddressesResponse {}

// audit
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AuditLogResponse {
    pub id: String,
    pub event_time: DateTime<Utc>,
    pub user_id: Option<String>,
    pub service_name: String,
    pub action_name: String,
    pub table_name: String,
    pub row_id: String,
    pub data_payload: serde_json::Value,
    pub success: bool,
}
impl Response for AuditLogResponse {}

impl From<&AuditLog> for AuditLogResponse {
    fn from(entry: &AuditLog) -> Self {
        AuditLogResponse {
            id: entry.id.clone(),
            event_time: entry.event_time,
            user_id: entry.user_id.clone(),
            service_name: entry.service_name.clone(),
            action_name: entry.action_name.clone(),
            table_name: entry.table_name.clone(),
            row_id: entry.row_id.clone(),
            data_payload: entry.data_payload.clone(),
            success: entry.success,
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct GetAuditLogsResponse {
    pub audit_logs: Vec<AuditLogResponse>,
}
impl Response for GetAuditLogsResponse {}
