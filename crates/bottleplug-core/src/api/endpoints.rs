//! Typed wrappers for the backend endpoints.
//!
//! Every method goes through `ApiClient::execute`, so all of them share the
//! token precedence and the refresh-once behavior.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::models::{
    AddCartItem, BackendUser, Cart, Category, DeliveryTracking, InitiatePayment, Listing,
    Notification, Order, OrderBalance, Page, PaymentTransaction, PaymentsByOrder, Product,
    ProfileUpdate,
};

use super::{ApiClient, ApiError, ApiRequest, FormPart};

/// Reject empty identifiers before they turn into a malformed path
fn require_id<'a>(value: &'a str, what: &str) -> Result<&'a str, ApiError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        Err(ApiError::validation(format!("{} is required", what)))
    } else {
        Ok(trimmed)
    }
}

/// Image attached to a category upload
#[derive(Debug, Clone)]
pub struct ImageUpload {
    pub file_name: String,
    pub mime: String,
    pub bytes: Vec<u8>,
}

impl ApiClient {
    async fn get_query<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, ApiError> {
        self.get_with_query(path, query).await
    }

    async fn post_empty(&self, path: &str) -> Result<Value, ApiError> {
        self.execute(&ApiRequest::post(path).json(json!({})))
            .await
            .map(|response| response.body)
    }

    // ===== User profile =====

    pub async fn fetch_profile(&self) -> Result<BackendUser, ApiError> {
        self.get("/auth/users/me/").await
    }

    pub async fn update_profile(&self, update: &ProfileUpdate) -> Result<BackendUser, ApiError> {
        self.patch("/auth/users/me/", update).await
    }

    // ===== Products =====

    pub async fn fetch_products(&self, query: &[(&str, &str)]) -> Result<Page<Product>, ApiError> {
        self.get_query("/products/products/", query).await
    }

    /// Follow a page's `next` link; `None` on the last page
    pub async fn fetch_next_page<T: DeserializeOwned>(
        &self,
        page: &Page<T>,
    ) -> Result<Option<Page<T>>, ApiError> {
        match page.next.as_deref().filter(|n| !n.is_empty()) {
            Some(next) => self.get_url(next).await.map(Some),
            None => Ok(None),
        }
    }

    pub async fn fetch_product(&self, product_id: &str) -> Result<Product, ApiError> {
        let id = require_id(product_id, "product_id")?;
        self.get(&format!("/products/products/{}/", id)).await
    }

    pub async fn fetch_categories(&self) -> Result<Vec<Category>, ApiError> {
        let listing: Listing<Category> = self.get("/products/categories/").await?;
        Ok(listing.into_items())
    }

    pub async fn search_products(&self, query: &str) -> Result<Vec<Product>, ApiError> {
        let listing: Listing<Product> = self
            .get_query("/products/products/search/", &[("query", query)])
            .await?;
        Ok(listing.into_items())
    }

    /// Create a category, optionally with an image, as a multipart form
    pub async fn create_category(
        &self,
        name: &str,
        description: Option<&str>,
        image: Option<ImageUpload>,
    ) -> Result<Category, ApiError> {
        let name = require_id(name, "category name")?;
        let mut parts = vec![FormPart::text("name", name)];
        if let Some(description) = description {
            parts.push(FormPart::text("description", description));
        }
        if let Some(image) = image {
            parts.push(FormPart::file("image", image.file_name, image.bytes).with_mime(image.mime));
        }
        self.upload("/products/categories/", parts).await
    }

    // ===== Cart =====

    pub async fn fetch_cart(&self) -> Result<Cart, ApiError> {
        self.get("/orders/cart/my_cart/").await
    }

    pub async fn add_to_cart(&self, item: &AddCartItem) -> Result<Value, ApiError> {
        require_id(&item.product, "product")?;
        self.post("/orders/cart/add_item/", item).await
    }

    pub async fn update_cart_item(&self, item_id: &str, quantity: u32) -> Result<Value, ApiError> {
        let id = require_id(item_id, "item_id")?;
        self.post(
            "/orders/cart/update_item/",
            &json!({ "item_id": id, "quantity": quantity }),
        )
        .await
    }

    pub async fn remove_cart_item(&self, item_id: &str) -> Result<Value, ApiError> {
        let id = require_id(item_id, "item_id")?;
        self.post("/orders/cart/remove_item/", &json!({ "item_id": id }))
            .await
    }

    pub async fn clear_cart(&self) -> Result<Value, ApiError> {
        self.post_empty("/orders/cart/clear/").await
    }

    pub async fn checkout(&self, payload: &Value) -> Result<Value, ApiError> {
        self.post("/orders/cart/checkout/", payload).await
    }

    // ===== Orders =====

    pub async fn fetch_orders(&self, query: &[(&str, &str)]) -> Result<Vec<Order>, ApiError> {
        let listing: Listing<Order> = self.get_query("/orders/orders/", query).await?;
        Ok(listing.into_items())
    }

    pub async fn fetch_my_orders(&self) -> Result<Vec<Order>, ApiError> {
        let listing: Listing<Order> = self.get("/orders/orders/my_orders/").await?;
        Ok(listing.into_items())
    }

    pub async fn fetch_order(&self, order_id: &str) -> Result<Order, ApiError> {
        let id = require_id(order_id, "order_id")?;
        self.get(&format!("/orders/orders/{}/", id)).await
    }

    pub async fn track_delivery(&self, order_number: &str) -> Result<DeliveryTracking, ApiError> {
        let number = require_id(order_number, "order_number")?;
        self.get_query(
            "/orders/delivery-tracking/track_by_order_number/",
            &[("order_number", number)],
        )
        .await
    }

    // ===== Payments =====

    pub async fn fetch_payments_by_order(
        &self,
        order_id: &str,
        status: &str,
    ) -> Result<PaymentsByOrder, ApiError> {
        let id = require_id(order_id, "order_id")?;
        self.get_query(
            "/payments/transactions/by_order/",
            &[("order_id", id), ("status", status)],
        )
        .await
    }

    pub async fn fetch_my_transactions(&self) -> Result<Vec<PaymentTransaction>, ApiError> {
        let listing: Listing<PaymentTransaction> =
            self.get("/payments/transactions/my_transactions/").await?;
        Ok(listing.into_items())
    }

    pub async fn initiate_payment(&self, payment: &InitiatePayment) -> Result<Value, ApiError> {
        self.post("/payments/transactions/initiate_payment/", payment)
            .await
    }

    pub async fn verify_payment(&self, transaction_id: &str) -> Result<Value, ApiError> {
        let id = require_id(transaction_id, "transaction_id")?;
        self.post_empty(&format!("/payments/transactions/{}/verify_payment/", id))
            .await
    }

    /// Outstanding balance of an order after its successful payments.
    ///
    /// Never fails: a failed payments lookup counts the whole total as owed.
    pub async fn order_balance(&self, order: &Order) -> OrderBalance {
        let total = order.total_amount.filter(|t| *t > 0.0);
        let (Some(_), Some(order_id)) = (total, order.id.as_deref()) else {
            return OrderBalance::compute(total, None);
        };

        let lookup = match self.fetch_payments_by_order(order_id, "successful").await {
            Ok(lookup) => {
                if !lookup.success {
                    warn!(order_id, error = ?lookup.error, "Payments lookup was unsuccessful");
                }
                Some(lookup)
            }
            Err(e) => {
                warn!(order_id, error = %e.technical_message(), "Failed to fetch payments for order");
                None
            }
        };

        let balance = OrderBalance::compute(total, lookup.as_ref());
        debug!(
            order_id,
            paid = balance.paid_amount,
            outstanding = balance.outstanding_balance,
            "Computed order balance"
        );
        balance
    }

    // ===== Notifications =====

    pub async fn fetch_notifications(&self) -> Result<Vec<Notification>, ApiError> {
        let listing: Listing<Notification> = self.get("/notifications/").await?;
        Ok(listing.into_items())
    }

    pub async fn mark_notification_read(&self, notification_id: &str) -> Result<Value, ApiError> {
        let id = require_id(notification_id, "notification_id")?;
        self.post_empty(&format!("/notifications/{}/mark_read/", id))
            .await
    }

    pub async fn mark_all_notifications_read(&self) -> Result<Value, ApiError> {
        self.post_empty("/notifications/mark_all_read/").await
    }

    pub async fn register_push_token(&self, token: &str, platform: &str) -> Result<Value, ApiError> {
        let token = require_id(token, "token")?;
        self.post(
            "/notifications/register/",
            &json!({ "token": token, "platform": platform }),
        )
        .await
    }
}
