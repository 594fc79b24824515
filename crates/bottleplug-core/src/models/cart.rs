use serde::{Deserialize, Serialize};

use super::{deserialize_amount, deserialize_id};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CartItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    #[serde(deserialize_with = "deserialize_id")]
    pub product: Option<String>,
    pub product_name: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub product_price: Option<f64>,
    pub quantity: u32,
    #[serde(deserialize_with = "deserialize_amount")]
    pub subtotal: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_price: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub unit_price: Option<f64>,
}

/// Zero counts as missing, as the storefront does
fn nonzero(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v != 0.0)
}

impl CartItem {
    /// Line total: subtotal, else total price, else unit price times quantity
    pub fn item_total(&self) -> f64 {
        nonzero(self.subtotal)
            .or_else(|| nonzero(self.total_price))
            .or_else(|| {
                self.unit_price
                    .or(self.product_price)
                    .map(|price| price * f64::from(self.quantity))
            })
            .unwrap_or(0.0)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Cart {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub items: Vec<CartItem>,
    pub total_items: Option<u32>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_amount: Option<f64>,
}

impl Cart {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn total_quantity(&self) -> u32 {
        self.items.iter().map(|item| item.quantity).sum()
    }

    /// Sum of line totals, independent of the server's `total_amount`
    pub fn computed_total(&self) -> f64 {
        self.items.iter().map(CartItem::item_total).sum()
    }

    pub fn find_product(&self, product_id: &str) -> Option<&CartItem> {
        self.items
            .iter()
            .find(|item| item.product.as_deref() == Some(product_id))
    }
}

/// Body of `POST /orders/cart/add_item/`
#[derive(Debug, Clone, Serialize)]
pub struct AddCartItem {
    pub product: String,
    pub quantity: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
}

impl AddCartItem {
    pub fn new(product: impl Into<String>, quantity: u32) -> Self {
        Self {
            product: product.into(),
            quantity: quantity.max(1),
            variant: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_total_precedence() {
        let item: CartItem = serde_json::from_str(
            r#"{"id": 1, "product": 9, "quantity": 2, "subtotal": "0.00", "total_price": "30000.00", "unit_price": 1}"#,
        )
        .unwrap();
        assert_eq!(item.item_total(), 30000.0);

        let item: CartItem =
            serde_json::from_str(r#"{"id": 2, "product": 9, "quantity": 3, "unit_price": "12500"}"#).unwrap();
        assert_eq!(item.item_total(), 37500.0);

        let item: CartItem = serde_json::from_str(r#"{"id": 3, "quantity": 3}"#).unwrap();
        assert_eq!(item.item_total(), 0.0);
    }

    #[test]
    fn test_cart_totals() {
        let cart: Cart = serde_json::from_str(
            r#"{"id": 5, "items": [
                {"id": 1, "product": 9, "quantity": 2, "total_price": "30000.00"},
                {"id": 2, "product": 11, "quantity": 1, "product_price": "8000.00"}
            ], "total_amount": "38000.00"}"#,
        )
        .unwrap();
        assert_eq!(cart.total_quantity(), 3);
        assert_eq!(cart.computed_total(), 38000.0);
        assert_eq!(cart.find_product("11").unwrap().id.as_deref(), Some("2"));
        assert!(cart.find_product("404").is_none());
    }
}
