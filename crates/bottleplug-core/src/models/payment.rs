use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{deserialize_amount, deserialize_id};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentTransaction {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub transaction_id: Option<String>,
    pub reference: Option<String>,
    pub transaction_type: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub created_at: Option<String>,
}

impl PaymentTransaction {
    pub fn is_successful(&self) -> bool {
        self.status.as_deref() == Some("successful")
    }
}

/// Response of `GET /payments/transactions/by_order/`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PaymentsByOrder {
    pub success: bool,
    #[serde(deserialize_with = "deserialize_id")]
    pub order_id: Option<String>,
    pub status: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_paid: Option<f64>,
    pub payment_count: u32,
    pub payments: Vec<PaymentTransaction>,
    pub error: Option<String>,
}

/// Body of `POST /payments/transactions/initiate_payment/`
#[derive(Debug, Clone, Serialize)]
pub struct InitiatePayment {
    pub transaction_type: String,
    pub amount: f64,
    pub currency: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_method_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_details: Option<Value>,
}

impl InitiatePayment {
    /// Payment for an order in Ugandan shillings
    pub fn for_order(order_id: impl Into<String>, amount: f64) -> Self {
        Self {
            transaction_type: "order".to_string(),
            amount,
            currency: "UGX".to_string(),
            description: None,
            order_id: Some(order_id.into()),
            payment_method_id: None,
            payment_details: None,
        }
    }
}
