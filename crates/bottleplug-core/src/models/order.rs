use std::fmt;

use serde::{Deserialize, Serialize};

use super::payment::PaymentsByOrder;
use super::{deserialize_amount, deserialize_id};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrderItem {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub product_name: Option<String>,
    pub quantity: u32,
    #[serde(deserialize_with = "deserialize_amount")]
    pub unit_price: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_price: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Order {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub order_number: Option<String>,
    pub customer_name: Option<String>,
    pub customer_email: Option<String>,
    pub status: Option<String>,
    pub payment_status: Option<String>,
    pub payment_method: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub subtotal: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub delivery_fee: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub discount: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_amount: Option<f64>,
    pub is_pickup: bool,
    pub delivery_address: Option<String>,
    pub created_at: Option<String>,
    pub items: Vec<OrderItem>,
}

/// Delivery progress for one order, from the tracking endpoint
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryTracking {
    #[serde(deserialize_with = "deserialize_id")]
    pub id: Option<String>,
    pub order_number: Option<String>,
    pub status: Option<String>,
    pub delivery_address: Option<String>,
    pub delivery_instructions: Option<String>,
    pub estimated_delivery_time: Option<String>,
    pub actual_delivery_time: Option<String>,
    pub delivery_person_name: Option<String>,
    pub delivery_person_phone: Option<String>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub total_amount: Option<f64>,
    #[serde(deserialize_with = "deserialize_amount")]
    pub delivery_fee: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum PaymentStatus {
    FullyPaid,
    PartiallyPaid,
    Unpaid,
}

impl PaymentStatus {
    pub fn label(&self) -> &'static str {
        match self {
            PaymentStatus::FullyPaid => "Fully Paid",
            PaymentStatus::PartiallyPaid => "Partially Paid",
            PaymentStatus::Unpaid => "Unpaid",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Outstanding balance of an order after its successful payments.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct OrderBalance {
    pub outstanding_balance: f64,
    pub is_fully_paid: bool,
    pub paid_amount: f64,
}

impl OrderBalance {
    /// Balance for an order with nothing owed
    pub fn settled() -> Self {
        Self {
            outstanding_balance: 0.0,
            is_fully_paid: true,
            paid_amount: 0.0,
        }
    }

    /// Combine an order total with its payment lookup.
    ///
    /// `lookup` is `None` when the payments request failed; the whole
    /// total is then outstanding. A missing or non-positive total is settled.
    pub fn compute(total_amount: Option<f64>, lookup: Option<&PaymentsByOrder>) -> Self {
        let total = match total_amount {
            Some(total) if total > 0.0 => total,
            _ => return Self::settled(),
        };

        let unpaid = Self {
            outstanding_balance: total,
            is_fully_paid: false,
            paid_amount: 0.0,
        };
        let Some(lookup) = lookup.filter(|l| l.success) else {
            return unpaid;
        };

        let paid = lookup.total_paid.unwrap_or(0.0);
        let outstanding = (total - paid).max(0.0);
        Self {
            outstanding_balance: outstanding,
            is_fully_paid: outstanding <= 0.0,
            paid_amount: paid,
        }
    }

    pub fn status(&self) -> PaymentStatus {
        if self.is_fully_paid {
            PaymentStatus::FullyPaid
        } else if self.paid_amount > 0.0 {
            PaymentStatus::PartiallyPaid
        } else {
            PaymentStatus::Unpaid
        }
    }
}
