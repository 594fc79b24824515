//! Data models for bottleplug backend entities.
//!
//! This module contains the request and response types used by the
//! typed endpoints:
//!
//! - `BackendUser`, `LoginResponse`: sign-in and profile data
//! - `Product`, `Category`, `Page`: catalog listings
//! - `Cart`, `CartItem`: the shopping cart and its totals
//! - `Order`, `OrderBalance`: orders and outstanding balance aggregation
//! - `PaymentTransaction`, `PaymentsByOrder`: payment history
//! - `Notification`: in-app notifications
//!
//! The backend serializes decimals as strings ("24990.00") and ids as
//! numbers, so amounts and ids are deserialized leniently.

pub mod cart;
pub mod notification;
pub mod order;
pub mod payment;
pub mod product;
pub mod user;

pub use cart::{AddCartItem, Cart, CartItem};
pub use notification::Notification;
pub use order::{DeliveryTracking, Order, OrderBalance, OrderItem, PaymentStatus};
pub use payment::{InitiatePayment, PaymentTransaction, PaymentsByOrder};
pub use product::{Category, Listing, Page, Product};
pub use user::{BackendUser, LoginResponse, ProfileUpdate};

use serde::de;

/// Deserialize a string or number as `Option<String>`; empty strings are `None`
pub(crate) fn deserialize_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct IdVisitor;

    impl<'de> de::Visitor<'de> for IdVisitor {
        type Value = Option<String>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a string or integer id")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            if v.is_empty() {
                Ok(None)
            } else {
                Ok(Some(v.to_string()))
            }
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v.to_string()))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(IdVisitor)
}

/// Deserialize a decimal sent as a number or a numeric string.
/// Null, empty and unparseable strings are `None`.
pub(crate) fn deserialize_amount<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    struct AmountVisitor;

    impl<'de> de::Visitor<'de> for AmountVisitor {
        type Value = Option<f64>;

        fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
            formatter.write_str("a number or numeric string")
        }

        fn visit_str<E>(self, v: &str) -> Result<Self::Value, E> {
            Ok(v.trim().parse::<f64>().ok().filter(|n| n.is_finite()))
        }

        fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E> {
            Ok(Some(v))
        }

        fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E> {
            Ok(Some(v as f64))
        }

        fn visit_none<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }

        fn visit_unit<E>(self) -> Result<Self::Value, E> {
            Ok(None)
        }
    }

    deserializer.deserialize_any(AmountVisitor)
}
