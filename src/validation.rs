use serde::Deserialize;

use crate::models::Order;

// ============================================================================
// Order Validation
// ============================================================================
//
// Rules are parameterised by a `ValidationConfig` owned by the validator.
// There is no process-wide validation state.
//
// ============================================================================

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct ValidationConfig {
    pub max_items: usize,
    pub max_field_length: usize,
    pub require_items: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            max_items: 1000,
            max_field_length: 255,
            require_items: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ValidationError {
    #[error("field {0} must not be empty")]
    Empty(&'static str),

    #[error("field {field} is {len} characters long, limit is {max}")]
    TooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("order has no items")]
    NoItems,

    #[error("order has {count} items, limit is {max}")]
    TooManyItems { count: usize, max: usize },

    #[error("field {0} must not be negative")]
    Negative(&'static str),
}

#[derive(Debug, Clone, Default)]
pub struct OrderValidator {
    config: ValidationConfig,
}

impl OrderValidator {
    pub fn new(config: ValidationConfig) -> Self {
        Self { config }
    }

    pub fn validate(&self, order: &Order) -> Result<(), ValidationError> {
        self.required("order_uid", &order.order_uid)?;
        self.required("track_number", &order.track_number)?;

        for (field, value) in [
            ("entry", &order.entry),
            ("locale", &order.locale),
            ("internal_signature", &order.internal_signature),
            ("customer_id", &order.customer_id),
            ("delivery_service", &order.delivery_service),
            ("shardkey", &order.shard_key),
            ("oof_shard", &order.oof_shard),
            ("delivery.name", &order.delivery.name),
            ("delivery.phone", &order.delivery.phone),
            ("delivery.zip", &order.delivery.zip),
            ("delivery.city", &order.delivery.city),
            ("delivery.address", &order.delivery.address),
            ("delivery.region", &order.delivery.region),
            ("delivery.email", &order.delivery.email),
            ("payment.transaction", &order.payment.transaction),
            ("payment.currency", &order.payment.currency),
            ("payment.provider", &order.payment.provider),
            ("payment.bank", &order.payment.bank),
        ] {
            self.bounded(field, value)?;
        }

        let payment = &order.payment;
        for (field, value) in [
            ("payment.amount", payment.amount),
            ("payment.delivery_cost", payment.delivery_cost),
            ("payment.goods_total", payment.goods_total),
            ("payment.custom_fee", payment.custom_fee),
        ] {
            if value < 0 {
                return Err(ValidationError::Negative(field));
            }
        }

        if order.items.is_empty() && self.config.require_items {
            return Err(ValidationError::NoItems);
        }
        if order.items.len() > self.config.max_items {
            return Err(ValidationError::TooManyItems {
                count: order.items.len(),
                max: self.config.max_items,
            });
        }

        for item in &order.items {
            self.bounded("items.name", &item.name)?;
            self.bounded("items.brand", &item.brand)?;
            self.bounded("items.rid", &item.rid)?;
            if item.price < 0 {
                return Err(ValidationError::Negative("items.price"));
            }
            if item.total_price < 0 {
                return Err(ValidationError::Negative("items.total_price"));
            }
        }

        Ok(())
    }

    fn required(&self, field: &'static str, value: &str) -> Result<(), ValidationError> {
        if value.trim().is_empty() {
            return Err(ValidationError::Empty(field));
        }
        self.bounded(field, value)
    }

    fn bounded(&self, field: &'static str, value: &str) -> Result<(), ValidationError> {
        let len = value.chars().count();
        if len > self.config.max_field_length {
            return Err(ValidationError::TooLong {
                field,
                len,
                max: self.config.max_field_length,
            });
        }
        Ok(())
    }
}
