use rand::Rng;
use regex::Regex;
use std::sync::OnceLock;
use storefront_core::ValidationError;

use crate::models::{CustomerInfo, NewOrderItem};

const NAME_MIN: usize = 2;
const NAME_MAX: usize = 50;
const ORDER_NUMBER_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(\.[A-Za-z0-9\-]+)*\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

fn phone_regex() -> &'static Regex {
    static PHONE: OnceLock<Regex> = OnceLock::new();
    PHONE.get_or_init(|| Regex::new(r"^\+?[0-9][0-9\s\-()]{6,19}$").expect("phone pattern is valid"))
}

pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email.trim())
}

/// Collect every customer-field violation into `errors`.
pub fn validate_customer(customer: &CustomerInfo, errors: &mut ValidationError) {
    for (field, value) in [("first_name", &customer.first_name), ("last_name", &customer.last_name)] {
        let len = value.trim().chars().count();
        if len < NAME_MIN || len > NAME_MAX {
            errors.push(field, format!("must be between {} and {} characters", NAME_MIN, NAME_MAX));
        }
    }

    if !is_valid_email(&customer.email) {
        errors.push("email", "must be a valid email address");
    }
    if !phone_regex().is_match(customer.phone.trim()) {
        errors.push("phone", "must be a valid phone number");
    }

    for (field, value) in [
        ("address", &customer.address),
        ("city", &customer.city),
        ("state", &customer.state),
        ("zip", &customer.zip),
    ] {
        if value.trim().is_empty() {
            errors.push(field, "is required");
        }
    }

    if customer.country.as_deref().map_or(true, |c| c.trim().is_empty()) {
        errors.push("country", "is required");
    }
}

/// Largest subtotal accepted, in minor units. Leaves headroom for tax.
pub const MAX_ORDER_AMOUNT: i64 = 1_000_000_000_000;

pub fn validate_items(items: &[NewOrderItem], errors: &mut ValidationError) {
    if items.is_empty() {
        errors.push("items", "must contain at least one item");
        return;
    }

    let mut subtotal: i64 = 0;
    for (i, item) in items.iter().enumerate() {
        if item.product_id.trim().is_empty() {
            errors.push(format!("items[{}].product_id", i), "is required");
        }
        if item.quantity <= 0 {
            errors.push(format!("items[{}].quantity", i), "must be greater than zero");
        } else if u32::try_from(item.quantity).is_err() {
            errors.push(format!("items[{}].quantity", i), "is too large");
        }
        if item.unit_price < 0 {
            errors.push(format!("items[{}].unit_price", i), "must not be negative");
        } else if item.quantity > 0 {
            match item.unit_price.checked_mul(item.quantity) {
                Some(line) if line <= MAX_ORDER_AMOUNT => {
                    subtotal = subtotal.saturating_add(line);
                }
                _ => errors.push(format!("items[{}].unit_price", i), "line total is too large"),
            }
        }
    }

    if subtotal > MAX_ORDER_AMOUNT {
        errors.push("items", "order total is too large");
    }
}

/// `ORD-YYYYMMDD-XXXXXX`; uniqueness is checked by the caller.
pub fn generate_order_number(now: chrono::DateTime<chrono::Utc>) -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..6)
        .map(|_| ORDER_NUMBER_ALPHABET[rng.gen_range(0..ORDER_NUMBER_ALPHABET.len())] as char)
        .collect();
    format!("ORD-{}-{}", now.format("%Y%m%d"), suffix)
}
