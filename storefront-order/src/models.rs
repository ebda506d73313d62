use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use storefront_core::supplier::{PlacementError, ShippingAddress};
use storefront_shared::Masked;
use uuid::Uuid;

/// Order status in the lifecycle
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Initialized,
    Paid,
    Processing,
    Ordered,
    PartiallyOrdered,
    Error,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Initialized => "initialized",
            OrderStatus::Paid => "paid",
            OrderStatus::Processing => "processing",
            OrderStatus::Ordered => "ordered",
            OrderStatus::PartiallyOrdered => "partially_ordered",
            OrderStatus::Error => "error",
            OrderStatus::Shipped => "shipped",
            OrderStatus::Delivered => "delivered",
            OrderStatus::Cancelled => "cancelled",
        }
    }

    /// Payment has been accepted for this order.
    pub fn is_paid_or_later(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::Processing
                | OrderStatus::Ordered
                | OrderStatus::PartiallyOrdered
                | OrderStatus::Error
                | OrderStatus::Shipped
                | OrderStatus::Delivered
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// The closed transition table. Everything not listed is illegal.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match (*self, next) {
            (Pending, Initialized) => true,
            (Initialized, Paid) => true,
            (Paid | PartiallyOrdered | Error, Processing) => true,
            (Processing, Ordered | PartiallyOrdered | Error) => true,
            (Ordered | PartiallyOrdered | Shipped, Shipped) => true,
            (Shipped, Delivered) => true,
            (Pending | Initialized | Paid | Processing | Ordered | PartiallyOrdered | Error, Cancelled) => true,
            _ => false,
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let status = match s {
            "pending" => OrderStatus::Pending,
            "initialized" => OrderStatus::Initialized,
            "paid" => OrderStatus::Paid,
            "processing" => OrderStatus::Processing,
            "ordered" => OrderStatus::Ordered,
            "partially_ordered" => OrderStatus::PartiallyOrdered,
            "error" => OrderStatus::Error,
            "shipped" => OrderStatus::Shipped,
            "delivered" => OrderStatus::Delivered,
            "cancelled" => OrderStatus::Cancelled,
            other => return Err(format!("unknown order status: {}", other)),
        };
        Ok(status)
    }
}

/// Payment progress, tracked independently of the order status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Initialized,
    Completed,
    Failed,
}

/// Customer contact and shipping fields as submitted at checkout.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustomerInfo {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: Option<String>,
}

/// Copy of the customer fields taken when the order was created.
///
/// Never a live reference: later edits to the customer record do not reach
/// orders that already exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomerSnapshot {
    pub first_name: String,
    pub last_name: String,
    pub email: Masked<String>,
    pub phone: Masked<String>,
    pub address: Masked<String>,
    pub city: String,
    pub state: String,
    pub zip: String,
    pub country: String,
}

impl CustomerSnapshot {
    pub fn capture(info: &CustomerInfo) -> Self {
        Self {
            first_name: info.first_name.trim().to_string(),
            last_name: info.last_name.trim().to_string(),
            email: Masked::new(info.email.trim().to_lowercase()),
            phone: Masked::new(info.phone.trim().to_string()),
            address: Masked::new(info.address.trim().to_string()),
            city: info.city.trim().to_string(),
            state: info.state.trim().to_string(),
            zip: info.zip.trim().to_string(),
            country: info.country.as_deref().unwrap_or_default().trim().to_string(),
        }
    }

    pub fn full_name(&self) -> String {
        format!("{} {}", self.first_name, self.last_name)
    }

    pub fn shipping_address(&self) -> ShippingAddress {
        ShippingAddress {
            name: self.full_name(),
            phone: self.phone.clone(),
            address: self.address.clone(),
            city: self.city.clone(),
            state: self.state.clone(),
            zip: self.zip.clone(),
            country: self.country.clone(),
        }
    }
}

/// A line item as requested by the client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewOrderItem {
    pub product_id: String,
    #[serde(default)]
    pub variant: Option<String>,
    pub name: String,
    /// Catalog price at checkout, minor units.
    pub unit_price: i64,
    pub quantity: i64,
    /// Partner's product id; defaults to our product id.
    #[serde(default)]
    pub partner_product_ref: Option<String>,
    #[serde(default)]
    pub partner_variant_ref: Option<String>,
}

/// An individual product within an order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: Uuid,
    pub product_id: String,
    pub variant: Option<String>,
    pub name: String,
    pub unit_price: i64,
    pub quantity: u32,
    pub partner_product_ref: String,
    pub partner_variant_ref: Option<String>,
}

impl OrderItem {
    /// Build from a request line that already passed validation.
    pub fn from_new(item: NewOrderItem) -> Self {
        let partner_product_ref = item
            .partner_product_ref
            .filter(|r| !r.trim().is_empty())
            .unwrap_or_else(|| item.product_id.clone());
        Self {
            id: Uuid::new_v4(),
            partner_product_ref,
            partner_variant_ref: item.partner_variant_ref.or_else(|| item.variant.clone()),
            product_id: item.product_id,
            variant: item.variant,
            name: item.name,
            unit_price: item.unit_price,
            quantity: u32::try_from(item.quantity).unwrap_or(0),
        }
    }

    pub fn line_total(&self) -> i64 {
        self.unit_price.saturating_mul(i64::from(self.quantity))
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Partner refused the item; needs human review.
    Rejected,
    /// Timeout or connection problem; eligible for retry.
    Transient,
}

/// Record of one placement call for one item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FulfillmentAttempt {
    pub id: Uuid,
    pub order_id: Uuid,
    pub item_id: Uuid,
    pub outcome: AttemptOutcome,
    pub partner_reference: Option<String>,
    pub error: Option<String>,
    pub failure_kind: Option<FailureKind>,
    pub attempted_at: DateTime<Utc>,
}

impl FulfillmentAttempt {
    pub fn from_result(order_id: Uuid, item_id: Uuid, result: Result<String, PlacementError>) -> Self {
        let (outcome, partner_reference, error, failure_kind) = match result {
            Ok(reference) => (AttemptOutcome::Succeeded, Some(reference), None, None),
            Err(e) => {
                let kind = if e.is_transient() {
                    FailureKind::Transient
                } else {
                    FailureKind::Rejected
                };
                (AttemptOutcome::Failed, None, Some(e.to_string()), Some(kind))
            }
        };
        Self {
            id: Uuid::new_v4(),
            order_id,
            item_id,
            outcome,
            partner_reference,
            error,
            failure_kind,
            attempted_at: Utc::now(),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.outcome == AttemptOutcome::Succeeded
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tracking {
    pub tracking_number: String,
    pub carrier: String,
    pub attached_at: DateTime<Utc>,
}

/// Monetary breakdown, minor units.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct Totals {
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total: i64,
}

impl Totals {
    pub fn compute(items: &[OrderItem], tax_rate: f64) -> Self {
        let subtotal = items.iter().map(OrderItem::line_total).fold(0i64, i64::saturating_add);
        let tax = (subtotal as f64 * tax_rate).round() as i64;
        let shipping = 0;
        Self {
            subtotal,
            tax,
            shipping,
            total: subtotal.saturating_add(tax).saturating_add(shipping),
        }
    }
}

/// The single source of truth for a customer's purchase
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub order_number: String,
    pub customer: CustomerSnapshot,
    pub items: Vec<OrderItem>,
    pub subtotal: i64,
    pub tax: i64,
    pub shipping: i64,
    pub total_amount: i64,
    pub currency: String,
    pub status: OrderStatus,
    pub payment_status: PaymentStatus,
    pub payment_reference: Option<String>,
    pub authorization_url: Option<String>,
    pub fulfillment_attempts: Vec<FulfillmentAttempt>,
    pub tracking: Option<Tracking>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub payment_verified_at: Option<DateTime<Utc>>,
    pub delivered_at: Option<DateTime<Utc>>,
}

impl Order {
    pub fn new(
        order_number: String,
        customer: CustomerSnapshot,
        items: Vec<OrderItem>,
        totals: Totals,
        currency: &str,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            order_number,
            customer,
            items,
            subtotal: totals.subtotal,
            tax: totals.tax,
            shipping: totals.shipping,
            total_amount: totals.total,
            currency: currency.to_string(),
            status: OrderStatus::Pending,
            payment_status: PaymentStatus::Pending,
            payment_reference: None,
            authorization_url: None,
            fulfillment_attempts: Vec::new(),
            tracking: None,
            created_at: now,
            updated_at: now,
            payment_verified_at: None,
            delivered_at: None,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    pub fn item_succeeded(&self, item_id: Uuid) -> bool {
        self.fulfillment_attempts
            .iter()
            .any(|a| a.item_id == item_id && a.succeeded())
    }

    /// Items with no succeeded attempt yet, in order.
    pub fn items_awaiting_fulfillment(&self) -> Vec<OrderItem> {
        self.items
            .iter()
            .filter(|item| !self.item_succeeded(item.id))
            .cloned()
            .collect()
    }

    pub fn attempts_for(&self, item_id: Uuid) -> impl Iterator<Item = &FulfillmentAttempt> {
        self.fulfillment_attempts.iter().filter(move |a| a.item_id == item_id)
    }

    /// Outcome of fulfillment over every item, independent of attempt order.
    pub fn fulfillment_status(&self) -> OrderStatus {
        let succeeded = self.items.iter().filter(|i| self.item_succeeded(i.id)).count();
        if succeeded == self.items.len() && succeeded > 0 {
            OrderStatus::Ordered
        } else if succeeded > 0 {
            OrderStatus::PartiallyOrdered
        } else {
            OrderStatus::Error
        }
    }
}
