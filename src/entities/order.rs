use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Durable record of a checkout attempt.
///
/// Line items and `total_price` are a priced snapshot captured at creation and
/// never recomputed from live catalog data. Externally the order is addressed
/// by `reference` only; the internal id never leaves the system.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "orders")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    #[sea_orm(unique)]
    pub reference: String,
    #[sea_orm(nullable)]
    pub customer_id: Option<Uuid>,
    pub email: String,
    pub phone_number: String,
    pub country: String,
    pub address: String,
    pub city: String,
    pub postal_code: String,
    #[sea_orm(nullable)]
    pub delivery_address: Option<String>,
    #[sea_orm(nullable)]
    pub delivery_city: Option<String>,
    #[sea_orm(nullable)]
    pub delivery_postal_code: Option<String>,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub fulfillment_status: FulfillmentStatus,
    pub currency: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub shipping_cost: Decimal,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub total_price: Decimal,
    #[sea_orm(nullable)]
    pub gateway_transaction_id: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_client_secret: Option<String>,
    #[sea_orm(nullable)]
    pub gateway_approval_url: Option<String>,
    pub created_at: DateTime<Utc>,
    #[sea_orm(nullable)]
    pub updated_at: Option<DateTime<Utc>>,
    pub version: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::order_item::Entity")]
    OrderItems,
}

impl Related<super::order_item::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::OrderItems.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

/// Generates the externally-visible order reference. Globally unique,
/// human-shareable, carries no ordering information.
pub fn generate_reference() -> String {
    let hex = Uuid::new_v4().simple().to_string();
    format!("ORD-{}", hex[..10].to_uppercase())
}

/// How the customer chose to pay.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentMethod {
    #[sea_orm(string_value = "card")]
    Card,
    #[sea_orm(string_value = "paypal")]
    Paypal,
    #[sea_orm(string_value = "cash_on_delivery")]
    CashOnDelivery,
    #[sea_orm(string_value = "bank_transfer")]
    BankTransfer,
}

impl PaymentMethod {
    /// Offline methods take no gateway charge; the order starts `unpaid`
    /// instead of `pending` and is settled by the ops collaborator.
    pub fn is_offline(&self) -> bool {
        matches!(self, Self::CashOnDelivery | Self::BankTransfer)
    }
}

/// Payment axis of the order state machine.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum PaymentStatus {
    #[sea_orm(string_value = "unpaid")]
    Unpaid,
    #[sea_orm(string_value = "pending")]
    Pending,
    #[sea_orm(string_value = "paid")]
    Paid,
    #[sea_orm(string_value = "failed")]
    Failed,
    #[sea_orm(string_value = "refunded")]
    Refunded,
}

impl PaymentStatus {
    /// The allowed transitions: `unpaid|pending -> paid|failed`, `paid -> refunded`.
    /// Everything else is forbidden regardless of delivery order.
    pub fn can_transition_to(self, target: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Unpaid, Pending)
                | (Unpaid, Paid)
                | (Unpaid, Failed)
                | (Pending, Paid)
                | (Pending, Failed)
                | (Paid, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Failed | Self::Refunded)
    }
}

/// Fulfillment axis of the order state machine, independent of payment.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumIter, DeriveActiveEnum,
    strum::Display,
)]
#[sea_orm(rs_type = "String", db_type = "String(StringLen::N(20))")]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum FulfillmentStatus {
    #[sea_orm(string_value = "placed")]
    Placed,
    #[sea_orm(string_value = "processing")]
    Processing,
    #[sea_orm(string_value = "shipped")]
    Shipped,
    #[sea_orm(string_value = "delivered")]
    Delivered,
    #[sea_orm(string_value = "cancelled")]
    Cancelled,
}

impl FulfillmentStatus {
    /// Forward progression is strictly single-step; cancellation is only
    /// reachable before shipping (payment-side constraints are enforced by the
    /// order service, which also owns the cancellation window).
    pub fn can_transition_to(self, target: FulfillmentStatus) -> bool {
        use FulfillmentStatus::*;
        matches!(
            (self, target),
            (Placed, Processing)
                | (Processing, Shipped)
                | (Shipped, Delivered)
                | (Placed, Cancelled)
                | (Processing, Cancelled)
        )
    }
}
