use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

/// Catalog product read model. Pricing fields are owned by the catalog
/// collaborator; this core only reads them.
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "products")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    pub name: String,
    #[sea_orm(unique)]
    pub slug: String,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))")]
    pub price: Decimal,
    pub discount: bool,
    #[sea_orm(column_type = "Decimal(Some((19, 4)))", nullable)]
    pub discount_price: Option<Decimal>,
    pub available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::product_variant::Entity")]
    Variants,
}

impl Related<super::product_variant::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Variants.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// The unit price a shopper actually pays: the discount price when an
    /// active discount carries one, the list price otherwise.
    pub fn effective_price(&self) -> Decimal {
        if self.discount {
            if let Some(discounted) = self.discount_price {
                return discounted;
            }
        }
        self.price
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn product(price: Decimal, discount: bool, discount_price: Option<Decimal>) -> Model {
        Model {
            id: Uuid::new_v4(),
            name: "Tee".to_string(),
            slug: "tee".to_string(),
            price,
            discount,
            discount_price,
            available: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn effective_price_uses_discount_when_flagged() {
        let p = product(dec!(20.00), true, Some(dec!(15.00)));
        assert_eq!(p.effective_price(), dec!(15.00));
    }

    #[test]
    fn effective_price_falls_back_without_discount_price() {
        // Discount flag set but no discount price recorded: full price applies
        let p = product(dec!(20.00), true, None);
        assert_eq!(p.effective_price(), dec!(20.00));
    }

    #[test]
    fn effective_price_ignores_stale_discount_price() {
        let p = product(dec!(20.00), false, Some(dec!(15.00)));
        assert_eq!(p.effective_price(), dec!(20.00));
    }
}
