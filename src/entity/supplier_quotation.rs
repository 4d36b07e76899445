//! Supplier quotation entity: one supplier's offer for a quotation item
//!
//! Table: supplier_quotations

use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "supplier_quotations")]
#[serde(rename_all = "camelCase")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub quotation_item_id: Option<i32>,
    pub supplier_id: Option<i32>,
    #[sea_orm(column_type = "Double")]
    pub unit_price: f64,
    #[sea_orm(column_type = "Double")]
    pub freight: f64,
    #[sea_orm(column_type = "Double")]
    pub taxes: f64,
    #[sea_orm(column_type = "Double")]
    pub total_price: f64,
    /// Days
    pub delivery_time: Option<i32>,
    #[sea_orm(column_type = "Text", nullable)]
    pub payment_terms: Option<String>,
    #[sea_orm(column_type = "Text", nullable)]
    pub notes: Option<String>,
    pub is_selected: bool,
    pub created_at: DateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::quotation_item::Entity",
        from = "Column::QuotationItemId",
        to = "super::quotation_item::Column::Id",
        on_delete = "Cascade"
    )]
    QuotationItem,
    #[sea_orm(
        belongs_to = "super::supplier::Entity",
        from = "Column::SupplierId",
        to = "super::supplier::Column::Id"
    )]
    Supplier,
}

impl ActiveModelBehavior for ActiveModel {}

/// unit price x quantity + freight + taxes
pub fn total_price(unit_price: f64, quantity: f64, freight: f64, taxes: f64) -> f64 {
    unit_price * quantity + freight + taxes
}

/// Lowest total price; ties go to the shorter delivery time, then the lower id
pub fn best_offer(offers: &[Model]) -> Option<&Model> {
    offers.iter().min_by(|a, b| {
        a.total_price
            .partial_cmp(&b.total_price)
            .unwrap_or(Ordering::Equal)
            .then_with(|| {
                a.delivery_time
                    .unwrap_or(i32::MAX)
                    .cmp(&b.delivery_time.unwrap_or(i32::MAX))
            })
            .then_with(|| a.id.cmp(&b.id))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offer(id: i32, total: f64, days: Option<i32>) -> Model {
        Model {
            id,
            quotation_item_id: Some(1),
            supplier_id: Some(id),
            unit_price: total,
            freight: 0.0,
            taxes: 0.0,
            total_price: total,
            delivery_time: days,
            payment_terms: None,
            notes: None,
            is_selected: false,
            created_at: crate::db::now(),
        }
    }

    #[test]
    fn test_total_price() {
        assert_eq!(total_price(12.5, 4.0, 10.0, 5.0), 65.0);
    }

    #[test]
    fn test_best_offer_tie_breaks() {
        let offers = vec![
            offer(3, 100.0, Some(10)),
            offer(1, 90.0, Some(20)),
            offer(2, 90.0, Some(5)),
            offer(4, 90.0, Some(5)),
        ];
        assert_eq!(best_offer(&offers).map(|o| o.id), Some(2));

        let offers = vec![offer(5, 50.0, None), offer(6, 50.0, Some(30))];
        assert_eq!(best_offer(&offers).map(|o| o.id), Some(6));
        assert!(best_offer(&[]).is_none());
    }
}
