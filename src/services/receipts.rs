//! Receipt generation and lookup.
//!
//! A receipt is an immutable snapshot of a paid order, written exactly once
//! inside the same transaction that marks the order `PAID`. The line-item
//! breakdown is frozen as JSON so later menu edits never change what the
//! customer was charged for.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, RelationTrait, Set,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::info;

use crate::entities::{order, order_item, receipt};
use crate::errors::ServiceError;

/// Frozen line-item breakdown stored in `receipts.receipt_data`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptData {
    pub receipt_number: String,
    pub order_id: i32,
    pub phone_number: String,
    pub items: Vec<ReceiptLine>,
    pub subtotal: i64,
    pub tax: i64,
    pub total: i64,
    pub payment_date: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceiptLine {
    pub title: String,
    pub size: String,
    pub quantity: i32,
    pub unit_price: i64,
    pub line_total: i64,
}

/// Display number of the form `RCPT-000042`, derived from the order id so
/// it stays stable across concurrent generation attempts.
fn receipt_number_for(order_id: i32) -> String {
    format!("RCPT-{order_id:06}")
}

pub struct ReceiptService {
    db: Arc<DatabaseConnection>,
    /// Flat tax amount added on top of the order subtotal, minor units.
    tax_minor: i64,
}

impl ReceiptService {
    pub fn new(db: Arc<DatabaseConnection>, tax_minor: i64) -> Self {
        Self { db, tax_minor }
    }

    /// Generates the receipt for a freshly paid order, on the caller's
    /// connection so it joins the payment-finalization transaction.
    ///
    /// Idempotent: if a receipt already exists for the order it is returned
    /// unchanged, so a webhook/poll double-finalize can never produce two.
    pub async fn generate_for_order<C: ConnectionTrait>(
        &self,
        conn: &C,
        paid_order: &order::Model,
        mpesa_receipt_number: Option<&str>,
    ) -> Result<receipt::Model, ServiceError> {
        if let Some(existing) = receipt::Entity::find()
            .filter(receipt::Column::OrderId.eq(paid_order.id))
            .one(conn)
            .await?
        {
            info!(
                order_id = paid_order.id,
                receipt_number = %existing.receipt_number,
                "receipt already exists, skipping generation"
            );
            return Ok(existing);
        }

        let lines = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(paid_order.id))
            .join(
                sea_orm::JoinType::InnerJoin,
                order_item::Relation::MenuItem.def(),
            )
            .select_also(crate::entities::menu_item::Entity)
            .all(conn)
            .await?;

        let receipt_number = receipt_number_for(paid_order.id);
        let payment_date = Utc::now();

        let data = ReceiptData {
            receipt_number: receipt_number.clone(),
            order_id: paid_order.id,
            phone_number: paid_order.phone_number.clone(),
            items: lines
                .into_iter()
                .map(|(item, menu)| ReceiptLine {
                    title: menu.map(|m| m.title).unwrap_or_default(),
                    size: item.size,
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    line_total: item.line_total,
                })
                .collect(),
            subtotal: paid_order.total_amount,
            tax: self.tax_minor,
            total: paid_order.total_amount + self.tax_minor,
            payment_date: payment_date.to_rfc3339(),
        };

        let model = receipt::ActiveModel {
            order_id: Set(paid_order.id),
            receipt_number: Set(receipt_number.clone()),
            mpesa_receipt_number: Set(mpesa_receipt_number.map(str::to_string)),
            payment_date: Set(payment_date),
            receipt_data: Set(serde_json::to_string(&data)?),
            created_at: Set(payment_date),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        info!(
            order_id = paid_order.id,
            %receipt_number,
            "receipt generated"
        );
        Ok(model)
    }

    pub async fn get_by_order_id(&self, order_id: i32) -> Result<receipt::Model, ServiceError> {
        receipt::Entity::find()
            .filter(receipt::Column::OrderId.eq(order_id))
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("No receipt for order {order_id}")))
    }

    /// All receipts for a user's orders, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<receipt::Model>, ServiceError> {
        let receipts = receipt::Entity::find()
            .inner_join(order::Entity)
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(receipt::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(receipts)
    }
}
