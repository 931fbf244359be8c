//! Server-side pricing of an order request against the current menu.
//!
//! Client-supplied prices are never trusted; every line is re-priced here
//! from the catalog inside the caller's transaction, so the validated
//! snapshot and the inserted rows see the same menu state.

use sea_orm::{ConnectionTrait, EntityTrait};
use tracing::debug;

use crate::entities::menu_item;
use crate::errors::ServiceError;
use crate::models::ItemSize;
use crate::services::orders::OrderItemRequest;

/// One validated, priced order line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedItem {
    pub menu_item_id: i32,
    pub title: String,
    pub size: ItemSize,
    pub quantity: i32,
    /// Catalog price for this item/size, minor units.
    pub unit_price: i64,
    /// `unit_price * quantity`, minor units.
    pub line_total: i64,
}

/// A fully validated and priced order, ready to persist.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PricedOrder {
    pub items: Vec<PricedItem>,
    pub total_amount: i64,
}

/// Validates and prices every requested line against the menu.
///
/// Fails atomically: the first invalid line aborts the whole order, so the
/// caller never persists a partially priced request. Runs on the caller's
/// connection so it participates in their transaction.
pub async fn price_order<C: ConnectionTrait>(
    conn: &C,
    items: &[OrderItemRequest],
) -> Result<PricedOrder, ServiceError> {
    if items.is_empty() {
        return Err(ServiceError::ValidationError(
            "Order must contain at least one item".to_string(),
        ));
    }

    let mut priced = Vec::with_capacity(items.len());
    let mut total_amount: i64 = 0;

    for item in items {
        if item.quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "Quantity must be positive for menu item {}",
                item.menu_item_id
            )));
        }

        let menu_item = menu_item::Entity::find_by_id(item.menu_item_id)
            .one(conn)
            .await?
            .ok_or_else(|| {
                ServiceError::NotFound(format!("Menu item {} not found", item.menu_item_id))
            })?;

        if !menu_item.available {
            return Err(ServiceError::ValidationError(format!(
                "{} is currently unavailable",
                menu_item.title
            )));
        }

        if menu_item.portion_available < item.quantity {
            return Err(ServiceError::InsufficientPortions(format!(
                "Only {} portions of {} left",
                menu_item.portion_available, menu_item.title
            )));
        }

        let size = ItemSize::parse(&item.size)?;
        let unit_price = match size {
            ItemSize::Single => menu_item.single_price,
            ItemSize::Double => menu_item.double_price,
        };
        let line_total = unit_price * i64::from(item.quantity);
        total_amount += line_total;

        debug!(
            menu_item_id = menu_item.id,
            %size,
            quantity = item.quantity,
            line_total,
            "priced order line"
        );

        priced.push(PricedItem {
            menu_item_id: menu_item.id,
            title: menu_item.title,
            size,
            quantity: item.quantity,
            unit_price,
            line_total,
        });
    }

    Ok(PricedOrder {
        items: priced,
        total_amount,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use sea_orm::{ActiveModelTrait, Set};

    async fn test_db() -> sea_orm::DatabaseConnection {
        let db = db::establish_connection_with_config(&db::DbConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 1,
            min_connections: 1,
            ..db::DbConfig::default()
        })
        .await
        .unwrap();
        db::run_migrations(&db).await.unwrap();
        db
    }

    async fn seed_item(
        db: &sea_orm::DatabaseConnection,
        title: &str,
        single: i64,
        double: i64,
        available: bool,
        portions: i32,
    ) -> menu_item::Model {
        menu_item::ActiveModel {
            title: Set(title.to_string()),
            single_price: Set(single),
            double_price: Set(double),
            available: Set(available),
            portion_available: Set(portions),
            category: Set("espresso".to_string()),
            image_path: Set(None),
            ..Default::default()
        }
        .insert(db)
        .await
        .unwrap()
    }

    fn line(menu_item_id: i32, size: &str, quantity: i32) -> OrderItemRequest {
        OrderItemRequest {
            menu_item_id,
            size: size.to_string(),
            quantity,
        }
    }

    #[tokio::test]
    async fn prices_mixed_sizes_and_sums_lines() {
        let db = test_db().await;
        let espresso = seed_item(&db, "Espresso", 200, 300, true, 10).await;
        let latte = seed_item(&db, "Latte", 250, 350, true, 10).await;

        let priced = price_order(
            &db,
            &[line(espresso.id, "single", 2), line(latte.id, "double", 1)],
        )
        .await
        .unwrap();

        // 2 x 200 + 1 x 350
        assert_eq!(priced.total_amount, 750);
        assert_eq!(priced.items[0].line_total, 400);
        assert_eq!(priced.items[1].unit_price, 350);
    }

    #[tokio::test]
    async fn empty_order_is_rejected() {
        let db = test_db().await;
        let err = price_order(&db, &[]).await.unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn unknown_item_is_rejected() {
        let db = test_db().await;
        let err = price_order(&db, &[line(999, "single", 1)]).await.unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }

    #[tokio::test]
    async fn unavailable_item_is_rejected() {
        let db = test_db().await;
        let item = seed_item(&db, "Mocha", 300, 400, false, 10).await;
        let err = price_order(&db, &[line(item.id, "single", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn insufficient_portions_is_rejected() {
        let db = test_db().await;
        let item = seed_item(&db, "Cappuccino", 300, 400, true, 2).await;
        let err = price_order(&db, &[line(item.id, "single", 3)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::InsufficientPortions(_)));
    }

    #[tokio::test]
    async fn bad_size_or_quantity_is_rejected() {
        let db = test_db().await;
        let item = seed_item(&db, "Americano", 220, 320, true, 10).await;

        let err = price_order(&db, &[line(item.id, "venti", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));

        let err = price_order(&db, &[line(item.id, "single", 0)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::ValidationError(_)));
    }

    #[tokio::test]
    async fn first_bad_line_fails_the_whole_order() {
        let db = test_db().await;
        let good = seed_item(&db, "Espresso", 200, 300, true, 10).await;

        let err = price_order(&db, &[line(good.id, "single", 1), line(999, "single", 1)])
            .await
            .unwrap_err();
        assert!(matches!(err, ServiceError::NotFound(_)));
    }
}
