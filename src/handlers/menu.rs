use axum::{extract::State, Json};
use sea_orm::{ColumnTrait, EntityTrait, QueryFilter, QueryOrder};

use crate::entities::menu_item;
use crate::errors::ServiceError;
use crate::AppState;

/// GET /api/v1/menu
///
/// Available menu items, grouped by category ordering. Unavailable and
/// sold-out items are filtered out server-side.
pub async fn list_menu(
    State(state): State<AppState>,
) -> Result<Json<Vec<menu_item::Model>>, ServiceError> {
    let items = menu_item::Entity::find()
        .filter(menu_item::Column::Available.eq(true))
        .order_by_asc(menu_item::Column::Category)
        .order_by_asc(menu_item::Column::Title)
        .all(state.db.as_ref())
        .await?;

    Ok(Json(items))
}
