//! Order orchestration: submission, payment resolution, and the
//! operational status lifecycle.
//!
//! Submission persists the order as `PENDING_PAYMENT` and commits before the
//! STK push goes out, so the payment callback can always find the row. Two
//! racers then try to resolve the payment: the in-request poll loop and the
//! provider webhook. Both funnel into [`OrderService::finalize_payment`],
//! whose conditional update guarantees that stock decrement, receipt
//! generation and the status flip happen exactly once no matter who wins.

use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set, TransactionTrait,
};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};

use crate::entities::{menu_item, order, order_item};
use crate::errors::ServiceError;
use crate::events::{Event, EventSender};
use crate::models::OrderStatus;
use crate::services::mpesa::{StkGateway, StkQueryOutcome};
use crate::services::notifications::OrderNotifier;
use crate::services::pricing;
use crate::services::receipts::ReceiptService;

/// One requested order line as submitted by the client. Prices are looked
/// up server-side; the client only names the item, size and quantity.
#[derive(Debug, Clone, Deserialize)]
pub struct OrderItemRequest {
    pub menu_item_id: i32,
    pub size: String,
    pub quantity: i32,
}

/// Result of an order submission, after the poll loop has run its course.
#[derive(Debug)]
pub struct OrderSubmission {
    pub order: order::Model,
    pub status: OrderStatus,
    pub message: String,
}

/// An order together with its line items.
#[derive(Debug)]
pub struct OrderDetails {
    pub order: order::Model,
    pub items: Vec<order_item::Model>,
}

/// Poll cadence for the in-request payment status loop.
#[derive(Debug, Clone, Copy)]
pub struct PollSettings {
    pub interval: Duration,
    pub budget: Duration,
}

pub struct OrderService {
    db: Arc<DatabaseConnection>,
    gateway: Arc<dyn StkGateway>,
    receipts: Arc<ReceiptService>,
    notifier: Arc<dyn OrderNotifier>,
    events: EventSender,
    poll: PollSettings,
}

impl OrderService {
    pub fn new(
        db: Arc<DatabaseConnection>,
        gateway: Arc<dyn StkGateway>,
        receipts: Arc<ReceiptService>,
        notifier: Arc<dyn OrderNotifier>,
        events: EventSender,
        poll: PollSettings,
    ) -> Self {
        Self {
            db,
            gateway,
            receipts,
            notifier,
            events,
            poll,
        }
    }

    /// Submits an order: price, persist, push, then poll for the payment
    /// result until it resolves or the poll budget runs out.
    ///
    /// The request is held open for the duration of the poll loop; a budget
    /// exhaustion leaves the order `PENDING_PAYMENT` for the webhook to
    /// resolve later.
    #[instrument(skip(self, items), fields(item_count = items.len()))]
    pub async fn create_order(
        &self,
        user_id: &str,
        phone_number: &str,
        items: &[OrderItemRequest],
    ) -> Result<OrderSubmission, ServiceError> {
        let msisdn = crate::services::mpesa::normalize_phone_number(phone_number)?;
        let phone = msisdn.to_string();

        // Price and persist atomically, committing before the STK push so
        // the callback webhook can always match the order row.
        let txn = self.db.begin().await?;
        let priced = pricing::price_order(&txn, items).await?;

        let placed = order::ActiveModel {
            user_id: Set(user_id.to_string()),
            phone_number: Set(phone.clone()),
            total_amount: Set(priced.total_amount),
            status: Set(OrderStatus::PendingPayment.to_string()),
            checkout_request_id: Set(None),
            merchant_request_id: Set(None),
            mpesa_receipt_number: Set(None),
            created_at: Set(chrono::Utc::now()),
            ..Default::default()
        }
        .insert(&txn)
        .await?;

        let lines: Vec<order_item::ActiveModel> = priced
            .items
            .iter()
            .map(|item| order_item::ActiveModel {
                order_id: Set(placed.id),
                menu_item_id: Set(item.menu_item_id),
                size: Set(item.size.to_string()),
                quantity: Set(item.quantity),
                unit_price: Set(item.unit_price),
                line_total: Set(item.line_total),
                ..Default::default()
            })
            .collect();
        order_item::Entity::insert_many(lines).exec(&txn).await?;
        txn.commit().await?;

        info!(
            order_id = placed.id,
            user_id,
            total_amount = priced.total_amount,
            "order placed, initiating payment"
        );
        self.emit(Event::OrderCreated {
            order_id: placed.id,
            total_amount: priced.total_amount,
        })
        .await;

        let handle = match self
            .gateway
            .initiate_stk_push(
                &phone,
                priced.total_amount,
                &format!("ORDER-{}", placed.id),
                "Coffee order payment",
            )
            .await
        {
            Ok(handle) => handle,
            Err(e) => {
                warn!(order_id = placed.id, error = %e, "STK push initiation failed");
                let failed = self.fail_unpushed_order(placed.id).await?;
                return Ok(OrderSubmission {
                    order: failed,
                    status: OrderStatus::Failed,
                    message: "Payment could not be initiated. Please try again.".to_string(),
                });
            }
        };

        let mut pushed: order::ActiveModel = order::Entity::find_by_id(placed.id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", placed.id)))?
            .into();
        pushed.checkout_request_id = Set(Some(handle.checkout_request_id.clone()));
        pushed.merchant_request_id = Set(Some(handle.merchant_request_id.clone()));
        pushed.update(self.db.as_ref()).await?;

        self.poll_for_resolution(placed.id, &handle.checkout_request_id)
            .await;

        let resolved = order::Entity::find_by_id(placed.id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {} not found", placed.id)))?;
        let status = OrderStatus::parse(&resolved.status)?;
        let message = match status {
            OrderStatus::Paid => "Payment received. Your order is confirmed.".to_string(),
            OrderStatus::Failed => "Payment was not completed.".to_string(),
            _ => "Payment pending. You will be notified once it completes.".to_string(),
        };

        Ok(OrderSubmission {
            order: resolved,
            status,
            message,
        })
    }

    /// Polls the gateway until the payment resolves or the budget expires.
    /// Never returns an error: transport failures are retried on the next
    /// tick, and a timeout simply leaves the order pending.
    async fn poll_for_resolution(&self, order_id: i32, checkout_request_id: &str) {
        let outcome = tokio::time::timeout(self.poll.budget, async {
            loop {
                tokio::time::sleep(self.poll.interval).await;

                // The webhook may have resolved the payment between ticks.
                match self.current_status(order_id).await {
                    Ok(status) if status != OrderStatus::PendingPayment => return,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(order_id, error = %e, "status re-read failed during poll");
                        continue;
                    }
                }

                match self.gateway.query_stk_status(checkout_request_id).await {
                    Ok(StkQueryOutcome::Success) => {
                        if let Err(e) = self
                            .finalize_payment(checkout_request_id, true, None)
                            .await
                        {
                            warn!(order_id, error = %e, "finalize after poll success failed");
                        }
                        return;
                    }
                    Ok(StkQueryOutcome::Failed { code, desc }) => {
                        info!(order_id, %code, %desc, "payment failed per status query");
                        if let Err(e) = self
                            .finalize_payment(checkout_request_id, false, None)
                            .await
                        {
                            warn!(order_id, error = %e, "finalize after poll failure failed");
                        }
                        return;
                    }
                    Ok(StkQueryOutcome::Processing) => {}
                    Err(e) => {
                        // Transport trouble is not a payment outcome.
                        warn!(order_id, error = %e, "STK status query failed, will retry");
                    }
                }
            }
        })
        .await;

        if outcome.is_err() {
            info!(
                order_id,
                "poll budget exhausted, leaving payment resolution to the webhook"
            );
        }
    }

    /// Resolves a pending payment exactly once.
    ///
    /// The status flip is a conditional update guarded on `PENDING_PAYMENT`;
    /// whichever caller flips the row (poll loop or webhook) also decrements
    /// stock and generates the receipt in the same transaction. The loser
    /// sees zero affected rows and at most backfills the provider receipt
    /// number. Unknown checkout ids are ignored.
    #[instrument(skip(self))]
    pub async fn finalize_payment(
        &self,
        checkout_request_id: &str,
        success: bool,
        mpesa_receipt_number: Option<&str>,
    ) -> Result<(), ServiceError> {
        let Some(pending) = order::Entity::find()
            .filter(order::Column::CheckoutRequestId.eq(checkout_request_id))
            .one(self.db.as_ref())
            .await?
        else {
            info!(checkout_request_id, "payment result for unknown checkout id, ignoring");
            return Ok(());
        };

        let target = if success {
            OrderStatus::Paid
        } else {
            OrderStatus::Failed
        };

        let txn = self.db.begin().await?;

        let mut update = order::Entity::update_many()
            .col_expr(order::Column::Status, Expr::value(target.to_string()));
        if let Some(receipt_code) = mpesa_receipt_number {
            update = update.col_expr(
                order::Column::MpesaReceiptNumber,
                Expr::value(receipt_code.to_string()),
            );
        }
        let result = update
            .filter(order::Column::Id.eq(pending.id))
            .filter(order::Column::Status.eq(OrderStatus::PendingPayment.to_string()))
            .exec(&txn)
            .await?;

        if result.rows_affected == 0 {
            // Lost the race. A webhook that carries the provider receipt
            // number still backfills it if the poll-side winner had none.
            if success {
                if let Some(receipt_code) = mpesa_receipt_number {
                    order::Entity::update_many()
                        .col_expr(
                            order::Column::MpesaReceiptNumber,
                            Expr::value(receipt_code.to_string()),
                        )
                        .filter(order::Column::Id.eq(pending.id))
                        .filter(order::Column::MpesaReceiptNumber.is_null())
                        .exec(&txn)
                        .await?;
                }
            }
            txn.commit().await?;
            info!(
                order_id = pending.id,
                "payment already finalized, nothing to do"
            );
            return Ok(());
        }

        if success {
            self.consume_portions(&txn, pending.id).await?;

            let paid = order::Entity::find_by_id(pending.id)
                .one(&txn)
                .await?
                .ok_or_else(|| {
                    ServiceError::InternalError(format!("Order {} vanished mid-finalize", pending.id))
                })?;
            self.receipts
                .generate_for_order(&txn, &paid, mpesa_receipt_number)
                .await?;
        }

        txn.commit().await?;

        info!(order_id = pending.id, %target, "payment finalized");
        if success {
            self.emit(Event::OrderPaid {
                order_id: pending.id,
                mpesa_receipt_number: mpesa_receipt_number.map(str::to_string),
            })
            .await;
        } else {
            self.emit(Event::OrderPaymentFailed {
                order_id: pending.id,
            })
            .await;
        }

        Ok(())
    }

    /// Decrements `portion_available` for every line of a paid order,
    /// clamping at zero and flipping `available` off when stock runs out.
    ///
    /// The menu row is read under SELECT ... FOR UPDATE so two finalize
    /// transactions for different orders sharing an item cannot both
    /// compute the new count from the same pre-decrement snapshot.
    async fn consume_portions(
        &self,
        txn: &sea_orm::DatabaseTransaction,
        order_id: i32,
    ) -> Result<(), ServiceError> {
        let lines = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(txn)
            .await?;

        for line in lines {
            let Some(item) = menu_item::Entity::find_by_id(line.menu_item_id)
                .lock_exclusive()
                .one(txn)
                .await?
            else {
                continue;
            };

            let remaining = (item.portion_available - line.quantity).max(0);
            let mut active: menu_item::ActiveModel = item.into();
            active.portion_available = Set(remaining);
            if remaining == 0 {
                active.available = Set(false);
            }
            active.update(txn).await?;
        }

        Ok(())
    }

    /// Marks an order `FAILED` when the STK push never went out. Guarded the
    /// same way as finalize so it cannot clobber a concurrent resolution.
    async fn fail_unpushed_order(&self, order_id: i32) -> Result<order::Model, ServiceError> {
        order::Entity::update_many()
            .col_expr(
                order::Column::Status,
                Expr::value(OrderStatus::Failed.to_string()),
            )
            .filter(order::Column::Id.eq(order_id))
            .filter(order::Column::Status.eq(OrderStatus::PendingPayment.to_string()))
            .exec(self.db.as_ref())
            .await?;

        self.emit(Event::OrderPaymentFailed { order_id }).await;

        order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))
    }

    /// Moves an order through the operational lifecycle (`PREPARING`,
    /// `READY`, `COMPLETED`, `CANCELLED`). Payment states are not reachable
    /// from here; those only change through [`Self::finalize_payment`].
    ///
    /// Setting the current status again is an idempotent no-op, so a
    /// barista double-tap never re-sends the ready notification.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        order_id: i32,
        new_status: OrderStatus,
    ) -> Result<order::Model, ServiceError> {
        if matches!(
            new_status,
            OrderStatus::PendingPayment | OrderStatus::Paid | OrderStatus::Failed
        ) {
            return Err(ServiceError::InvalidStatus(format!(
                "{new_status} cannot be set directly"
            )));
        }

        let current = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        let current_status = OrderStatus::parse(&current.status)?;

        if current_status == new_status {
            return Ok(current);
        }

        if !current_status.can_transition_to(new_status) {
            return Err(ServiceError::InvalidStatus(format!(
                "Cannot move order {order_id} from {current_status} to {new_status}"
            )));
        }

        let mut active: order::ActiveModel = current.clone().into();
        active.status = Set(new_status.to_string());
        let updated = active.update(self.db.as_ref()).await?;

        info!(order_id, %current_status, %new_status, "order status updated");
        self.emit(Event::OrderStatusChanged {
            order_id,
            old_status: current_status.to_string(),
            new_status: new_status.to_string(),
        })
        .await;

        if new_status == OrderStatus::Ready {
            // Best-effort: a failed push never fails the status update.
            if let Err(e) = self
                .notifier
                .notify_order_ready(&updated.user_id, order_id)
                .await
            {
                warn!(order_id, error = %e, "ready notification not delivered");
            }
        }

        Ok(updated)
    }

    pub async fn get_order(&self, order_id: i32) -> Result<OrderDetails, ServiceError> {
        let found = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;

        let items = order_item::Entity::find()
            .filter(order_item::Column::OrderId.eq(order_id))
            .all(self.db.as_ref())
            .await?;

        Ok(OrderDetails { order: found, items })
    }

    /// A user's orders, newest first.
    pub async fn list_for_user(&self, user_id: &str) -> Result<Vec<order::Model>, ServiceError> {
        let orders = order::Entity::find()
            .filter(order::Column::UserId.eq(user_id))
            .order_by_desc(order::Column::CreatedAt)
            .all(self.db.as_ref())
            .await?;
        Ok(orders)
    }

    async fn current_status(&self, order_id: i32) -> Result<OrderStatus, ServiceError> {
        let found = order::Entity::find_by_id(order_id)
            .one(self.db.as_ref())
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Order {order_id} not found")))?;
        OrderStatus::parse(&found.status)
    }

    async fn emit(&self, event: Event) {
        if let Err(e) = self.events.send(event).await {
            warn!(error = %e, "event emission failed");
        }
    }
}
