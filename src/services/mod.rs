pub mod mpesa;
pub mod notifications;
pub mod orders;
pub mod pricing;
pub mod receipts;
