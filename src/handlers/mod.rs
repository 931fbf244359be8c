pub mod menu;
pub mod mpesa;
pub mod orders;
pub mod receipts;
