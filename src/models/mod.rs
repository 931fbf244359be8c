pub mod order_status;

pub use order_status::{ItemSize, OrderStatus};
