pub mod models;
pub mod repository;

pub use models::{OrderStatus, PendingOrder};
pub use repository::OrderRepository;
