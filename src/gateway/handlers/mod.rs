pub mod health;
pub mod history;
pub mod orders;
pub mod wallets;

pub use health::health_check;
pub use history::list_history;
