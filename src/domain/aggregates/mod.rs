//! Aggregates module
pub mod buyer_group;
pub mod group_buy;
pub mod order;
pub mod product;
pub mod stock;

pub use buyer_group::{BuyerGroupError, BuyerGroupSession, BuyerGroupStatus, GroupMember, JoinOutcome, MemberStatus};
pub use group_buy::{DiscountTier, GroupBuyError, GroupBuySession, GroupBuyStatus};
pub use order::{NewOrder, Order, OrderError, OrderStatus, Payment, PaymentStatus};
pub use product::ProductVariant;
pub use stock::{LedgerEntry, StockError, StockLevel};
