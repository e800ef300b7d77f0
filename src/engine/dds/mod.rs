// ==========================================
// 结算数据仓库 - 明细层 (dds) 构建
// ==========================================
// 顺序: 维度先于事实（外键拒绝孤儿行）
// ==========================================

pub mod dimensions;
pub mod facts;
pub mod orders;
pub mod versioned;

pub use dimensions::{CouriersBuilder, TimestampsBuilder, UsersBuilder};
pub use facts::{DeliveriesBuilder, ProductSalesBuilder};
pub use orders::OrdersBuilder;
pub use versioned::{ProductsBuilder, RestaurantsBuilder};
