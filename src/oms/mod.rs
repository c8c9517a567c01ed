//! Order management: execution simulation, order lifecycle, fill records

pub mod execution;
pub mod orderbook;
pub mod types;

pub use execution::{ExecutionModel, TpSlResolution};
pub use orderbook::{OrderBook, OrderRequest};
pub use types::{
    Fill, Order, OrderId, OrderStatus, OrderType, PortfolioSnapshot, Position, PositionSide,
};
