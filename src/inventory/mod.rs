//! 库存层：物品模型、存储抽象与 SQLite 实现、库存概况

pub mod item;
pub mod sqlite;
pub mod status;
pub mod store;

pub use item::{
    Attributes, Freshness, Item, ItemFields, ItemId, ItemPatch, ObservedItem, Position,
};
pub use sqlite::SqliteInventoryStore;
pub use status::InventoryStatus;
pub use store::InventoryStore;
