//! 库存存储抽象
//!
//! 对账只通过动作执行器间接使用存储；每个方法是一次独立的原子操作。

use async_trait::async_trait;

use crate::core::InventoryError;
use crate::inventory::{Item, ItemFields, ItemId, ItemPatch};

/// 物品的持久化存储：按 id 增删改查，可按设备过滤
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// 列出物品；device_id 为 None 时返回全部
    async fn list(&self, device_id: Option<&str>) -> Result<Vec<Item>, InventoryError>;

    async fn get(&self, id: ItemId) -> Result<Option<Item>, InventoryError>;

    /// 插入新物品并分配 id
    async fn insert(&self, fields: ItemFields) -> Result<Item, InventoryError>;

    /// 部分更新；id 不存在返回 Ok(None)
    async fn update(&self, id: ItemId, patch: ItemPatch) -> Result<Option<Item>, InventoryError>;

    /// 永久删除；返回是否确有删除
    async fn delete(&self, id: ItemId) -> Result<bool, InventoryError>;
}
