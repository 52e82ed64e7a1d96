//! 库存概况：按分类与新鲜度统计（只读投影，供 status 命令展示）

use std::collections::BTreeMap;

use serde::Serialize;

use crate::inventory::{Freshness, Item};

const UNCATEGORIZED: &str = "uncategorized";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InventoryStatus {
    pub total_items: usize,
    pub by_category: BTreeMap<String, usize>,
    pub by_freshness: BTreeMap<String, usize>,
    /// 新鲜度为 poor 的物品名，提示优先处理
    pub needs_attention: Vec<String>,
}

impl InventoryStatus {
    pub fn from_items(items: &[Item]) -> Self {
        let mut status = InventoryStatus {
            total_items: items.len(),
            ..Default::default()
        };
        for tier in Freshness::ALL {
            status.by_freshness.insert(tier.as_str().to_string(), 0);
        }
        for item in items {
            let category = item
                .fields
                .category
                .as_deref()
                .filter(|c| !c.trim().is_empty())
                .unwrap_or(UNCATEGORIZED);
            *status.by_category.entry(category.to_string()).or_default() += 1;
            *status
                .by_freshness
                .entry(item.fields.freshness.as_str().to_string())
                .or_default() += 1;
            if item.fields.freshness == Freshness::Poor {
                status.needs_attention.push(item.fields.name.clone());
            }
        }
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::ItemFields;

    #[test]
    fn test_status_counts() {
        let items = vec![
            Item {
                id: 1,
                fields: ItemFields::new("milk", "img://1")
                    .with_category("dairy")
                    .with_freshness(Freshness::Poor),
            },
            Item {
                id: 2,
                fields: ItemFields::new("yogurt", "img://2").with_category("dairy"),
            },
            Item {
                id: 3,
                fields: ItemFields::new("ginger", "img://3"),
            },
        ];
        let status = InventoryStatus::from_items(&items);
        assert_eq!(status.total_items, 3);
        assert_eq!(status.by_category["dairy"], 2);
        assert_eq!(status.by_category[UNCATEGORIZED], 1);
        assert_eq!(status.by_freshness["good"], 2);
        assert_eq!(status.by_freshness["fair"], 0);
        assert_eq!(status.needs_attention, vec!["milk".to_string()]);
    }
}
