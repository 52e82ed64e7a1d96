//! 库存物品模型
//!
//! Item = 存储分配的 id + ItemFields；ObservedItem 与 ItemFields 同形（无 id），
//! 只作为对账输入或 add_item / update_item 的载荷存在，不直接持久化。

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, FixedOffset};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// 存储分配的物品 ID，生命周期内稳定，删除后不复用
pub type ItemId = i64;

/// 任意附加结构化属性（颜色、包装等）
pub type Attributes = Map<String, Value>;

/// 新鲜度等级
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum Freshness {
    #[default]
    Good,
    Fair,
    Poor,
}

impl Freshness {
    pub const ALL: [Freshness; 3] = [Freshness::Good, Freshness::Fair, Freshness::Poor];

    pub fn as_str(&self) -> &'static str {
        match self {
            Freshness::Good => "good",
            Freshness::Fair => "fair",
            Freshness::Poor => "poor",
        }
    }
}

impl fmt::Display for Freshness {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Freshness {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "good" => Ok(Freshness::Good),
            "fair" => Ok(Freshness::Fair),
            "poor" => Ok(Freshness::Poor),
            other => Err(format!("unknown freshness '{other}', expected good|fair|poor")),
        }
    }
}

/// 物品在照片中的位置（矩形）
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Position {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

/// 物品的全部可描述字段（不含 id）
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
pub struct ItemFields {
    /// 物品名称，非空
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    /// 识别置信度 0.0–1.0
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    /// 物品截图引用，非空
    pub image_url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    /// 数量与体积的综合描述，如「2 盒」
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_amount_desc: Option<String>,
    #[serde(default)]
    pub freshness: Freshness,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry_estimate: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<Attributes>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<FixedOffset>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub put_in_time: Option<DateTime<FixedOffset>>,
}

/// 一次识别产生的候选物品，与 ItemFields 同形
pub type ObservedItem = ItemFields;

/// 已持久化的物品
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct Item {
    pub id: ItemId,
    #[serde(flatten)]
    pub fields: ItemFields,
}

impl ItemFields {
    /// 仅含必填字段的构造，其余取默认
    pub fn new(name: impl Into<String>, image_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            image_url: image_url.into(),
            ..Default::default()
        }
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_freshness(mut self, freshness: Freshness) -> Self {
        self.freshness = freshness;
        self
    }

    pub fn with_device(mut self, device_id: impl Into<String>) -> Self {
        self.device_id = Some(device_id.into());
        self
    }

    /// 持久化前的字段不变量
    pub fn validate(&self) -> Result<(), String> {
        if self.name.trim().is_empty() {
            return Err("name must not be empty".to_string());
        }
        if self.image_url.trim().is_empty() {
            return Err("image_url must not be empty".to_string());
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(format!("confidence {c} out of range 0.0-1.0"));
            }
        }
        Ok(())
    }

    /// 按补丁原地更新；补丁中未给出的字段保持原值
    pub fn apply(&mut self, patch: ItemPatch) {
        let ItemPatch {
            name,
            category,
            subcategory,
            brand,
            confidence,
            image_url,
            position,
            item_amount_desc,
            freshness,
            expiry_estimate,
            additional_info,
            detected_at,
            device_id,
            put_in_time,
        } = patch;
        if let Some(v) = name {
            self.name = v;
        }
        if let Some(v) = image_url {
            self.image_url = v;
        }
        if let Some(v) = freshness {
            self.freshness = v;
        }
        replace_if_some(&mut self.category, category);
        replace_if_some(&mut self.subcategory, subcategory);
        replace_if_some(&mut self.brand, brand);
        replace_if_some(&mut self.confidence, confidence);
        replace_if_some(&mut self.position, position);
        replace_if_some(&mut self.item_amount_desc, item_amount_desc);
        replace_if_some(&mut self.expiry_estimate, expiry_estimate);
        replace_if_some(&mut self.additional_info, additional_info);
        replace_if_some(&mut self.detected_at, detected_at);
        replace_if_some(&mut self.device_id, device_id);
        replace_if_some(&mut self.put_in_time, put_in_time);
    }

    /// 名称 + 分类是否指向同一物品（大小写与首尾空白不敏感；双方均无分类也算一致）
    pub fn same_identity(&self, other: &ItemFields) -> bool {
        normalize(&self.name) == normalize(&other.name)
            && self.category.as_deref().map(normalize) == other.category.as_deref().map(normalize)
    }

    /// 相对 observed 的状态差异（数量、位置、新鲜度等），置信度 / 截图 / 时间戳属于来源信息，不参与比较
    pub fn state_changes(&self, observed: &ItemFields) -> ItemPatch {
        let mut patch = ItemPatch::default();
        if observed.subcategory.is_some() && observed.subcategory != self.subcategory {
            patch.subcategory = observed.subcategory.clone();
        }
        if observed.brand.is_some() && observed.brand != self.brand {
            patch.brand = observed.brand.clone();
        }
        if observed.position.is_some() && observed.position != self.position {
            patch.position = observed.position.clone();
        }
        if observed.item_amount_desc.is_some() && observed.item_amount_desc != self.item_amount_desc {
            patch.item_amount_desc = observed.item_amount_desc.clone();
        }
        if observed.freshness != self.freshness {
            patch.freshness = Some(observed.freshness);
        }
        if observed.expiry_estimate.is_some() && observed.expiry_estimate != self.expiry_estimate {
            patch.expiry_estimate = observed.expiry_estimate.clone();
        }
        if observed.additional_info.is_some() && observed.additional_info != self.additional_info {
            patch.additional_info = observed.additional_info.clone();
        }
        patch
    }
}

fn replace_if_some<T>(slot: &mut Option<T>, value: Option<T>) {
    if value.is_some() {
        *slot = value;
    }
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

/// update_item 的部分字段补丁；null 与缺省等价，表示保持原值
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize, JsonSchema)]
#[serde(default)]
pub struct ItemPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subcategory: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub brand: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub image_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub position: Option<Position>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub item_amount_desc: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub freshness: Option<Freshness>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expiry_estimate: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub additional_info: Option<Attributes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detected_at: Option<DateTime<FixedOffset>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub put_in_time: Option<DateTime<FixedOffset>>,
}

impl ItemPatch {
    pub fn is_empty(&self) -> bool {
        *self == ItemPatch::default()
    }

    pub fn validate(&self) -> Result<(), String> {
        if matches!(&self.name, Some(n) if n.trim().is_empty()) {
            return Err("name must not be empty".to_string());
        }
        if matches!(&self.image_url, Some(u) if u.trim().is_empty()) {
            return Err("image_url must not be empty".to_string());
        }
        if let Some(c) = self.confidence {
            if !(0.0..=1.0).contains(&c) {
                return Err(format!("confidence {c} out of range 0.0-1.0"));
            }
        }
        Ok(())
    }
}
