//! 动作：封闭的五种库存操作
//!
//! 模型返回的工具调用只是结构化数据：名称先映射到 ActionKind，参数再按该动作的结构体反序列化与校验，
//! 通过后才成为可执行的 Action。任何一步失败都是 SchemaError / UnknownActionError，回灌给模型。

use chrono::{DateTime, NaiveDateTime};
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::core::ActionError;
use crate::inventory::{Item, ItemFields, ItemId, ItemPatch};

/// item_info 中允许的字段；其余键（quantity、estimated_size 等识别中间量）直接丢弃
pub const ITEM_FIELDS: [&str; 14] = [
    "name",
    "category",
    "subcategory",
    "brand",
    "confidence",
    "image_url",
    "position",
    "item_amount_desc",
    "freshness",
    "expiry_estimate",
    "additional_info",
    "detected_at",
    "device_id",
    "put_in_time",
];

/// 必须是结构化对象的字段；以 JSON 字符串给出时尝试解析
const OBJECT_FIELDS: [&str; 2] = ["position", "additional_info"];

const TIMESTAMP_FIELDS: [&str; 2] = ["detected_at", "put_in_time"];

/// 动作种类（目录固定五项）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    ListItems,
    FetchItemImage,
    AddItem,
    UpdateItem,
    DeleteItem,
}

impl ActionKind {
    pub const ALL: [ActionKind; 5] = [
        ActionKind::ListItems,
        ActionKind::FetchItemImage,
        ActionKind::AddItem,
        ActionKind::UpdateItem,
        ActionKind::DeleteItem,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ActionKind::ListItems => "list_items",
            ActionKind::FetchItemImage => "fetch_item_image",
            ActionKind::AddItem => "add_item",
            ActionKind::UpdateItem => "update_item",
            ActionKind::DeleteItem => "delete_item",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.name() == name)
    }

    pub fn is_mutation(&self) -> bool {
        matches!(
            self,
            ActionKind::AddItem | ActionKind::UpdateItem | ActionKind::DeleteItem
        )
    }
}

/// list_items 参数
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListItemsArgs {
    /// 仅列出该设备的物品；缺省时使用本次对账的设备
    #[serde(default)]
    pub device_id: Option<String>,
}

/// fetch_item_image / delete_item 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct ItemIdArgs {
    /// 物品 id
    pub item_id: ItemId,
}

/// add_item 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct AddItemArgs {
    /// 新物品字段，name 与 image_url 必填
    pub item_info: ItemFields,
}

/// update_item 参数
#[derive(Debug, Deserialize, JsonSchema)]
pub struct UpdateItemArgs {
    /// 要更新的物品 id
    pub item_id: ItemId,
    /// 只需给出发生变化的字段
    pub item_info: ItemPatch,
}

#[derive(Debug, Deserialize)]
struct RawAddArgs {
    item_info: Value,
}

#[derive(Debug, Deserialize)]
struct RawUpdateArgs {
    item_id: ItemId,
    item_info: Value,
}

/// 通过校验、可直接执行的动作
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    ListItems { device_id: Option<String> },
    FetchItemImage { item_id: ItemId },
    AddItem(ItemFields),
    UpdateItem { item_id: ItemId, patch: ItemPatch },
    DeleteItem { item_id: ItemId },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::ListItems { .. } => ActionKind::ListItems,
            Action::FetchItemImage { .. } => ActionKind::FetchItemImage,
            Action::AddItem(_) => ActionKind::AddItem,
            Action::UpdateItem { .. } => ActionKind::UpdateItem,
            Action::DeleteItem { .. } => ActionKind::DeleteItem,
        }
    }

    /// 按名称与 JSON 参数构造动作；未知名称为 UnknownAction，参数不合法为 Schema
    pub fn parse(name: &str, args: Value) -> Result<Self, ActionError> {
        let kind = ActionKind::from_name(name)
            .ok_or_else(|| ActionError::UnknownAction(name.to_string()))?;
        let args = match args {
            Value::Null => Value::Object(Map::new()),
            Value::Object(_) => args,
            other => {
                return Err(ActionError::schema(
                    name,
                    format!("arguments must be a JSON object, got {other}"),
                ))
            }
        };
        match kind {
            ActionKind::ListItems => {
                let a: ListItemsArgs = from_args(name, args)?;
                Ok(Action::ListItems {
                    device_id: a.device_id.filter(|d| !d.is_empty()),
                })
            }
            ActionKind::FetchItemImage => {
                let a: ItemIdArgs = from_args(name, args)?;
                Ok(Action::FetchItemImage { item_id: a.item_id })
            }
            ActionKind::DeleteItem => {
                let a: ItemIdArgs = from_args(name, args)?;
                Ok(Action::DeleteItem { item_id: a.item_id })
            }
            ActionKind::AddItem => {
                let raw: RawAddArgs = from_args(name, args)?;
                let info = sanitize_item_info(name, raw.item_info)?;
                let fields: ItemFields = from_args(name, Value::Object(info))?;
                fields
                    .validate()
                    .map_err(|reason| ActionError::schema(name, reason))?;
                Ok(Action::AddItem(fields))
            }
            ActionKind::UpdateItem => {
                let raw: RawUpdateArgs = from_args(name, args)?;
                let info = sanitize_item_info(name, raw.item_info)?;
                let patch: ItemPatch = from_args(name, Value::Object(info))?;
                patch
                    .validate()
                    .map_err(|reason| ActionError::schema(name, reason))?;
                if patch.is_empty() {
                    return Err(ActionError::schema(
                        name,
                        "item_info contains no updatable fields",
                    ));
                }
                Ok(Action::UpdateItem {
                    item_id: raw.item_id,
                    patch,
                })
            }
        }
    }

    /// 限定到本次对账的设备：list_items / add_item 一律使用该设备，update_item 不能把物品移到其他设备
    pub fn scoped_to(self, device_id: Option<&str>) -> Self {
        let Some(device) = device_id else {
            return self;
        };
        match self {
            Action::ListItems { .. } => Action::ListItems {
                device_id: Some(device.to_string()),
            },
            Action::AddItem(mut fields) => {
                fields.device_id = Some(device.to_string());
                Action::AddItem(fields)
            }
            Action::UpdateItem { item_id, mut patch } => {
                if patch.device_id.as_deref().is_some_and(|d| d != device) {
                    patch.device_id = None;
                }
                Action::UpdateItem { item_id, patch }
            }
            other => other,
        }
    }
}

fn from_args<T: serde::de::DeserializeOwned>(action: &str, args: Value) -> Result<T, ActionError> {
    serde_json::from_value(args).map_err(|e| ActionError::schema(action, e.to_string()))
}

/// 过滤 item_info：只保留已知字段，id 不可经补丁修改；position / additional_info 若为字符串则尝试解析为对象，
/// 解析失败或非对象时置空；freshness 统一为小写
fn sanitize_item_info(action: &str, info: Value) -> Result<Map<String, Value>, ActionError> {
    let Value::Object(info) = info else {
        return Err(ActionError::schema(action, "item_info must be a JSON object"));
    };
    let mut out = Map::new();
    for (key, value) in info {
        if !ITEM_FIELDS.contains(&key.as_str()) {
            tracing::debug!(action, field = %key, "dropping unknown item field");
            continue;
        }
        let value = if OBJECT_FIELDS.contains(&key.as_str()) {
            coerce_object(value)
        } else if TIMESTAMP_FIELDS.contains(&key.as_str()) {
            coerce_timestamp(value)
        } else if key == "freshness" {
            match value {
                Value::String(s) => Value::String(s.trim().to_ascii_lowercase()),
                other => other,
            }
        } else {
            value
        };
        if !value.is_null() {
            out.insert(key, value);
        }
    }
    Ok(out)
}

fn coerce_object(value: Value) -> Value {
    match value {
        Value::Object(_) => value,
        Value::String(s) => match serde_json::from_str::<Value>(&s) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::Null,
        },
        _ => Value::Null,
    }
}

/// 不带时区的 ISO 时间按 UTC 处理；其余格式原样交给反序列化报错
fn coerce_timestamp(value: Value) -> Value {
    let Value::String(s) = &value else {
        return value;
    };
    if DateTime::parse_from_rfc3339(s).is_ok() {
        return value;
    }
    match NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        Ok(naive) => Value::String(naive.and_utc().fixed_offset().to_rfc3339()),
        Err(_) => value,
    }
}

/// 动作执行结果
#[derive(Debug, Clone, PartialEq)]
pub enum ActionOutcome {
    Items(Vec<Item>),
    Image {
        item_id: ItemId,
        image_url: Option<String>,
    },
    Added(ItemId),
    /// found=false 表示 id 不存在，未做任何修改
    Updated { item_id: ItemId, found: bool },
    Deleted { item_id: ItemId, success: bool },
}

impl ActionOutcome {
    /// 写回对话的结果载荷
    pub fn to_payload(&self) -> Value {
        match self {
            ActionOutcome::Items(items) => json!({ "count": items.len(), "items": items }),
            ActionOutcome::Image {
                item_id,
                image_url: Some(url),
            } => json!({ "item_id": item_id, "image_url": url }),
            ActionOutcome::Image {
                item_id,
                image_url: None,
            } => json!({ "item_id": item_id, "image_url": null, "error": "not found" }),
            ActionOutcome::Added(id) => json!({ "item_id": id }),
            ActionOutcome::Updated { item_id, found } => {
                let id = if *found { json!(item_id) } else { Value::Null };
                json!({ "item_id": id })
            }
            ActionOutcome::Deleted { success, .. } => json!({ "success": success }),
        }
    }
}

/// 错误结果载荷
pub fn error_payload(err: &ActionError) -> Value {
    json!({ "error": { "kind": err.kind(), "message": err.to_string() } })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inventory::Freshness;

    #[test]
    fn test_unknown_action() {
        let err = Action::parse("drop_table", json!({})).unwrap_err();
        assert!(matches!(err, ActionError::UnknownAction(ref n) if n == "drop_table"));
    }

    #[test]
    fn test_add_item_missing_required_field() {
        let err = Action::parse("add_item", json!({"item_info": {"name": "eggs"}})).unwrap_err();
        match err {
            ActionError::Schema { action, reason } => {
                assert_eq!(action, "add_item");
                assert!(reason.contains("image_url"), "{reason}");
            }
            other => panic!("expected schema error, got {other:?}"),
        }
        let err = Action::parse("add_item", json!({})).unwrap_err();
        assert!(matches!(err, ActionError::Schema { .. }));
    }

    #[test]
    fn test_add_item_drops_unknown_fields_and_parses_string_objects() {
        let action = Action::parse(
            "add_item",
            json!({"item_info": {
                "name": "milk",
                "image_url": "img://milk",
                "quantity": 2,
                "estimated_size": "medium",
                "position": "{\"x\": 1, \"y\": 2, \"width\": 3, \"height\": 4}",
                "additional_info": "not json",
                "freshness": "GOOD"
            }}),
        )
        .unwrap();
        let Action::AddItem(fields) = action else {
            panic!("expected add_item");
        };
        assert_eq!(fields.position.unwrap().height, 4.0);
        assert!(fields.additional_info.is_none());
        assert_eq!(fields.freshness, Freshness::Good);
    }

    #[test]
    fn test_naive_timestamp_is_read_as_utc() {
        let action = Action::parse(
            "add_item",
            json!({"item_info": {"name": "milk", "image_url": "img://m", "put_in_time": "2025-09-20T18:00:00"}}),
        )
        .unwrap();
        let Action::AddItem(fields) = action else { panic!() };
        let t = fields.put_in_time.unwrap();
        assert_eq!(t.offset().local_minus_utc(), 0);
        assert_eq!(t.to_rfc3339(), "2025-09-20T18:00:00+00:00");
    }

    #[test]
    fn test_wrong_type_is_schema_error() {
        let err = Action::parse("delete_item", json!({"item_id": "one"})).unwrap_err();
        assert!(matches!(err, ActionError::Schema { .. }));
        let err = Action::parse("update_item", json!({"item_id": 1, "item_info": {"freshness": "rotten"}}))
            .unwrap_err();
        assert!(matches!(err, ActionError::Schema { .. }));
        let err = Action::parse("fetch_item_image", json!([1])).unwrap_err();
        assert!(matches!(err, ActionError::Schema { .. }));
    }

    #[test]
    fn test_update_patch_ignores_id_and_nulls() {
        let action = Action::parse(
            "update_item",
            json!({"item_id": 1, "item_info": {"id": 99, "brand": null, "freshness": "poor"}}),
        )
        .unwrap();
        assert_eq!(
            action,
            Action::UpdateItem {
                item_id: 1,
                patch: ItemPatch {
                    freshness: Some(Freshness::Poor),
                    ..Default::default()
                }
            }
        );
        let err = Action::parse("update_item", json!({"item_id": 1, "item_info": {"id": 2}}))
            .unwrap_err();
        assert!(matches!(err, ActionError::Schema { .. }));
        let err = Action::parse("update_item", json!({"item_id": 1, "item_info": {"name": ""}}))
            .unwrap_err();
        assert!(matches!(err, ActionError::Schema { .. }));
    }

    #[test]
    fn test_scoping_pins_run_device() {
        let list = Action::parse("list_items", json!({"device_id": "f2"}))
            .unwrap()
            .scoped_to(Some("f1"));
        assert_eq!(
            list,
            Action::ListItems {
                device_id: Some("f1".to_string())
            }
        );
        let add = Action::parse(
            "add_item",
            json!({"item_info": {"name": "eggs", "image_url": "img://e", "device_id": "f2"}}),
        )
        .unwrap()
        .scoped_to(Some("f1"));
        let Action::AddItem(fields) = add else { panic!() };
        assert_eq!(fields.device_id.as_deref(), Some("f1"));

        let update = Action::parse(
            "update_item",
            json!({"item_id": 3, "item_info": {"freshness": "fair", "device_id": "f2"}}),
        )
        .unwrap()
        .scoped_to(Some("f1"));
        let Action::UpdateItem { item_id, patch } = update else { panic!() };
        assert_eq!(item_id, 3);
        assert!(patch.device_id.is_none());

        let unscoped = Action::parse("list_items", json!({"device_id": "f2"}))
            .unwrap()
            .scoped_to(None);
        assert_eq!(
            unscoped,
            Action::ListItems {
                device_id: Some("f2".to_string())
            }
        );
    }

    #[test]
    fn test_outcome_payloads() {
        assert_eq!(ActionOutcome::Added(3).to_payload(), json!({"item_id": 3}));
        assert_eq!(
            ActionOutcome::Updated { item_id: 3, found: false }.to_payload(),
            json!({"item_id": null})
        );
        assert_eq!(
            ActionOutcome::Deleted { item_id: 3, success: true }.to_payload(),
            json!({"success": true})
        );
        let err = ActionError::UnknownAction("x".to_string());
        assert_eq!(error_payload(&err)["error"]["kind"], "unknown_action_error");
    }
}
