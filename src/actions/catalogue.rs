//! 动作目录
//!
//! 五个动作的名称、描述与参数 JSON Schema（schemars 由参数结构体自动生成），
//! 既用于生成发给决策模型的 tools 列表，也与 Action::parse 使用同一组结构体，保证 Schema 与校验一致。

use schemars::gen::SchemaSettings;
use schemars::JsonSchema;
use serde_json::{json, Value};

use crate::actions::action::{AddItemArgs, ItemIdArgs, ListItemsArgs, UpdateItemArgs};
use crate::actions::ActionKind;

/// 单个动作的对外描述
#[derive(Debug, Clone)]
pub struct ActionSpec {
    pub kind: ActionKind,
    pub description: &'static str,
    pub parameters: Value,
}

impl ActionSpec {
    pub fn name(&self) -> &'static str {
        self.kind.name()
    }
}

/// 固定的动作目录
#[derive(Debug, Clone)]
pub struct ActionCatalogue {
    specs: Vec<ActionSpec>,
}

impl ActionCatalogue {
    /// 标准五动作目录
    pub fn standard() -> Self {
        let specs = ActionKind::ALL
            .into_iter()
            .map(|kind| ActionSpec {
                kind,
                description: describe(kind),
                parameters: parameters_schema(kind),
            })
            .collect();
        Self { specs }
    }

    pub fn get(&self, name: &str) -> Option<&ActionSpec> {
        self.specs.iter().find(|s| s.name() == name)
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.specs.iter().map(|s| s.name()).collect()
    }

    /// OpenAI 兼容 tools 数组：[{"type": "function", "function": {name, description, parameters}}]
    pub fn to_openai_tools(&self) -> Vec<Value> {
        self.specs
            .iter()
            .map(|s| {
                json!({
                    "type": "function",
                    "function": {
                        "name": s.name(),
                        "description": s.description,
                        "parameters": s.parameters,
                    }
                })
            })
            .collect()
    }
}

impl Default for ActionCatalogue {
    fn default() -> Self {
        Self::standard()
    }
}

fn describe(kind: ActionKind) -> &'static str {
    match kind {
        ActionKind::ListItems => "List every item currently recorded in the fridge inventory.",
        ActionKind::FetchItemImage => {
            "Fetch the stored image reference of an inventory item by id, to visually compare a candidate match."
        }
        ActionKind::AddItem => {
            "Add a newly observed item to the inventory. item_info.name and item_info.image_url are required."
        }
        ActionKind::UpdateItem => {
            "Update fields of an existing item by id. Only include the fields that changed (amount, position, freshness, ...)."
        }
        ActionKind::DeleteItem => {
            "Permanently delete an inventory item by id, when it no longer appears in the fridge."
        }
    }
}

fn parameters_schema(kind: ActionKind) -> Value {
    match kind {
        ActionKind::ListItems => schema_value::<ListItemsArgs>(),
        ActionKind::FetchItemImage | ActionKind::DeleteItem => schema_value::<ItemIdArgs>(),
        ActionKind::AddItem => schema_value::<AddItemArgs>(),
        ActionKind::UpdateItem => schema_value::<UpdateItemArgs>(),
    }
}

/// 生成内联（无 $ref）的参数 Schema，去掉顶层 $schema / title
fn schema_value<T: JsonSchema>() -> Value {
    let generator = SchemaSettings::draft07()
        .with(|s| s.inline_subschemas = true)
        .into_generator();
    let root = generator.into_root_schema_for::<T>();
    let mut value = serde_json::to_value(root).unwrap_or_else(|_| json!({ "type": "object" }));
    if let Value::Object(map) = &mut value {
        map.remove("$schema");
        map.remove("title");
        map.remove("definitions");
    }
    value
}
