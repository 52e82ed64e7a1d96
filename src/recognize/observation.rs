//! 识别结果与对账输入之间的转换
//!
//! 识别模型的输出字段比库存模型宽松：position 可能是字符串坐标，数量与大小分开给出，
//! 保质期估计可能放在 additional_info 里。这里统一整理成 ObservedItem。

use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::core::RecognitionError;
use crate::inventory::{Freshness, ObservedItem, Position};

/// 识别模型返回的单个物品
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecognizedItem {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub category: Option<String>,
    #[serde(default)]
    pub subcategory: Option<String>,
    #[serde(default)]
    pub brand: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub image_url: Option<String>,
    #[serde(default)]
    pub position: Option<Value>,
    /// 数字或文字（"6"、"半盒"）
    #[serde(default)]
    pub quantity: Option<Value>,
    #[serde(default)]
    pub estimated_size: Option<String>,
    #[serde(default)]
    pub item_amount_desc: Option<String>,
    #[serde(default)]
    pub freshness: Option<String>,
    #[serde(default)]
    pub expiry_estimate: Option<String>,
    #[serde(default)]
    pub additional_info: Option<Value>,
    #[serde(default)]
    pub put_in_time: Option<String>,
}

/// 一次识别的结果
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recognition {
    pub items: Vec<RecognizedItem>,
}

/// 严格解析识别模型的文本输出：必须是 { "items": [...] }，允许整段包在 ``` 代码块里
pub fn parse_recognition(content: &str) -> Result<Recognition, RecognitionError> {
    let body = strip_code_fence(content.trim())?;
    serde_json::from_str::<Recognition>(body)
        .map_err(|e| RecognitionError::Malformed(format!("expected {{\"items\": [...]}}: {e}")))
}

fn strip_code_fence(text: &str) -> Result<&str, RecognitionError> {
    let Some(rest) = text.strip_prefix("```") else {
        return Ok(text);
    };
    // 去掉语言标记所在行
    let rest = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => return Err(RecognitionError::Malformed("unterminated code fence".to_string())),
    };
    rest.trim_end()
        .strip_suffix("```")
        .map(str::trim)
        .ok_or_else(|| RecognitionError::Malformed("unterminated code fence".to_string()))
}

/// 把识别结果整理成对账输入
///
/// - 缺截图引用的用整张照片 image_ref 补齐
/// - 统一打上 device_id 与 detected_at，put_in_time 缺省为检测时间
/// - item_amount_desc 缺省时由 quantity / estimated_size 合成
/// - additional_info.expiry_estimate 在 expiry_estimate 缺省时移到顶层
///
/// 名称为空的识别结果无法对账，直接跳过。
pub fn prepare_observations(
    recognition: Recognition,
    image_ref: &str,
    device_id: Option<&str>,
    now: DateTime<FixedOffset>,
) -> Vec<ObservedItem> {
    recognition
        .items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| {
            if item.name.trim().is_empty() {
                tracing::warn!(index = i, "skipping recognized item without a name");
                return None;
            }
            Some(to_observed(item, image_ref, device_id, now))
        })
        .collect()
}

fn to_observed(
    item: RecognizedItem,
    image_ref: &str,
    device_id: Option<&str>,
    now: DateTime<FixedOffset>,
) -> ObservedItem {
    let mut additional_info = match item.additional_info {
        Some(Value::Object(map)) => Some(map),
        _ => None,
    };
    let mut expiry_estimate = non_empty(item.expiry_estimate);
    if expiry_estimate.is_none() {
        if let Some(info) = additional_info.as_mut() {
            expiry_estimate = match info.remove("expiry_estimate") {
                Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
                _ => None,
            };
        }
    }
    let additional_info = additional_info.filter(|m| !m.is_empty());

    let item_amount_desc = non_empty(item.item_amount_desc)
        .or_else(|| amount_desc(item.quantity.as_ref(), item.estimated_size.as_deref()));

    let freshness = match item.freshness.as_deref().map(str::parse::<Freshness>) {
        Some(Ok(f)) => f,
        Some(Err(e)) => {
            tracing::debug!(item = %item.name, error = %e, "defaulting freshness to good");
            Freshness::Good
        }
        None => Freshness::Good,
    };

    let put_in_time = item
        .put_in_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .unwrap_or(now);

    ObservedItem {
        name: item.name.trim().to_string(),
        category: non_empty(item.category),
        subcategory: non_empty(item.subcategory),
        brand: non_empty(item.brand),
        confidence: item.confidence.filter(|c| (0.0..=1.0).contains(c)),
        image_url: non_empty(item.image_url).unwrap_or_else(|| image_ref.to_string()),
        position: item.position.as_ref().and_then(parse_position),
        item_amount_desc,
        freshness,
        expiry_estimate,
        additional_info,
        detected_at: Some(now),
        device_id: device_id.map(str::to_string),
        put_in_time: Some(put_in_time),
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn amount_desc(quantity: Option<&Value>, size: Option<&str>) -> Option<String> {
    let quantity = match quantity {
        Some(Value::Number(n)) => Some(n.to_string()),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim().to_string()),
        _ => None,
    };
    let size = size.map(str::trim).filter(|s| !s.is_empty());
    match (quantity, size) {
        (Some(q), Some(s)) => Some(format!("{q}, {s}")),
        (Some(q), None) => Some(q),
        (None, Some(s)) => Some(s.to_string()),
        (None, None) => None,
    }
}

/// 坐标可能是数字或数字字符串；缺任何一项即放弃
fn parse_position(value: &Value) -> Option<Position> {
    let map: Map<String, Value> = match value {
        Value::Object(map) => map.clone(),
        Value::String(s) => match serde_json::from_str(s) {
            Ok(Value::Object(map)) => map,
            _ => return None,
        },
        _ => return None,
    };
    let coord = |key: &str| -> Option<f64> {
        match map.get(key)? {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    };
    Some(Position {
        x: coord("x")?,
        y: coord("y")?,
        width: coord("width")?,
        height: coord("height")?,
    })
}
