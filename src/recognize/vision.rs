//! OpenAI 兼容视觉模型识别
//!
//! 把照片 URL 连同识别提示发给视觉模型，要求返回 { "items": [...] } 形式的 JSON。

use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::time::timeout;

use crate::config::{OracleSection, VisionSection};
use crate::core::RecognitionError;
use crate::recognize::{parse_recognition, Recognition, Recognizer};

const VISION_SYSTEM_PROMPT: &str = r#"You are the item recognition expert of a smart fridge. Identify every item visible in the photo, including partially hidden ones, and answer with a single JSON object and nothing else:

{
  "items": [
    {
      "name": "specific item name",
      "category": "food category (vegetables, fruit, meat, dairy, condiments, drinks, staples, snacks)",
      "subcategory": "subcategory",
      "brand": "brand if recognizable",
      "confidence": 0.95,
      "position": {"x": 0, "y": 0, "width": 0, "height": 0},
      "quantity": 1,
      "estimated_size": "large/medium/small",
      "freshness": "good/fair/poor",
      "additional_info": {"color": "...", "packaging": "...", "expiry_estimate": "shelf life estimate in the fridge"}
    }
  ]
}

Confidence is between 0 and 1. Distinguish similar items explicitly."#;

pub struct VisionRecognizer {
    client: Client<OpenAIConfig>,
    model: String,
    timeout: Duration,
}

impl VisionRecognizer {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout: Duration) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            timeout,
        }
    }

    /// 与决策模型共用 API Key 环境变量；未配置 base_url 时沿用决策模型的
    pub fn from_config(
        vision: &VisionSection,
        oracle: &OracleSection,
    ) -> Result<Self, RecognitionError> {
        let api_key = oracle.api_key().ok_or_else(|| {
            RecognitionError::Config(format!(
                "environment variable {} is not set",
                oracle.api_key_env
            ))
        })?;
        let base_url = vision.base_url.as_deref().or(oracle.base_url.as_deref());
        Ok(Self::new(
            base_url,
            &vision.model,
            &api_key,
            Duration::from_secs(vision.request_timeout_secs.max(1)),
        ))
    }

    fn build_request(&self, image_url: &str, device_id: Option<&str>) -> Value {
        json!({
            "model": self.model,
            "messages": [
                { "role": "system", "content": VISION_SYSTEM_PROMPT },
                { "role": "user", "content": [
                    { "type": "text", "text": format!(
                        "Identify all items in this fridge photo. Device: {}",
                        device_id.unwrap_or("unknown")
                    ) },
                    { "type": "image_url", "image_url": { "url": image_url } },
                ] },
            ],
            "temperature": 0.1,
            "top_p": 0.9,
            "response_format": { "type": "json_object" },
            "stream": false,
        })
    }
}

#[async_trait]
impl Recognizer for VisionRecognizer {
    async fn recognize(
        &self,
        image_url: &str,
        device_id: Option<&str>,
    ) -> Result<Recognition, RecognitionError> {
        tracing::info!(image_url, device = device_id.unwrap_or("-"), "recognizing fridge photo");
        let request = self.build_request(image_url, device_id);
        let chat = self.client.chat();
        let call = chat.create_byot(request);
        let response: Value = match timeout(self.timeout, call).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(RecognitionError::Transport(e.to_string())),
            Err(_) => return Err(RecognitionError::Timeout(self.timeout.as_secs())),
        };
        let content = response_content(&response)?;
        let recognition = parse_recognition(content)?;
        tracing::info!(items = recognition.items.len(), "recognition finished");
        Ok(recognition)
    }
}

fn response_content(response: &Value) -> Result<&str, RecognitionError> {
    response
        .pointer("/choices/0/message/content")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .ok_or_else(|| RecognitionError::Malformed("response has no message content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_carries_image_and_json_mode() {
        let r = VisionRecognizer::new(None, "gpt-4o", "sk-test", Duration::from_secs(5));
        let req = r.build_request("https://example.com/fridge.jpg", Some("fridge-1"));
        assert_eq!(req["model"], "gpt-4o");
        assert_eq!(
            req["messages"][1]["content"][1]["image_url"]["url"],
            "https://example.com/fridge.jpg"
        );
        assert!(req["messages"][1]["content"][0]["text"]
            .as_str()
            .unwrap()
            .contains("fridge-1"));
        assert_eq!(req["response_format"]["type"], "json_object");
    }

    #[test]
    fn test_response_content() {
        let ok = json!({"choices": [{"message": {"content": "{\"items\": []}"}}]});
        assert_eq!(response_content(&ok).unwrap(), "{\"items\": []}");
        let empty = json!({"choices": []});
        assert!(matches!(
            response_content(&empty),
            Err(RecognitionError::Malformed(_))
        ));
    }
}
