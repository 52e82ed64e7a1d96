//! OpenAI 兼容决策模型客户端
//!
//! 通过 async_openai 调用任意 OpenAI 兼容端点（可配置 base_url）的 function calling；
//! 请求与响应都按自定义结构严格序列化 / 解析：响应不合法即 OracleError，不做文本中搜 JSON 的兜底。

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_openai::config::OpenAIConfig;
use async_openai::Client;
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tokio::time::timeout;

use crate::actions::ActionCatalogue;
use crate::config::OracleSection;
use crate::core::OracleError;
use crate::oracle::{DecisionOracle, OracleDecision};
use crate::reconcile::{RequestedAction, Transcript, Turn};

/// Token 使用统计（累计值）
#[derive(Debug, Clone, Default)]
pub struct TokenUsage {
    pub prompt_tokens: Arc<AtomicU64>,
    pub completion_tokens: Arc<AtomicU64>,
    pub total_tokens: Arc<AtomicU64>,
}

impl TokenUsage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, prompt: u64, completion: u64) {
        self.prompt_tokens.fetch_add(prompt, Ordering::Relaxed);
        self.completion_tokens.fetch_add(completion, Ordering::Relaxed);
        self.total_tokens.fetch_add(prompt + completion, Ordering::Relaxed);
    }

    pub fn get(&self) -> (u64, u64, u64) {
        (
            self.prompt_tokens.load(Ordering::Relaxed),
            self.completion_tokens.load(Ordering::Relaxed),
            self.total_tokens.load(Ordering::Relaxed),
        )
    }
}

/// OpenAI 兼容的 function calling 客户端
pub struct OpenAiOracle {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    top_p: f32,
    timeout: Duration,
    pub usage: TokenUsage,
}

impl OpenAiOracle {
    pub fn new(base_url: Option<&str>, model: &str, api_key: &str, timeout: Duration) -> Self {
        let config = match base_url {
            Some(url) => OpenAIConfig::new().with_api_base(url).with_api_key(api_key),
            None => OpenAIConfig::new().with_api_key(api_key),
        };
        Self {
            client: Client::with_config(config),
            model: model.to_string(),
            temperature: 0.1,
            top_p: 0.9,
            timeout,
            usage: TokenUsage::new(),
        }
    }

    /// 从 [oracle] 配置构造；未设置 API Key 时返回 Config 错误
    pub fn from_config(cfg: &OracleSection) -> Result<Self, OracleError> {
        let api_key = cfg.api_key().ok_or_else(|| {
            OracleError::Config(format!("environment variable {} is not set", cfg.api_key_env))
        })?;
        let mut oracle = Self::new(
            cfg.base_url.as_deref(),
            &cfg.model,
            &api_key,
            cfg.request_timeout(),
        );
        oracle.temperature = cfg.temperature;
        oracle.top_p = cfg.top_p;
        Ok(oracle)
    }

    fn build_request(&self, transcript: &Transcript, catalogue: &ActionCatalogue) -> Value {
        json!({
            "model": self.model,
            "messages": to_wire_messages(transcript),
            "tools": catalogue.to_openai_tools(),
            "tool_choice": "auto",
            "temperature": self.temperature,
            "top_p": self.top_p,
            "stream": false,
        })
    }
}

#[async_trait]
impl DecisionOracle for OpenAiOracle {
    fn token_usage(&self) -> (u64, u64, u64) {
        self.usage.get()
    }

    async fn decide(
        &self,
        transcript: &Transcript,
        catalogue: &ActionCatalogue,
    ) -> Result<OracleDecision, OracleError> {
        let request = self.build_request(transcript, catalogue);
        let chat = self.client.chat();
        let call = chat.create_byot(request);
        let response: Value = match timeout(self.timeout, call).await {
            Ok(Ok(v)) => v,
            Ok(Err(e)) => return Err(OracleError::Transport(e.to_string())),
            Err(_) => return Err(OracleError::Timeout(self.timeout.as_secs())),
        };
        let (decision, usage) = parse_response(response)?;
        if let Some((prompt, completion)) = usage {
            self.usage.add(prompt, completion);
        }
        Ok(decision)
    }
}

/// 对话记录 -> OpenAI messages：种子为 user，模型回复为 assistant（含 tool_calls），动作结果为 tool
pub fn to_wire_messages(transcript: &Transcript) -> Vec<Value> {
    transcript
        .turns()
        .iter()
        .map(|turn| match turn {
            Turn::Seed(seed) => json!({ "role": "user", "content": seed.render() }),
            Turn::OracleReply { content, actions } if actions.is_empty() => {
                json!({ "role": "assistant", "content": content.clone().unwrap_or_default() })
            }
            Turn::OracleReply { content, actions } => json!({
                "role": "assistant",
                "content": content,
                "tool_calls": actions
                    .iter()
                    .map(|a| json!({
                        "id": a.id,
                        "type": "function",
                        "function": { "name": a.name, "arguments": a.arguments.to_string() },
                    }))
                    .collect::<Vec<_>>(),
            }),
            Turn::ActionResult {
                action_id, payload, ..
            } => json!({
                "role": "tool",
                "tool_call_id": action_id,
                "content": payload.to_string(),
            }),
        })
        .collect()
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    #[serde(default)]
    choices: Vec<WireChoice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireMessage,
}

#[derive(Debug, Deserialize)]
struct WireMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
struct WireToolCall {
    #[serde(default)]
    id: Option<String>,
    function: WireFunction,
}

#[derive(Debug, Deserialize)]
struct WireFunction {
    name: String,
    #[serde(default)]
    arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// 严格解析 chat completion 响应：无 choices / 空消息为 EmptyResponse，
/// 工具调用结构或 arguments 不是 JSON 对象为 MalformedToolCall
pub fn parse_response(value: Value) -> Result<(OracleDecision, Option<(u64, u64)>), OracleError> {
    let response: WireResponse = serde_json::from_value(value)
        .map_err(|e| OracleError::MalformedToolCall(format!("unexpected response shape: {e}")))?;
    let usage = response
        .usage
        .map(|u| (u.prompt_tokens, u.completion_tokens));
    let message = response
        .choices
        .into_iter()
        .next()
        .ok_or(OracleError::EmptyResponse)?
        .message;
    let content = message.content.filter(|c| !c.trim().is_empty());
    let calls = message.tool_calls.unwrap_or_default();

    if calls.is_empty() {
        return match content {
            Some(text) => Ok((OracleDecision::Reply(text), usage)),
            None => Err(OracleError::EmptyResponse),
        };
    }

    let mut actions = Vec::with_capacity(calls.len());
    for call in calls {
        if call.function.name.trim().is_empty() {
            return Err(OracleError::MalformedToolCall("tool call without a name".to_string()));
        }
        let arguments = parse_arguments(&call.function.name, call.function.arguments.as_deref())?;
        let id = call
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));
        actions.push(RequestedAction::new(id, call.function.name, arguments));
    }
    Ok((OracleDecision::Actions { content, actions }, usage))
}

fn parse_arguments(name: &str, raw: Option<&str>) -> Result<Value, OracleError> {
    let raw = raw.map(str::trim).unwrap_or_default();
    if raw.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(v @ Value::Object(_)) => Ok(v),
        Ok(other) => Err(OracleError::MalformedToolCall(format!(
            "arguments of {name} must be a JSON object, got {other}"
        ))),
        Err(e) => Err(OracleError::MalformedToolCall(format!(
            "arguments of {name} are not valid JSON: {e}"
        ))),
    }
}
