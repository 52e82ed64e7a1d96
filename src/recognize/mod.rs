//! 识别：照片 -> 识别结果 -> 对账输入

pub mod observation;
pub mod vision;

use async_trait::async_trait;

use crate::core::RecognitionError;

pub use observation::{parse_recognition, prepare_observations, Recognition, RecognizedItem};
pub use vision::VisionRecognizer;

/// 识别后端
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn recognize(
        &self,
        image_url: &str,
        device_id: Option<&str>,
    ) -> Result<Recognition, RecognitionError>;
}

/// 返回固定结果的识别器（离线运行与测试用）
#[derive(Debug, Clone, Default)]
pub struct StaticRecognizer {
    recognition: Recognition,
}

impl StaticRecognizer {
    pub fn new(recognition: Recognition) -> Self {
        Self { recognition }
    }
}

#[async_trait]
impl Recognizer for StaticRecognizer {
    async fn recognize(
        &self,
        _image_url: &str,
        _device_id: Option<&str>,
    ) -> Result<Recognition, RecognitionError> {
        Ok(self.recognition.clone())
    }
}
