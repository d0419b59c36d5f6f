//! Image generation and edit types.

use serde::{Deserialize, Serialize};

/// `POST /v1/images/generations` body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageGenerationRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub n: Option<u32>,
    /// `WxH`, e.g. `1024x1024`; mapped to aspect ratios by vendors that take
    /// those instead.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quality: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_format: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

/// `POST /v1/images/edits` unified form (the multipart body is flattened by
/// the HTTP layer).
#[derive(Debug, Clone)]
pub struct ImageEditRequest {
    pub model: Option<String>,
    pub prompt: String,
    /// Raw bytes of the uploaded source image.
    pub image: Vec<u8>,
    pub image_name: String,
    /// Optional transparency mask.
    pub mask: Option<Vec<u8>>,
    pub n: Option<u32>,
    pub size: Option<String>,
    pub response_format: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub b64_json: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub revised_prompt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageResponse {
    pub created: i64,
    pub data: Vec<ImageData>,
}

impl ImageGenerationRequest {
    /// Map a `WxH` size to the closest supported aspect ratio.
    #[must_use]
    pub fn aspect_ratio(&self) -> &'static str {
        match self.size.as_deref() {
            Some("1792x1024") | Some("1536x1024") => "16:9",
            Some("1024x1792") | Some("1024x1536") => "9:16",
            _ => "1:1",
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aspect_ratio_mapping() {
        let mut req: ImageGenerationRequest =
            serde_json::from_str(r#"{"prompt":"a cat"}"#).unwrap();
        assert_eq!(req.aspect_ratio(), "1:1");
        req.size = Some("1792x1024".into());
        assert_eq!(req.aspect_ratio(), "16:9");
        req.size = Some("1024x1792".into());
        assert_eq!(req.aspect_ratio(), "9:16");
    }
}
