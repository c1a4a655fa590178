use futures_util::future::BoxFuture;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};

use allybot_engine::platform::PlatformError;
use allybot_engine::translate::{Translation, Translator};

#[derive(Debug, Serialize)]
struct TranslateRequest<'a> {
    text: [&'a str; 1],
    target_lang: String,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<TranslatedText>,
}

#[derive(Debug, Deserialize)]
struct TranslatedText {
    detected_source_language: String,
    text: String,
}

/// DeepL-compatible JSON translation endpoint.
pub struct HttpTranslator {
    client: Client,
    url: String,
    api_key: Option<String>,
}

impl HttpTranslator {
    pub fn new(client: Client, url: String, api_key: Option<String>) -> Self {
        Self { client, url, api_key }
    }
}

impl Translator for HttpTranslator {
    fn translate<'a>(
        &'a self,
        text: &'a str,
        target_lang: &'a str,
    ) -> BoxFuture<'a, Result<Translation, PlatformError>> {
        Box::pin(async move {
            let body = TranslateRequest {
                text: [text],
                target_lang: target_lang.to_uppercase(),
            };
            let mut request = self.client.post(&self.url).json(&body);
            if let Some(key) = &self.api_key {
                request = request.header("Authorization", format!("DeepL-Auth-Key {}", key));
            }

            let resp = request
                .send()
                .await
                .map_err(|e| PlatformError::Unavailable(format!("translation: {}", e)))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(match status {
                    StatusCode::FORBIDDEN | StatusCode::UNAUTHORIZED => {
                        PlatformError::Forbidden(format!("translation: {}", body))
                    }
                    _ => PlatformError::Unavailable(format!("translation: {} {}", status, body)),
                });
            }

            let parsed: TranslateResponse = resp
                .json()
                .await
                .map_err(|e| PlatformError::Unavailable(format!("translation: malformed response: {}", e)))?;
            first_translation(parsed)
        })
    }
}

fn first_translation(parsed: TranslateResponse) -> Result<Translation, PlatformError> {
    let first = parsed
        .translations
        .into_iter()
        .next()
        .ok_or_else(|| PlatformError::Unavailable("translation: empty response".into()))?;
    Ok(Translation {
        detected_source_lang: first.detected_source_language.to_lowercase(),
        translated_text: first.text,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_body_uses_upper_case_language() {
        let body = TranslateRequest {
            text: ["hola"],
            target_lang: "en".to_uppercase(),
        };
        assert_eq!(
            serde_json::to_value(&body).unwrap(),
            serde_json::json!({"text": ["hola"], "target_lang": "EN"})
        );
    }

    #[test]
    fn takes_the_first_translation() {
        let parsed: TranslateResponse = serde_json::from_str(
            r#"{"translations":[{"detected_source_language":"ES","text":"hello"}]}"#,
        )
        .unwrap();
        assert_eq!(
            first_translation(parsed).unwrap(),
            Translation {
                detected_source_lang: "es".into(),
                translated_text: "hello".into(),
            }
        );

        let empty: TranslateResponse = serde_json::from_str(r#"{"translations":[]}"#).unwrap();
        assert!(matches!(first_translation(empty), Err(PlatformError::Unavailable(_))));
    }
}
