use std::time::Duration;

use anyhow::{Context, Result};
use rand::Rng;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::TranslatorConfig;

/// Translates post text into Chinese through the public Google Translate
/// `translate_a/single` endpoint.
pub struct Translator {
    client: reqwest::Client,
    config: TranslatorConfig,
}

impl Translator {
    pub fn new(config: TranslatorConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
        }
    }

    /// Translation of `text` into the configured target language, or `None`
    /// when the text is already Chinese, translation is disabled, or anything
    /// goes wrong.
    pub async fn translate_to_chinese(&self, text: &str) -> Option<String> {
        if !self.config.enabled {
            return None;
        }

        self.courtesy_delay().await;

        match self.try_translate(text).await {
            Ok(result) => result,
            Err(e) => {
                warn!("Translation failed: {:#}", e);
                None
            }
        }
    }

    /// One backend round trip: the response carries both the detected source
    /// language and the translated segments.
    async fn try_translate(&self, text: &str) -> Result<Option<String>> {
        let body = self.query(text, &self.config.target_lang).await?;

        let lang = detected_language(&body)?;
        if is_chinese(lang) {
            debug!("Text already in Chinese ({}), skipping translation", lang);
            return Ok(None);
        }

        let translated = translated_text(&body)?;
        debug!("Translated {} -> {}: {}", lang, self.config.target_lang, translated);
        Ok(Some(translated))
    }

    async fn query(&self, text: &str, target: &str) -> Result<Value> {
        let url = format!("{}/translate_a/single", self.config.base_url);

        let response = self
            .client
            .get(&url)
            .query(&[
                ("client", "gtx"),
                ("sl", "auto"),
                ("tl", target),
                ("dt", "t"),
                ("q", text),
            ])
            .send()
            .await
            .context("Failed to send request to translation backend")?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            anyhow::bail!("Translation backend error ({}): {}", status, error_body);
        }

        response
            .json()
            .await
            .context("Failed to parse translation response")
    }

    async fn courtesy_delay(&self) {
        let (min, max) = (self.config.min_delay_ms, self.config.max_delay_ms);
        let millis = if max > min {
            rand::thread_rng().gen_range(min..=max)
        } else {
            min
        };
        if millis > 0 {
            tokio::time::sleep(Duration::from_millis(millis)).await;
        }
    }
}

/// Source language code reported at index 2 of a `translate_a/single` body.
fn detected_language(body: &Value) -> Result<&str> {
    body.get(2)
        .and_then(Value::as_str)
        .context("Translation response has no detected language")
}

fn translated_text(body: &Value) -> Result<String> {
    let segments = body
        .get(0)
        .and_then(Value::as_array)
        .context("Translation response has no segments")?;

    let translated: String = segments
        .iter()
        .filter_map(|seg| seg.get(0).and_then(Value::as_str))
        .collect();

    if translated.is_empty() {
        anyhow::bail!("Translation response is empty");
    }
    Ok(translated)
}

fn is_chinese(lang: &str) -> bool {
    lang.eq_ignore_ascii_case("zh") || lang.eq_ignore_ascii_case("zh-cn")
}
