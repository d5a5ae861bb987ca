use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum NewsError {
    #[error("invalid news format: {0}")]
    Format(#[from] serde_json::Error),
    #[error("invalid news format: expected an object or a JSON string")]
    Shape,
}

/// A news item pushed through the webhook.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct News {
    #[serde(deserialize_with = "string_or_number")]
    pub id: String,
    #[serde(deserialize_with = "null_as_default")]
    pub title: String,
    #[serde(deserialize_with = "null_as_default")]
    pub content: String,
    #[serde(deserialize_with = "null_as_default")]
    pub source: String,
    #[serde(deserialize_with = "null_as_default")]
    pub url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub image_url: String,
    #[serde(deserialize_with = "null_as_default")]
    pub tags: Vec<String>,
}

const CRYPTO_KEYWORDS: &[&str] = &[
    "bitcoin",
    "ethereum",
    "بيتكوين",
    "إيثريوم",
    "كريبتو",
    "عملات رقمية",
    "crypto",
];

impl News {
    /// Accepts either a JSON object or a string holding JSON. An item without
    /// an id gets one derived from the current time.
    pub fn from_value(value: &Value) -> Result<Self, NewsError> {
        let mut news: News = match value {
            Value::Object(_) => serde_json::from_value(value.clone())?,
            Value::String(s) => serde_json::from_str(s)?,
            _ => return Err(NewsError::Shape),
        };
        if news.id.trim().is_empty() {
            news.id = format!("news-{}", chrono::Utc::now().timestamp_millis());
        }
        Ok(news)
    }

    fn haystack(&self) -> String {
        format!("{} {}", self.title, self.content).to_lowercase()
    }

    pub fn is_crypto(&self) -> bool {
        let text = self.haystack();
        CRYPTO_KEYWORDS.iter().any(|k| text.contains(k))
    }

    /// Whether the tags mark this as crypto news.
    pub fn has_crypto_tags(&self) -> bool {
        let tags = self.tags.join(" ").to_lowercase();
        CRYPTO_KEYWORDS.iter().any(|k| tags.contains(k))
    }

    pub fn headline_emoji(&self) -> &'static str {
        let text = self.haystack();
        if !CRYPTO_KEYWORDS.iter().any(|k| text.contains(k)) {
            "\u{1f4f0}" // 📰
        } else if text.contains("bitcoin") || text.contains("بيتكوين") {
            "\u{20bf}" // ₿
        } else if text.contains("ethereum") || text.contains("إيثريوم") {
            "\u{39e}" // Ξ
        } else {
            "\u{1f4b0}" // 💰
        }
    }

    pub fn has_image(&self) -> bool {
        !self.image_url.trim().is_empty()
    }
}

fn string_or_number<'de, D>(de: D) -> Result<String, D::Error>
where
    D: serde::Deserializer<'de>,
{
    match Value::deserialize(de)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(serde::de::Error::custom(format!("unexpected news id: {other}"))),
    }
}

/// An explicit `null` reads the same as a missing field.
fn null_as_default<'de, D, T>(de: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Option::<T>::deserialize(de).map(Option::unwrap_or_default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_object_with_defaults() {
        let news = News::from_value(&json!({"id": "n-1", "title": "Hello"})).unwrap();
        assert_eq!(news.id, "n-1");
        assert_eq!(news.title, "Hello");
        assert!(news.content.is_empty());
        assert!(news.tags.is_empty());
    }

    #[test]
    fn parses_json_string_and_numeric_id() {
        let raw = json!(r#"{"id": 42, "title": "t", "tags": ["a", "b"]}"#);
        let news = News::from_value(&raw).unwrap();
        assert_eq!(news.id, "42");
        assert_eq!(news.tags, vec!["a", "b"]);
    }

    #[test]
    fn null_fields_read_as_empty() {
        let news = News::from_value(&json!({
            "id": "a",
            "title": "t",
            "tags": null,
            "image_url": null,
            "source": null,
            "url": null,
            "content": null,
        }))
        .unwrap();
        assert_eq!(news.title, "t");
        assert!(news.tags.is_empty());
        assert!(!news.has_image());
        assert_eq!(news.source, "");

        let untitled = News::from_value(&json!({"id": "b", "title": null})).unwrap();
        assert_eq!(untitled.title, "");
    }

    #[test]
    fn missing_id_is_generated() {
        let news = News::from_value(&json!({"title": "no id"})).unwrap();
        assert!(news.id.starts_with("news-"));
    }

    #[test]
    fn rejects_other_shapes() {
        assert!(matches!(News::from_value(&json!(12)), Err(NewsError::Shape)));
        assert!(matches!(News::from_value(&json!("not json")), Err(NewsError::Format(_))));
        assert!(News::from_value(&json!({"tags": "oops"})).is_err());
    }

    #[test]
    fn headline_emoji_follows_keywords() {
        let mk = |title: &str| News { title: title.into(), ..Default::default() };
        assert_eq!(mk("Bitcoin hits a record").headline_emoji(), "\u{20bf}");
        assert_eq!(mk("إيثريوم يرتفع").headline_emoji(), "\u{39e}");
        assert_eq!(mk("Crypto regulation update").headline_emoji(), "\u{1f4b0}");
        assert_eq!(mk("Weather today").headline_emoji(), "\u{1f4f0}");
        assert!(!mk("Weather today").is_crypto());
    }

    #[test]
    fn crypto_tags_are_detected() {
        let news = News { tags: vec!["Bitcoin".into(), "ETF".into()], ..Default::default() };
        assert!(news.has_crypto_tags());
    }
}
