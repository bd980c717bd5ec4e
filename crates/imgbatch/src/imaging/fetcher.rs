//! Source image fetcher
//!
//! One pooled `reqwest::Client` is shared by every fetch. Failures come back as
//! [`FetchError`] values so the caller can keep going with sibling URLs.

use futures_util::StreamExt;
use image::{DynamicImage, ImageFormat, ImageReader};
use std::io::Cursor;
use thiserror::Error;

use crate::config::FetchConfig;
use crate::error::{Error, Result};

/// Why a source URL produced no image
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Request to '{url}' failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("'{url}' returned HTTP {status}")]
    Status { url: String, status: u16 },

    #[error("'{url}' exceeds the {limit} byte image limit")]
    TooLarge { url: String, limit: usize },

    #[error("'{url}' is not a decodable image: {reason}")]
    Decode { url: String, reason: String },
}

impl FetchError {
    /// Short classification used in logs and progress records
    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::InvalidUrl { .. } => "invalid_url",
            FetchError::Transport { .. } => "transport",
            FetchError::Status { .. } => "status",
            FetchError::TooLarge { .. } => "too_large",
            FetchError::Decode { .. } => "decode",
        }
    }
}

/// A decoded source image
#[derive(Debug, Clone)]
pub struct FetchedImage {
    /// Normalized URL the image was fetched from
    pub url: String,
    /// Format detected from the image bytes
    pub format: Option<ImageFormat>,
    /// Size of the downloaded body
    pub byte_len: usize,
    pub image: DynamicImage,
}

/// Fetches and decodes remote images
#[derive(Debug, Clone)]
pub struct ImageFetcher {
    client: reqwest::Client,
    max_bytes: usize,
}

impl ImageFetcher {
    /// Build a fetcher with its own pooled client
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .connect_timeout(config.timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self::with_client(client, config.max_image_bytes))
    }

    /// Wrap an existing client
    pub fn with_client(client: reqwest::Client, max_bytes: usize) -> Self {
        Self { client, max_bytes }
    }

    /// Fetch and decode one image
    pub async fn fetch(&self, raw_url: &str) -> std::result::Result<FetchedImage, FetchError> {
        let url = normalize_url(raw_url).to_string();

        let parsed = reqwest::Url::parse(&url).map_err(|e| FetchError::InvalidUrl {
            url: url.clone(),
            reason: e.to_string(),
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(FetchError::InvalidUrl {
                reason: format!("unsupported scheme '{}'", parsed.scheme()),
                url,
            });
        }

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url,
                status: status.as_u16(),
            });
        }

        if let Some(len) = response.content_length() {
            if len > self.max_bytes as u64 {
                return Err(FetchError::TooLarge {
                    url,
                    limit: self.max_bytes,
                });
            }
        }

        let mut body = Vec::new();
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|source| FetchError::Transport {
                url: url.clone(),
                source,
            })?;
            if body.len() + chunk.len() > self.max_bytes {
                return Err(FetchError::TooLarge {
                    url,
                    limit: self.max_bytes,
                });
            }
            body.extend_from_slice(&chunk);
        }

        let byte_len = body.len();
        let decode_url = url.clone();
        let (format, image) = tokio::task::spawn_blocking(move || decode_image(&body))
            .await
            .map_err(|e| FetchError::Decode {
                url: decode_url,
                reason: format!("decoder task failed: {}", e),
            })?
            .map_err(|reason| FetchError::Decode {
                url: url.clone(),
                reason,
            })?;

        tracing::debug!("Fetched {} ({} bytes, {:?})", url, byte_len, format);

        Ok(FetchedImage {
            url,
            format,
            byte_len,
            image,
        })
    }
}

/// Detect the format from magic bytes and decode
pub fn decode_image(
    data: &[u8],
) -> std::result::Result<(Option<ImageFormat>, DynamicImage), String> {
    let reader = ImageReader::new(Cursor::new(data))
        .with_guessed_format()
        .map_err(|e| format!("Failed to read image: {}", e))?;

    let format = reader.format();
    if format.is_none() {
        return Err("Could not detect image format".to_string());
    }

    let image = reader
        .decode()
        .map_err(|e| format!("Failed to decode image: {}", e))?;

    Ok((format, image))
}

/// Trim whitespace and enclosing quote characters from a URL
pub fn normalize_url(raw: &str) -> &str {
    raw.trim_matches(|c: char| c.is_whitespace() || c == '"' || c == '\'')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fetcher() -> ImageFetcher {
        ImageFetcher::new(&FetchConfig::default()).unwrap()
    }

    #[test]
    fn test_normalize_url() {
        assert_eq!(normalize_url("  https://a.example/x.jpg "), "https://a.example/x.jpg");
        assert_eq!(normalize_url("\"https://a.example/x.jpg\""), "https://a.example/x.jpg");
        assert_eq!(normalize_url(" ' \"https://a.example/x.jpg\" ' "), "https://a.example/x.jpg");
        assert_eq!(normalize_url("\"\""), "");
    }

    #[tokio::test]
    async fn test_malformed_url_is_reported() {
        let err = fetcher().fetch("not a url").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_url");
    }

    #[tokio::test]
    async fn test_non_http_scheme_is_reported() {
        let err = fetcher().fetch("ftp://a.example/x.jpg").await.unwrap_err();
        assert_eq!(err.kind(), "invalid_url");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transport_error() {
        // Port 9 on loopback is expected to refuse connections
        let err = fetcher().fetch("http://127.0.0.1:9/x.jpg").await.unwrap_err();
        assert_eq!(err.kind(), "transport");
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_image(b"definitely not an image").is_err());
    }

    #[test]
    fn test_decode_png() {
        let img = DynamicImage::new_rgb8(4, 3);
        let mut buf = Cursor::new(Vec::new());
        img.write_to(&mut buf, ImageFormat::Png).unwrap();

        let (format, decoded) = decode_image(buf.get_ref()).unwrap();
        assert_eq!(format, Some(ImageFormat::Png));
        assert_eq!((decoded.width(), decoded.height()), (4, 3));
    }
}
