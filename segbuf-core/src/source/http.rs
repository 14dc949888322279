//! HTTP implementation of the manifest and segment collaborators.

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::Client;
use url::Url;

use super::{ManifestFetchError, ManifestLoader, SegmentFetchError, SegmentFetcher};
use crate::PlaybackError;
use crate::config::NetworkConfig;
use crate::manifest::Manifest;
use crate::media::FileId;

/// Media server client speaking the `/videos/{id}/...` routes.
///
/// Resolves `videos/{id}/manifest` and `videos/{id}/segment/{filename}`
/// against the configured base URL. Path components are percent-encoded.
#[derive(Debug, Clone)]
pub struct HttpMediaClient {
    client: Client,
    base_url: Url,
}

impl HttpMediaClient {
    /// Creates a client from network configuration.
    ///
    /// # Errors
    ///
    /// - `PlaybackError::Configuration` - Base URL cannot be parsed or the HTTP
    ///   client cannot be built
    pub fn new(config: &NetworkConfig) -> Result<Self, PlaybackError> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            PlaybackError::Configuration {
                reason: format!("invalid base URL {}: {e}", config.base_url),
            }
        })?;

        // Relative joins replace the last path segment unless it ends in '/'
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let mut builder = Client::builder()
            .user_agent(config.user_agent)
            .connect_timeout(config.connect_timeout);
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().map_err(|e| PlaybackError::Configuration {
            reason: format!("failed to build HTTP client: {e}"),
        })?;

        Ok(Self { client, base_url })
    }

    fn manifest_url(&self, file_id: &FileId) -> Result<Url, url::ParseError> {
        self.base_url.join(&format!(
            "videos/{}/manifest",
            urlencoding::encode(file_id.as_str())
        ))
    }

    fn segment_url(&self, file_id: &FileId, filename: &str) -> Result<Url, url::ParseError> {
        self.base_url.join(&format!(
            "videos/{}/segment/{}",
            urlencoding::encode(file_id.as_str()),
            urlencoding::encode(filename)
        ))
    }
}

#[async_trait]
impl ManifestLoader for HttpMediaClient {
    async fn load_manifest(&self, file_id: &FileId) -> Result<Manifest, ManifestFetchError> {
        let transport = |reason: String| ManifestFetchError::Transport {
            file_id: file_id.clone(),
            reason,
        };

        let url = self.manifest_url(file_id).map_err(|e| transport(e.to_string()))?;
        tracing::debug!(%file_id, %url, "Requesting manifest");

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ManifestFetchError::Status {
                file_id: file_id.clone(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|e| transport(e.to_string()))?;
        Manifest::from_json(&body).map_err(|e| ManifestFetchError::Malformed {
            file_id: file_id.clone(),
            reason: e.to_string(),
        })
    }
}

#[async_trait]
impl SegmentFetcher for HttpMediaClient {
    async fn fetch_segment(
        &self,
        file_id: &FileId,
        filename: &str,
    ) -> Result<Bytes, SegmentFetchError> {
        let transport = |reason: String| SegmentFetchError::Transport {
            filename: filename.to_string(),
            reason,
        };

        let url = self
            .segment_url(file_id, filename)
            .map_err(|e| transport(e.to_string()))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SegmentFetchError::Status {
                filename: filename.to_string(),
                status: status.as_u16(),
            });
        }

        response.bytes().await.map_err(|e| transport(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client_for(base_url: &str) -> HttpMediaClient {
        let config = NetworkConfig {
            base_url: base_url.to_string(),
            ..Default::default()
        };
        HttpMediaClient::new(&config).unwrap()
    }

    #[test]
    fn test_manifest_url_keeps_base_path() {
        let client = client_for("https://media.example.com/api");
        let url = client.manifest_url(&FileId::new("17")).unwrap();
        assert_eq!(url.as_str(), "https://media.example.com/api/videos/17/manifest");
    }

    #[test]
    fn test_segment_url_encodes_filename() {
        let client = client_for("https://media.example.com/");
        let url = client
            .segment_url(&FileId::new("17"), "chunk 1/seg.m4s")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://media.example.com/videos/17/segment/chunk%201%2Fseg.m4s"
        );
    }

    #[test]
    fn test_invalid_base_url_is_configuration_error() {
        let config = NetworkConfig {
            base_url: "not a url".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            HttpMediaClient::new(&config),
            Err(PlaybackError::Configuration { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_server_is_transport_error() {
        // Port 9 (discard) on localhost is expected to refuse connections
        let client = client_for("http://127.0.0.1:9/");
        let result = client.load_manifest(&FileId::new("1")).await;
        assert!(matches!(result, Err(ManifestFetchError::Transport { .. })));
    }
}
