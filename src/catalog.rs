use serde::Deserialize;
use url::Url;

pub const DEFAULT_API_BASE: &str = "https://iphonephotographyschool.com/test-api/";

/// One entry of the remote video catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct Video {
    pub id: u64,
    pub name: String,
    pub thumbnail: Url,
    pub description: String,
    #[serde(rename = "video_link")]
    pub video_link: Url,
}

impl Video {
    /// Stable asset identity for the persistence layer.
    pub fn asset_id(&self) -> String {
        self.id.to_string()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("catalog request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("invalid catalog base url: {0}")]
    BaseUrl(#[from] url::ParseError),
}

pub struct CatalogClient {
    client: reqwest::Client,
    base: Url,
}

impl CatalogClient {
    pub fn new(base: &str) -> Result<Self, CatalogError> {
        Ok(Self {
            client: reqwest::Client::new(),
            base: Url::parse(base)?,
        })
    }

    pub async fn videos(&self) -> Result<Vec<Video>, CatalogError> {
        let url = self.base.join("videos")?;
        let videos = self
            .client
            .get(url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        Ok(videos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserializes_the_catalog_payload() {
        let payload = r#"[
            {
                "id": 42,
                "name": "Golden hour",
                "thumbnail": "https://cdn.example.com/42.jpg",
                "description": "Shooting at dusk.",
                "video_link": "https://cdn.example.com/42.mp4"
            }
        ]"#;

        let videos: Vec<Video> = serde_json::from_str(payload).unwrap();
        assert_eq!(videos.len(), 1);
        assert_eq!(videos[0].asset_id(), "42");
        assert_eq!(videos[0].name, "Golden hour");
        assert_eq!(videos[0].description, "Shooting at dusk.");
        assert_eq!(videos[0].thumbnail.as_str(), "https://cdn.example.com/42.jpg");
        assert_eq!(videos[0].video_link.as_str(), "https://cdn.example.com/42.mp4");
    }

    #[test]
    fn joins_the_videos_endpoint_off_the_base() {
        let client = CatalogClient::new(DEFAULT_API_BASE).unwrap();
        let url = client.base.join("videos").unwrap();
        assert_eq!(
            url.as_str(),
            "https://iphonephotographyschool.com/test-api/videos"
        );
    }
}
