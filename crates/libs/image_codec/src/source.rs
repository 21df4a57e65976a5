use crate::ImageError;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Where a record's image lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageSource {
    File(PathBuf),
    Url(String),
}

impl ImageSource {
    #[must_use]
    pub fn parse(reference: &str) -> Self {
        let reference = reference.trim();
        let lower = reference.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            Self::Url(reference.to_string())
        } else {
            Self::File(PathBuf::from(reference))
        }
    }

    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::File(path) => path.display().to_string(),
            Self::Url(url) => url.clone(),
        }
    }

    /// Reads the raw bytes. Zero-length content is a read error.
    pub async fn read_bytes(
        &self,
        http: &reqwest::Client,
        fetch_timeout: Duration,
    ) -> Result<Vec<u8>, ImageError> {
        let name = self.describe();
        let bytes = match self {
            Self::File(path) => tokio::fs::read(path)
                .await
                .map_err(|e| ImageError::read(&name, e))?,
            Self::Url(url) => {
                let response = http
                    .get(url)
                    .timeout(fetch_timeout)
                    .send()
                    .await
                    .map_err(|e| ImageError::read(&name, e))?;
                let status = response.status();
                if !status.is_success() {
                    return Err(ImageError::read(&name, format!("HTTP status {status}")));
                }
                response
                    .bytes()
                    .await
                    .map_err(|e| ImageError::read(&name, e))?
                    .to_vec()
            }
        };
        if bytes.is_empty() {
            return Err(ImageError::read(&name, "image is empty"));
        }
        debug!(source = %name, bytes = bytes.len(), "Read image");
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urls_and_paths_are_told_apart() {
        assert_eq!(
            ImageSource::parse(" HTTPS://host/a.jpg "),
            ImageSource::Url("HTTPS://host/a.jpg".into())
        );
        assert_eq!(
            ImageSource::parse("images/a.jpg"),
            ImageSource::File(PathBuf::from("images/a.jpg"))
        );
    }
}
