use std::time::Duration;

use {
    async_trait::async_trait,
    bytes::Bytes,
    futures::{StreamExt, stream::BoxStream},
    reqwest::{Client, header},
    tracing::debug,
};

use crate::error::{Error, Result};

/// Streamed response body.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// What the engine needs from one HTTP GET.
pub struct FetchResponse {
    pub status: u16,
    /// Length of *this* body (the remainder, for a range response).
    pub content_length: Option<u64>,
    pub content_disposition: Option<String>,
    pub body: ByteStream,
}

impl std::fmt::Debug for FetchResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FetchResponse")
            .field("status", &self.status)
            .field("content_length", &self.content_length)
            .field("content_disposition", &self.content_disposition)
            .finish_non_exhaustive()
    }
}

/// HTTP GET with an optional open-ended byte range.
///
/// Any status is returned as-is; interpreting it is the engine's job.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn get(&self, url: &str, range_start: Option<u64>) -> Result<FetchResponse>;
}

/// reqwest-backed [`Fetcher`].
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(user_agent: &str, connect_timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(connect_timeout)
            .build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn get(&self, url: &str, range_start: Option<u64>) -> Result<FetchResponse> {
        let mut request = self.client.get(url);
        if let Some(start) = range_start {
            request = request.header(header::RANGE, format!("bytes={start}-"));
        }

        let response = request.send().await?;
        let status = response.status().as_u16();
        let content_disposition = response
            .headers()
            .get(header::CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let content_length = response.content_length();
        debug!(url, status, ?range_start, ?content_length, "fetch response");

        Ok(FetchResponse {
            status,
            content_length,
            content_disposition,
            body: response.bytes_stream().map(|r| r.map_err(Error::from)).boxed(),
        })
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {super::*, futures::TryStreamExt};

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new("relay-test", Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn plain_get_returns_body_and_headers() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/movie.mp4")
            .with_status(200)
            .with_header("content-disposition", "attachment; filename=\"movie.mp4\"")
            .with_body("0123456789")
            .create_async()
            .await;

        let response = fetcher()
            .get(&format!("{}/movie.mp4", server.url()), None)
            .await
            .unwrap();
        assert_eq!(response.status, 200);
        assert_eq!(response.content_length, Some(10));
        assert_eq!(
            response.content_disposition.as_deref(),
            Some("attachment; filename=\"movie.mp4\"")
        );
        let body: Vec<Bytes> = response.body.try_collect().await.unwrap();
        assert_eq!(body.concat(), b"0123456789");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn range_start_sends_range_header() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/file.bin")
            .match_header("range", "bytes=4-")
            .with_status(206)
            .with_body("456789")
            .create_async()
            .await;

        let response = fetcher()
            .get(&format!("{}/file.bin", server.url()), Some(4))
            .await
            .unwrap();
        assert_eq!(response.status, 206);
        assert_eq!(response.content_length, Some(6));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn error_status_is_passed_through() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/gone")
            .with_status(404)
            .create_async()
            .await;

        let response = fetcher()
            .get(&format!("{}/gone", server.url()), None)
            .await
            .unwrap();
        assert_eq!(response.status, 404);
    }
}
