use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::AUTHORIZATION;
use reqwest::StatusCode;
use tokio_util::codec::FramedRead;
use tokio_util::codec::LinesCodec;
use tokio_util::io::StreamReader;
use tracing::debug;
use tracing::instrument;

use super::proto::decode_watch_line;
use super::proto::WatchRequestBody;
use super::WatchRequest;
use super::WatchStream;
use super::WatchTransport;
use crate::constants::MAX_WATCH_LINE_BYTES;
use crate::constants::WATCH_PATH;
use crate::NetworkError;
use crate::RemoteConfig;
use crate::Result;

/// Watch transport over the etcd v3 JSON gateway.
///
/// The body of `POST /v3/watch` is a never-ending sequence of JSON objects
/// separated by newlines.
#[derive(Debug, Clone)]
pub struct HttpWatchTransport {
    client: reqwest::Client,
    url: String,
    auth: Option<String>,
}

impl HttpWatchTransport {
    pub fn new(config: &RemoteConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_millis(config.connect_timeout_ms))
            .build()?;
        Ok(Self::with_client(client, config))
    }

    pub fn with_client(
        client: reqwest::Client,
        config: &RemoteConfig,
    ) -> Self {
        Self {
            client,
            url: format!("{}{}", config.base_url(), WATCH_PATH),
            auth: config.auth.clone().filter(|a| !a.is_empty()),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl WatchTransport for HttpWatchTransport {
    #[instrument(skip(self), fields(url = %self.url))]
    async fn open(
        &self,
        request: WatchRequest,
    ) -> Result<WatchStream> {
        let mut builder = self
            .client
            .post(&self.url)
            .json(&WatchRequestBody::from(&request));
        if let Some(auth) = &self.auth {
            builder = builder.header(AUTHORIZATION, auth);
        }

        let response = builder.send().await?;
        let status = response.status();
        if status != StatusCode::OK {
            let body = response.text().await.unwrap_or_default();
            return Err(NetworkError::UnexpectedStatus { status, body }.into());
        }
        debug!("watch subscription accepted");

        let body = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(std::io::Error::other));
        let lines = FramedRead::new(
            StreamReader::new(body),
            LinesCodec::new_with_max_length(MAX_WATCH_LINE_BYTES),
        );

        Ok(lines
            .filter_map(|line| async move {
                match line {
                    Ok(line) if line.trim().is_empty() => None,
                    Ok(line) => Some(decode_watch_line(&line)),
                    Err(e) => Some(Err(e.into())),
                }
            })
            .boxed())
    }
}
