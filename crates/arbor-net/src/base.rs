use async_trait::async_trait;
use tracing::debug;
use url::Url;

use crate::error::{NetError, NetResult};
use crate::traits::{Net, NetResponse};
use crate::types::{Headers, NetOptions};

/// Base HTTP client implementation using reqwest
#[derive(Clone, Debug)]
pub struct ReqwestNet {
    client: reqwest::Client,
}

impl ReqwestNet {
    pub fn new(opts: NetOptions) -> NetResult<Self> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(opts.request_timeout)
            .connect_timeout(opts.connect_timeout)
            .build()
            .map_err(|e| NetError::Http(e.to_string()))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Net for ReqwestNet {
    async fn download(&self, url: Url, headers: Option<Headers>) -> NetResult<NetResponse> {
        let mut request = self.client.get(url);
        if let Some(headers) = headers {
            for (key, value) in headers.iter() {
                request = request.header(key, value);
            }
        }

        let response = request.send().await?;
        let status = response.status();
        let effective_url = response.url().clone();

        if !status.is_success() {
            return Err(NetError::HttpStatus {
                status: status.as_u16(),
                url: effective_url,
            });
        }

        let body = response.bytes().await?;
        debug!(
            url = %effective_url,
            bytes = body.len(),
            "arbor-net: download complete"
        );

        Ok(NetResponse {
            body,
            effective_url,
        })
    }
}
