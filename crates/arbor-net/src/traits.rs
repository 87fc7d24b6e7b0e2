use async_trait::async_trait;
use bytes::Bytes;
use url::Url;

use crate::error::NetResult;
use crate::types::Headers;

/// A downloaded document plus the URL it was effectively served from.
///
/// `effective_url` reflects any redirects the transport followed; callers
/// derive relative-URL bases from it, never from the request URL.
#[derive(Clone, Debug)]
pub struct NetResponse {
    pub body: Bytes,
    pub effective_url: Url,
}

#[async_trait]
pub trait Net: Send + Sync {
    /// Download the whole body at `url`, following redirects.
    async fn download(&self, url: Url, headers: Option<Headers>) -> NetResult<NetResponse>;
}
