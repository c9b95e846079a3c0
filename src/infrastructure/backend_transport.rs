use crate::infrastructure::error::EngineError;
use async_trait::async_trait;
use futures::StreamExt;
use futures::stream::BoxStream;
use reqwest::Client;
use url::Url;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Patch,
    Delete,
}

impl HttpMethod {
    fn as_reqwest(self) -> reqwest::Method {
        match self {
            Self::Get => reqwest::Method::GET,
            Self::Post => reqwest::Method::POST,
            Self::Patch => reqwest::Method::PATCH,
            Self::Delete => reqwest::Method::DELETE,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiRequest {
    pub method: HttpMethod,
    pub path: String,
    pub query: Vec<(String, String)>,
    pub body: Option<serde_json::Value>,
    pub bearer_token: Option<String>,
}

impl ApiRequest {
    pub fn new(method: HttpMethod, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            query: Vec::new(),
            body: None,
            bearer_token: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiResponse {
    pub status: u16,
    pub body: String,
}

impl ApiResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

pub type ByteChunkStream = BoxStream<'static, Result<Vec<u8>, EngineError>>;

/// An open streaming response. Dropping `chunks` releases the underlying
/// connection without waiting for the server to close it.
pub struct StreamingResponse {
    pub status: u16,
    pub chunks: ByteChunkStream,
}

impl StreamingResponse {
    /// Collects the remaining chunks into a string, for error bodies.
    pub async fn collect_body(mut self) -> String {
        let mut body = Vec::new();
        while let Some(Ok(chunk)) = self.chunks.next().await {
            body.extend_from_slice(&chunk);
        }
        String::from_utf8_lossy(&body).into_owned()
    }
}

#[async_trait]
pub trait BackendTransport: Send + Sync {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, EngineError>;

    async fn execute_stream(&self, request: ApiRequest) -> Result<StreamingResponse, EngineError>;
}

#[derive(Debug, Clone)]
pub struct ReqwestBackendTransport {
    client: Client,
    base_url: Url,
}

impl ReqwestBackendTransport {
    pub fn new(base_url: &str) -> Result<Self, EngineError> {
        let base_url = Url::parse(base_url)
            .map_err(|error| EngineError::InvalidConfig(format!("invalid base url: {error}")))?;
        if base_url.cannot_be_a_base() {
            return Err(EngineError::InvalidConfig(
                "base url cannot be a base".to_string(),
            ));
        }
        Ok(Self {
            client: Client::new(),
            base_url,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, EngineError> {
        let mut url = self.base_url.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|_| EngineError::InvalidConfig("base url cannot be a base".to_string()))?;
            segments.pop_if_empty();
            for segment in path.split('/').filter(|segment| !segment.is_empty()) {
                segments.push(segment);
            }
        }
        Ok(url)
    }

    fn build(&self, request: &ApiRequest, event_stream: bool) -> Result<reqwest::RequestBuilder, EngineError> {
        let endpoint = self.endpoint(&request.path)?;
        let mut builder = self
            .client
            .request(request.method.as_reqwest(), endpoint);
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(token) = request.bearer_token.as_deref() {
            builder = builder.bearer_auth(token);
        }
        if let Some(body) = request.body.as_ref() {
            builder = builder.json(body);
        }
        if event_stream {
            builder = builder.header(reqwest::header::ACCEPT, "text/event-stream");
        }
        Ok(builder)
    }
}

#[async_trait]
impl BackendTransport for ReqwestBackendTransport {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, EngineError> {
        let response = self
            .build(&request, false)?
            .send()
            .await
            .map_err(|error| EngineError::Network(error.to_string()))?;

        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|error| EngineError::Network(error.to_string()))?;

        Ok(ApiResponse { status, body })
    }

    async fn execute_stream(&self, request: ApiRequest) -> Result<StreamingResponse, EngineError> {
        let response = self
            .build(&request, true)?
            .send()
            .await
            .map_err(|error| EngineError::Network(error.to_string()))?;

        let status = response.status().as_u16();
        let chunks = response
            .bytes_stream()
            .map(|chunk| {
                chunk
                    .map(|bytes| bytes.to_vec())
                    .map_err(|error| EngineError::Network(error.to_string()))
            })
            .boxed();

        Ok(StreamingResponse { status, chunks })
    }
}
