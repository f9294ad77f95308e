//! WebSocket stream transport via tokio-tungstenite.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::{AUTHORIZATION, HeaderValue};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use crate::config::PipescopeConfig;
use crate::error::StreamError;
use crate::stream::{StreamConnection, StreamTransport};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct WsTransport {
    url: String,
    token: Option<String>,
}

impl WsTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            token: None,
        }
    }

    pub fn from_config(config: &PipescopeConfig) -> Self {
        let transport = Self::new(config.stream.url.clone());
        match config.auth.resolve_token() {
            Some(token) => transport.with_token(token),
            None => transport,
        }
    }

    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    fn connect_error(&self, message: impl ToString) -> StreamError {
        StreamError::Connect {
            url: self.url.clone(),
            message: message.to_string(),
        }
    }
}

#[async_trait]
impl StreamTransport for WsTransport {
    async fn connect(&self) -> Result<Box<dyn StreamConnection>, StreamError> {
        let mut request = self
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| self.connect_error(e))?;
        if let Some(token) = &self.token {
            let value = HeaderValue::from_str(&format!("Bearer {token}"))
                .map_err(|e| self.connect_error(e))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        let (stream, response) =
            tokio::time::timeout(CONNECT_TIMEOUT, tokio_tungstenite::connect_async(request))
                .await
                .map_err(|_| self.connect_error("connect timed out"))?
                .map_err(|e| self.connect_error(e))?;
        tracing::debug!(url = %self.url, status = %response.status(), "WebSocket handshake complete");

        Ok(Box::new(WsConnection { stream }))
    }

    fn endpoint(&self) -> String {
        self.url.clone()
    }
}

pub struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl StreamConnection for WsConnection {
    async fn send(&mut self, text: String) -> Result<(), StreamError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| StreamError::Send {
                message: e.to_string(),
            })
    }

    async fn next_frame(&mut self) -> Option<Result<String, StreamError>> {
        loop {
            let message = match self.stream.next().await? {
                Ok(message) => message,
                Err(e) => {
                    return Some(Err(StreamError::Transport {
                        message: e.to_string(),
                    }));
                }
            };
            match message {
                Message::Text(text) => return Some(Ok(text.as_str().to_owned())),
                Message::Close(frame) => {
                    let reason = frame
                        .map(|f| f.reason.as_str().to_owned())
                        .filter(|r| !r.is_empty());
                    return Some(Err(StreamError::Closed { reason }));
                }
                Message::Binary(_) => {
                    tracing::trace!("Ignoring binary WebSocket frame");
                }
                Message::Ping(_) | Message::Pong(_) | Message::Frame(_) => {}
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.stream.close(None).await {
            tracing::trace!(error = %e, "WebSocket close failed");
        }
    }
}
