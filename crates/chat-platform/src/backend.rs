//! HTTP chat backend over browser `fetch()` via gloo-net.
//!
//! - `GET /health` is raced against a gloo-timers timeout; the losing
//!   fetch is aborted.
//! - `POST /chat` returns the body as a byte stream read from the
//!   response's `ReadableStream`. Dropping the stream aborts the fetch.

use async_trait::async_trait;
use futures::future;
use futures::stream::{self, StreamExt};
use gloo_net::http::Request;
use gloo_timers::future::TimeoutFuture;
use js_sys::{Reflect, Uint8Array};
use wasm_bindgen::{JsCast, JsValue};
use wasm_bindgen_futures::JsFuture;
use web_sys::{AbortController, AbortSignal, ReadableStreamDefaultReader};

use chat_core::health::race_timeout;
use chat_core::ports::{ByteStream, ChatBackendPort};
use chat_types::{ChatError, Result, config::ClientConfig, wire::ChatWireRequest};

pub struct HttpChatBackend {
    health_url: String,
    chat_url: String,
}

impl HttpChatBackend {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            health_url: config.health_url(),
            chat_url: config.chat_url(),
        }
    }
}

#[async_trait(?Send)]
impl ChatBackendPort for HttpChatBackend {
    async fn health(&self, timeout_ms: u64) -> Result<u16> {
        let abort = AbortOnDrop::new();
        let signal = abort.signal();
        let request = async {
            Request::get(&self.health_url)
                .abort_signal(signal.as_ref())
                .send()
                .await
                .map(|response| response.status())
                .map_err(|e| ChatError::Network(e.to_string()))
        };
        let timer = TimeoutFuture::new(u32::try_from(timeout_ms).unwrap_or(u32::MAX));
        race_timeout(request, timer, timeout_ms).await
    }

    fn open_chat(&self, req: ChatWireRequest) -> ByteStream {
        let url = self.chat_url.clone();
        let opened = async move {
            let abort = AbortOnDrop::new();
            let signal = abort.signal();
            let response = Request::post(&url)
                .abort_signal(signal.as_ref())
                .json(&req)
                .map_err(|e| ChatError::Serialization(e.to_string()))?
                .send()
                .await
                .map_err(|e| ChatError::Network(e.to_string()))?;

            if !response.ok() {
                return Err(ChatError::Http {
                    status: response.status(),
                    message: response.status_text(),
                });
            }

            let body = response
                .body()
                .ok_or_else(|| ChatError::Network("response has no body".to_string()))?;
            let reader = body
                .get_reader()
                .dyn_into::<ReadableStreamDefaultReader>()
                .map_err(|e| ChatError::JsInterop(format!("{:?}", e)))?;
            Ok::<_, ChatError>(BodyReader { reader, _abort: abort })
        };

        Box::pin(stream::once(opened).flat_map(|opened| match opened {
            Ok(body) => body.into_stream().boxed_local(),
            Err(e) => stream::once(future::ready(Err(e))).boxed_local(),
        }))
    }
}

/// Aborts the associated fetch when dropped.
struct AbortOnDrop(Option<AbortController>);

impl AbortOnDrop {
    fn new() -> Self {
        Self(AbortController::new().ok())
    }

    fn signal(&self) -> Option<AbortSignal> {
        self.0.as_ref().map(|c| c.signal())
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(controller) = &self.0 {
            controller.abort();
        }
    }
}

struct BodyReader {
    reader: ReadableStreamDefaultReader,
    _abort: AbortOnDrop,
}

impl BodyReader {
    /// Next chunk, or `None` at end of body.
    async fn read(&self) -> Result<Option<Vec<u8>>> {
        let result = JsFuture::from(self.reader.read())
            .await
            .map_err(|e| ChatError::Network(format!("{:?}", e)))?;
        let done = Reflect::get(&result, &JsValue::from_str("done"))
            .map_err(|e| ChatError::JsInterop(format!("{:?}", e)))?
            .as_bool()
            .unwrap_or(true);
        if done {
            return Ok(None);
        }
        let value = Reflect::get(&result, &JsValue::from_str("value"))
            .map_err(|e| ChatError::JsInterop(format!("{:?}", e)))?;
        Ok(Some(Uint8Array::new(&value).to_vec()))
    }

    fn into_stream(self) -> impl futures::Stream<Item = Result<Vec<u8>>> {
        stream::unfold(Some(self), |state| async move {
            let body = state?;
            match body.read().await {
                Ok(Some(bytes)) => Some((Ok(bytes), Some(body))),
                Ok(None) => None,
                Err(e) => Some((Err(e), None)),
            }
        })
    }
}
