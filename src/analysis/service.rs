use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use tower::timeout::TimeoutLayer;
use tower::timeout::error::Elapsed;
use tower::util::BoxCloneService;
use tower::{BoxError, Service, ServiceBuilder, ServiceExt};
use tracing::warn;

use crate::analysis::client::{AnalysisPayload, ModelClient};
use crate::error::TransportError;

/// Adapts a `ModelClient` to a tower `Service`.
#[derive(Clone)]
pub struct ModelClientService {
    inner: Arc<dyn ModelClient>,
}

impl ModelClientService {
    pub fn new(inner: Arc<dyn ModelClient>) -> Self {
        Self { inner }
    }
}

impl Service<AnalysisPayload> for ModelClientService {
    type Response = String;
    type Error = BoxError;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, payload: AnalysisPayload) -> Self::Future {
        let inner = self.inner.clone();
        Box::pin(async move { inner.analyze(payload).await.map_err(BoxError::from) })
    }
}

/// The model call as the session sees it: one clonable service with an
/// optional per-request timeout.
#[derive(Clone)]
pub struct AnalysisService {
    inner: BoxCloneService<AnalysisPayload, String, BoxError>,
}

impl AnalysisService {
    pub fn new(client: Arc<dyn ModelClient>, timeout: Option<Duration>) -> Self {
        let service = ServiceBuilder::new()
            .option_layer(timeout.map(TimeoutLayer::new))
            .service(ModelClientService::new(client));
        Self {
            inner: BoxCloneService::new(service),
        }
    }

    /// The returned future owns its own service clone, so it can be spawned.
    pub fn analyze(
        &self,
        payload: AnalysisPayload,
    ) -> impl Future<Output = Result<String, TransportError>> + Send + 'static {
        let call = self.inner.clone().oneshot(payload);
        async move { call.await.map_err(into_transport_error) }
    }
}

fn into_transport_error(error: BoxError) -> TransportError {
    if error.is::<Elapsed>() {
        warn!("Analysis request timed out");
        return TransportError::Timeout;
    }
    match error.downcast::<TransportError>() {
        Ok(transport) => *transport,
        Err(other) => TransportError::Other(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::client::AnalysisHints;
    use async_trait::async_trait;

    struct Echo;

    #[async_trait]
    impl ModelClient for Echo {
        async fn analyze(&self, payload: AnalysisPayload) -> Result<String, TransportError> {
            match payload {
                AnalysisPayload::Text { text, .. } => Ok(text),
                AnalysisPayload::Image { .. } => Err(TransportError::Quota("daily".to_string())),
            }
        }
    }

    struct Stalled;

    #[async_trait]
    impl ModelClient for Stalled {
        async fn analyze(&self, _payload: AnalysisPayload) -> Result<String, TransportError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(String::new())
        }
    }

    fn text(value: &str) -> AnalysisPayload {
        AnalysisPayload::Text {
            text: value.to_string(),
            hints: AnalysisHints::default(),
        }
    }

    #[tokio::test]
    async fn passes_reply_through() {
        let service = AnalysisService::new(Arc::new(Echo), Some(Duration::from_secs(5)));
        assert_eq!(service.analyze(text("ITEM: can")).await.unwrap(), "ITEM: can");
    }

    #[tokio::test]
    async fn client_errors_survive_boxing() {
        let service = AnalysisService::new(Arc::new(Echo), None);
        let payload = AnalysisPayload::Image {
            image: crate::capture::compositor::UploadImage {
                width: 1,
                height: 1,
                png: vec![],
            },
            hints: AnalysisHints::default(),
        };
        assert_eq!(
            service.analyze(payload).await,
            Err(TransportError::Quota("daily".to_string()))
        );
    }

    #[tokio::test]
    async fn slow_client_times_out() {
        let service = AnalysisService::new(Arc::new(Stalled), Some(Duration::from_millis(50)));
        assert_eq!(service.analyze(text("x")).await, Err(TransportError::Timeout));
    }
}
