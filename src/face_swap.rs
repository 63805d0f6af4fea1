//! Face-swap call site: validation, admission, upstream call, normalization.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, error, info, instrument, warn};

use crate::config::StylecardConfig;
use crate::error::Result;
use crate::governor::{
    CallSafety, RateLimitStatus, RetryExecutor, RetryPolicy, SlidingWindowLimiter,
};
use crate::image_ref::{self, ImageRef, ImageRefError};
use crate::upstream::{
    check_token, extract_image_url, FaceSwapBackend, FaceSwapInput, ReplicateClient, UpstreamError,
};

/// Body of a face-swap request.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaceSwapRequest {
    /// Reference image whose face is replaced
    #[serde(default)]
    pub input_image: Option<String>,
    /// The user's photo
    #[serde(default)]
    pub swap_image: Option<String>,
}

/// A generated image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FaceSwapOutcome {
    pub url: String,
    pub rate_limit_status: RateLimitStatus,
}

/// Why a face-swap request did not produce an image.
#[derive(Error, Debug)]
pub enum FaceSwapError {
    /// The provider cannot be called with the current configuration
    #[error("{0}")]
    Unavailable(String),

    #[error("Both inputImage and swapImage are required")]
    MissingImages,

    #[error("Invalid image URL format")]
    InvalidImage {
        field: &'static str,
        #[source]
        source: ImageRefError,
    },

    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { status: RateLimitStatus },

    #[error("There is issue creating StyleCard - Please try later.")]
    Upstream(#[source] UpstreamError),
}

/// Guards the face-swap provider with the rate limiter and retry executor.
pub struct FaceSwapService {
    limiter: Arc<SlidingWindowLimiter>,
    executor: RetryExecutor,
    backend: std::result::Result<Arc<dyn FaceSwapBackend>, String>,
    transformations: String,
    call_safety: CallSafety,
}

impl FaceSwapService {
    pub fn new(
        limiter: Arc<SlidingWindowLimiter>,
        executor: RetryExecutor,
        backend: Arc<dyn FaceSwapBackend>,
    ) -> Self {
        Self {
            limiter,
            executor,
            backend: Ok(backend),
            transformations: String::new(),
            call_safety: CallSafety::NonIdempotent,
        }
    }

    /// A service that answers every request with `reason`.
    pub fn unavailable(
        limiter: Arc<SlidingWindowLimiter>,
        executor: RetryExecutor,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            limiter,
            executor,
            backend: Err(reason.into()),
            transformations: String::new(),
            call_safety: CallSafety::NonIdempotent,
        }
    }

    /// Build the service, its limiter and its Replicate client from configuration.
    ///
    /// A missing or malformed token does not fail startup; the service then
    /// reports the problem on each request.
    pub fn from_config(config: &StylecardConfig) -> Result<Self> {
        let limiter = Arc::new(SlidingWindowLimiter::new(
            config.rate_limiting.max_requests,
            Duration::from_millis(config.rate_limiting.window_size_ms),
        ));
        debug!(
            max_requests = limiter.max_requests(),
            window_ms = limiter.window().as_millis() as u64,
            "Rate limiter configured"
        );
        let executor = RetryExecutor::new(RetryPolicy::from(&config.retry));

        let service = match check_token(config.replicate.api_token.as_deref()) {
            Ok(token) => {
                let client = ReplicateClient::new(&config.replicate, token)?;
                Self::new(limiter, executor, Arc::new(client))
            }
            Err(reason) => {
                warn!(reason, "Face-swap provider unavailable");
                Self::unavailable(limiter, executor, reason)
            }
        };

        let call_safety = if config.replicate.retry_enabled {
            CallSafety::Idempotent
        } else {
            CallSafety::NonIdempotent
        };

        Ok(service
            .with_transformations(config.imagekit.transformations.clone())
            .with_call_safety(call_safety))
    }

    /// Transformation suffix applied to ImageKit reference images.
    pub fn with_transformations(mut self, transformations: impl Into<String>) -> Self {
        self.transformations = transformations.into();
        self
    }

    pub fn with_call_safety(mut self, call_safety: CallSafety) -> Self {
        self.call_safety = call_safety;
        self
    }

    pub fn limiter(&self) -> &Arc<SlidingWindowLimiter> {
        &self.limiter
    }

    /// Run one face swap.
    ///
    /// Inputs are validated before the limiter is consulted, so a rejected
    /// request never spends quota.
    #[instrument(skip(self, request), fields(call_safety = ?self.call_safety))]
    pub async fn swap(
        &self,
        request: FaceSwapRequest,
    ) -> std::result::Result<FaceSwapOutcome, FaceSwapError> {
        let backend = self
            .backend
            .as_ref()
            .map_err(|reason| FaceSwapError::Unavailable(reason.clone()))?;

        let (input_image, swap_image) = match (request.input_image, request.swap_image) {
            (Some(input), Some(swap)) if !input.is_empty() && !swap.is_empty() => (input, swap),
            (input, swap) => {
                let presence = |v: &Option<String>| match v.as_deref() {
                    Some(s) if !s.is_empty() => "present",
                    _ => "missing",
                };
                warn!(
                    input_image = presence(&input),
                    swap_image = presence(&swap),
                    "Missing input images"
                );
                return Err(FaceSwapError::MissingImages);
            }
        };

        let input_ref = validate("inputImage", &input_image)?;
        let swap_ref = validate("swapImage", &swap_image)?;
        debug!(
            input_image = %input_ref,
            swap_image = %swap_ref,
            swap_is_upload = swap_ref.is_data_uri(),
            "Image references accepted"
        );

        if !self.limiter.try_acquire() {
            return Err(FaceSwapError::RateLimited {
                status: self.limiter.status(),
            });
        }

        let sanitized_input = image_ref::sanitize_image_url(&input_image);
        let input = FaceSwapInput {
            input_image: image_ref::apply_transformations(&sanitized_input, &self.transformations),
            swap_image: image_ref::sanitize_image_url(&swap_image),
        };
        info!(
            input_image = %input.input_image,
            swap_image = %image_ref::summarize(&input.swap_image),
            "Calling face-swap provider"
        );

        let policy = self.call_safety.policy(&self.executor);
        let output = self
            .executor
            .execute_when(&policy, || backend.run(&input), UpstreamError::is_retryable)
            .await
            .map_err(FaceSwapError::Upstream)?;

        let url = extract_image_url(&output).map_err(|e| {
            error!(error = %e, output = %output, "Could not extract image URL");
            FaceSwapError::Upstream(e)
        })?;

        info!(url = %url, "Face swap completed");
        Ok(FaceSwapOutcome {
            url,
            rate_limit_status: self.limiter.status(),
        })
    }
}

fn validate(field: &'static str, raw: &str) -> std::result::Result<ImageRef, FaceSwapError> {
    ImageRef::parse(raw).map_err(|source| {
        warn!(
            field,
            value = %image_ref::summarize(raw),
            error = %source,
            "Image reference rejected"
        );
        FaceSwapError::InvalidImage { field, source }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governor::{ManualClock, Sleeper};
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use serde_json::{json, Value};
    use std::collections::VecDeque;

    const REF_URL: &str = "https://ik.imagekit.io/demo/Reference/look.jpg?updatedAt=1752706312359";
    const USER_PHOTO: &str = "data:image/jpeg;base64,/9j/4AAQSkZJRgABAQEAYABgAAD/2Q==";

    /// Replays scripted results and records the inputs it was called with.
    #[derive(Default)]
    struct ScriptedBackend {
        results: Mutex<VecDeque<std::result::Result<Value, UpstreamError>>>,
        calls: Mutex<Vec<FaceSwapInput>>,
    }

    impl ScriptedBackend {
        fn with(results: Vec<std::result::Result<Value, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                results: Mutex::new(results.into()),
                calls: Mutex::default(),
            })
        }
    }

    #[async_trait]
    impl FaceSwapBackend for ScriptedBackend {
        async fn run(&self, input: &FaceSwapInput) -> std::result::Result<Value, UpstreamError> {
            self.calls.lock().push(input.clone());
            self.results
                .lock()
                .pop_front()
                .unwrap_or(Err(UpstreamError::EmptyOutput))
        }
    }

    struct NoSleep;

    #[async_trait]
    impl Sleeper for NoSleep {
        async fn sleep(&self, _duration: Duration) {}
    }

    fn service(backend: Arc<ScriptedBackend>, max_requests: u32) -> FaceSwapService {
        let clock = Arc::new(ManualClock::new(0));
        let limiter = Arc::new(SlidingWindowLimiter::with_clock(
            max_requests,
            Duration::from_secs(60),
            clock,
        ));
        let executor = RetryExecutor::with_sleeper(
            RetryPolicy::new(3, Duration::from_millis(1000), 2.0),
            Arc::new(NoSleep),
        );
        FaceSwapService::new(limiter, executor, backend).with_transformations("/tr:w-600")
    }

    fn request(input: &str, swap: &str) -> FaceSwapRequest {
        FaceSwapRequest {
            input_image: Some(input.into()),
            swap_image: Some(swap.into()),
        }
    }

    fn server_error() -> UpstreamError {
        UpstreamError::Status {
            status: 503,
            body: "busy".into(),
        }
    }

    #[tokio::test]
    async fn test_swap_success_transforms_and_reports_status() {
        let backend = ScriptedBackend::with(vec![Ok(json!("https://replicate.delivery/out.png"))]);
        let service = service(backend.clone(), 2);

        let outcome = service.swap(request(REF_URL, USER_PHOTO)).await.unwrap();

        assert_eq!(outcome.url, "https://replicate.delivery/out.png");
        assert_eq!(outcome.rate_limit_status.remaining_requests, 1);

        let calls = backend.calls.lock();
        assert_eq!(calls.len(), 1);
        assert_eq!(
            calls[0].input_image,
            "https://ik.imagekit.io/demo/Reference/look.jpg/tr:w-600"
        );
        assert_eq!(calls[0].swap_image, USER_PHOTO);
    }

    #[tokio::test]
    async fn test_empty_reference_is_rejected_before_admission() {
        let backend = ScriptedBackend::with(vec![]);
        let service = service(backend.clone(), 2);

        let err = service.swap(request("", USER_PHOTO)).await.unwrap_err();
        assert!(matches!(err, FaceSwapError::MissingImages));

        let err = service.swap(request("not a url", USER_PHOTO)).await.unwrap_err();
        assert!(matches!(err, FaceSwapError::InvalidImage { field: "inputImage", .. }));

        assert_eq!(service.limiter().status().remaining_requests, 2);
        assert!(backend.calls.lock().is_empty());
    }

    #[tokio::test]
    async fn test_missing_field_is_rejected() {
        let service = service(ScriptedBackend::with(vec![]), 2);
        let err = service
            .swap(FaceSwapRequest {
                input_image: Some(REF_URL.into()),
                swap_image: None,
            })
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Both inputImage and swapImage are required");
    }

    #[tokio::test]
    async fn test_quota_exhaustion_skips_upstream() {
        let backend = ScriptedBackend::with(vec![Ok(json!("https://replicate.delivery/1.png"))]);
        let service = service(backend.clone(), 1);

        service.swap(request(REF_URL, USER_PHOTO)).await.unwrap();
        let err = service.swap(request(REF_URL, USER_PHOTO)).await.unwrap_err();

        match err {
            FaceSwapError::RateLimited { status } => {
                assert_eq!(status.remaining_requests, 0);
                assert_eq!(status.max_requests, 1);
                assert_eq!(status.reset_time, Some(60_000));
            }
            other => panic!("expected rate limit, got {:?}", other),
        }
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_non_idempotent_call_is_not_retried() {
        let backend = ScriptedBackend::with(vec![
            Err(server_error()),
            Ok(json!("https://replicate.delivery/late.png")),
        ]);
        let service = service(backend.clone(), 2);

        let err = service.swap(request(REF_URL, USER_PHOTO)).await.unwrap_err();

        assert!(matches!(
            err,
            FaceSwapError::Upstream(UpstreamError::Status { status: 503, .. })
        ));
        assert_eq!(backend.calls.lock().len(), 1);
    }

    #[tokio::test]
    async fn test_idempotent_call_retries_transient_errors() {
        let backend = ScriptedBackend::with(vec![
            Err(server_error()),
            Ok(json!({ "url": "https://replicate.delivery/late.png" })),
        ]);
        let service = service(backend.clone(), 2).with_call_safety(CallSafety::Idempotent);

        let outcome = service.swap(request(REF_URL, USER_PHOTO)).await.unwrap();

        assert_eq!(outcome.url, "https://replicate.delivery/late.png");
        assert_eq!(backend.calls.lock().len(), 2);
        // One admission covers all attempts
        assert_eq!(outcome.rate_limit_status.remaining_requests, 1);
    }

    #[tokio::test]
    async fn test_bad_output_is_an_upstream_failure() {
        let backend = ScriptedBackend::with(vec![Ok(json!({ "status": "done" }))]);
        let service = service(backend, 2);

        let err = service.swap(request(REF_URL, USER_PHOTO)).await.unwrap_err();
        assert!(matches!(err, FaceSwapError::Upstream(UpstreamError::UnexpectedOutput(_))));
        assert_eq!(err.to_string(), "There is issue creating StyleCard - Please try later.");
    }

    #[tokio::test]
    async fn test_unavailable_service_reports_reason() {
        let limiter = Arc::new(SlidingWindowLimiter::new(2, Duration::from_secs(60)));
        let service = FaceSwapService::unavailable(
            limiter.clone(),
            RetryExecutor::default(),
            "Replicate API token is not configured",
        );

        let err = service.swap(request(REF_URL, USER_PHOTO)).await.unwrap_err();
        assert_eq!(err.to_string(), "Replicate API token is not configured");
        assert_eq!(limiter.status().remaining_requests, 2);
    }

    #[test]
    fn test_from_config_without_token_is_unavailable() {
        let service = FaceSwapService::from_config(&StylecardConfig::default()).unwrap();
        assert!(service.backend.is_err());
        assert_eq!(service.call_safety, CallSafety::NonIdempotent);
        assert_eq!(service.limiter().max_requests(), 2);
        assert_eq!(service.limiter().window(), Duration::from_secs(60));
    }
}
