//! HTTP(S) GET/POST sources.

use std::collections::BTreeMap;
use std::sync::Arc;

use reqwest::Url;
use tracing::{debug, warn};

use crate::cache::FingerprintBuilder;
use crate::config::WebSettings;
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList, ErrorRecord};
use crate::http_client::{HttpClient, HttpRequest, HttpResponse};
use crate::params::ParamSet;
use crate::retry::RetryPolicy;
use crate::source::SourceKind;
use crate::BoxFuture;

use super::{Payload, SourceDriver};

/// Validated web request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WebRequest {
    /// URL as the caller wrote it; used in error records.
    pub original_url: String,
    /// URL with query parameters applied.
    pub url: String,
    pub headers: BTreeMap<String, String>,
    /// Body for a POST; `None` issues a GET.
    pub post_data: Option<String>,
}

impl WebRequest {
    pub fn from_params(params: &ParamSet, settings: &WebSettings) -> Result<Self, ErrorList> {
        let mut errors = ErrorList::new();
        let original_url = params.require("url", &mut errors);
        let query = params.map("query").unwrap_or_default();
        let headers = params.map("headers").unwrap_or_default();
        let post_data = params.text("post data").map(str::to_owned);

        let url = original_url
            .as_deref()
            .and_then(|url| validate_url(url, &query, settings, &mut errors));

        match (original_url, url) {
            (Some(original_url), Some(url)) if errors.is_empty() => Ok(Self {
                original_url,
                url,
                headers,
                post_data,
            }),
            _ => Err(errors),
        }
    }
}

/// Parse, check scheme and host, and append `query` pairs (URL-encoded).
pub(crate) fn validate_url(
    raw: &str,
    query: &BTreeMap<String, String>,
    settings: &WebSettings,
    errors: &mut ErrorList,
) -> Option<String> {
    let parsed = match Url::parse(raw) {
        Ok(parsed) => parsed,
        Err(error) => {
            errors.add(ErrorCode::InvalidParam, [raw.to_owned(), error.to_string()]);
            return None;
        }
    };

    if !matches!(parsed.scheme(), "http" | "https") {
        errors.add(
            ErrorCode::InvalidParam,
            [raw.to_owned(), format!("unsupported scheme {}", parsed.scheme())],
        );
        return None;
    }

    let host = parsed.host_str().unwrap_or_default();
    if !settings.host_allowed(host) {
        errors.add(ErrorCode::HostNotAllowed, [host]);
        return None;
    }

    if query.is_empty() {
        return Some(parsed.to_string());
    }

    let encoded = query
        .iter()
        .map(|(key, value)| {
            format!(
                "{}={}",
                urlencoding::encode(key),
                urlencoding::encode(value)
            )
        })
        .collect::<Vec<_>>()
        .join("&");
    let separator = if parsed.query().is_some() { '&' } else { '?' };
    Some(format!("{parsed}{separator}{encoded}"))
}

/// Run `request` up to `policy.attempts` times.
///
/// Every failed attempt contributes one detailed record (a passthrough
/// record from the transport, `url.http_status`, or `url.fetch_failed`).
/// When all attempts fail, the umbrella `url.not_fetched` record is
/// prepended, but only if this context has not emitted it already.
pub(crate) async fn fetch_with_retry(
    client: &dyn HttpClient,
    request: HttpRequest,
    policy: &RetryPolicy,
    ctx: &CallContext,
    original_url: &str,
) -> Result<HttpResponse, ErrorList> {
    let mut details = ErrorList::new();
    let attempts = policy.attempts.max(1);

    for attempt in 0..attempts {
        if attempt > 0 {
            tokio::time::sleep(policy.delay_before(attempt - 1)).await;
        }
        debug!(url = %original_url, attempt, "fetching");

        match client.execute(request.clone()).await {
            Ok(response) if response.is_success() => return Ok(response),
            Ok(response) => {
                warn!(url = %original_url, attempt, status = response.status, "non-success status");
                details.add(
                    ErrorCode::HttpStatus,
                    [original_url.to_owned(), response.status.to_string()],
                );
                if !policy.should_retry_status(response.status) {
                    break;
                }
            }
            Err(error) => {
                warn!(url = %original_url, attempt, error = %error, "transport failure");
                details.push(error.record().cloned().unwrap_or_else(|| {
                    ErrorRecord::new(
                        ErrorCode::UrlFetchFailed,
                        [original_url.to_owned(), error.message().to_owned()],
                    )
                }));
                if !error.retryable() {
                    break;
                }
            }
        }
    }

    let mut errors = ErrorList::new();
    if ctx.claim_umbrella() {
        errors.add(ErrorCode::UrlNotFetched, [original_url]);
    }
    errors.merge(details);
    Err(errors)
}

pub struct WebDriver {
    request: WebRequest,
    client: Arc<dyn HttpClient>,
    settings: WebSettings,
}

impl WebDriver {
    pub fn new(request: WebRequest, client: Arc<dyn HttpClient>, settings: WebSettings) -> Self {
        Self {
            request,
            client,
            settings,
        }
    }

    fn http_request(&self) -> HttpRequest {
        let request = match &self.request.post_data {
            Some(body) => HttpRequest::post(&self.request.url)
                .with_header("content-type", "application/x-www-form-urlencoded")
                .with_body(body.clone()),
            None => HttpRequest::get(&self.request.url),
        };
        request
            .with_headers(&self.settings.headers)
            .with_headers(&self.request.headers)
            .with_timeout_ms(self.settings.timeout_ms)
    }
}

impl SourceDriver for WebDriver {
    fn kind(&self) -> SourceKind {
        SourceKind::Web
    }

    fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        builder.field("url", &self.request.url);
        if let Some(body) = &self.request.post_data {
            builder.field("post", body);
        }
    }

    fn connect<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>> {
        Box::pin(async { Ok(()) })
    }

    fn fetch<'a>(&'a mut self, ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>> {
        Box::pin(async move {
            let policy = self.settings.retry_policy();
            let response = fetch_with_retry(
                self.client.as_ref(),
                self.http_request(),
                &policy,
                ctx,
                &self.request.original_url,
            )
            .await?;

            Ok(Payload::Text {
                content_type: response.content_type().map(str::to_owned),
                body: response.body,
                format_hint: None,
            })
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>> {
        Box::pin(async { Ok(()) })
    }
}
