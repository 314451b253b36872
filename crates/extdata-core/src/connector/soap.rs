//! SOAP 1.1 remote procedure calls.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

use crate::cache::FingerprintBuilder;
use crate::config::WebSettings;
use crate::context::CallContext;
use crate::error::{ErrorCode, ErrorList};
use crate::http_client::{HttpClient, HttpRequest};
use crate::params::ParamSet;
use crate::parser::Format;
use crate::source::SourceKind;
use crate::BoxFuture;

use super::web::{fetch_with_retry, validate_url};
use super::{Payload, SourceDriver};

const DEFAULT_NAMESPACE: &str = "http://tempuri.org/";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SoapRequest {
    pub url: String,
    pub operation: String,
    pub namespace: String,
    /// Operation arguments, element name → text.
    pub arguments: BTreeMap<String, String>,
}

impl SoapRequest {
    pub fn from_params(params: &ParamSet, settings: &WebSettings) -> Result<Self, ErrorList> {
        let mut errors = ErrorList::new();
        let url = params.require("url", &mut errors);
        let operation = params.require("request", &mut errors);
        let namespace = params
            .text("namespace")
            .unwrap_or(DEFAULT_NAMESPACE)
            .to_owned();
        let arguments = params.map("request data").unwrap_or_default();

        let url = url.and_then(|url| validate_url(&url, &BTreeMap::new(), settings, &mut errors));
        if let Some(operation) = &operation {
            if !is_xml_name(operation) {
                errors.add(ErrorCode::InvalidParam, ["request", operation.as_str()]);
            }
        }
        for name in arguments.keys().filter(|name| !is_xml_name(name)) {
            errors.add(ErrorCode::InvalidParam, ["request data", name.as_str()]);
        }

        match (url, operation) {
            (Some(url), Some(operation)) if errors.is_empty() => Ok(Self {
                url,
                operation,
                namespace,
                arguments,
            }),
            _ => Err(errors),
        }
    }

    pub fn envelope(&self) -> String {
        let mut body = String::new();
        for (name, value) in &self.arguments {
            let _ = write!(body, "<{name}>{}</{name}>", escape_xml(value));
        }
        format!(
            "<?xml version=\"1.0\" encoding=\"utf-8\"?>\
             <soap:Envelope xmlns:soap=\"http://schemas.xmlsoap.org/soap/envelope/\">\
             <soap:Body><{op} xmlns=\"{ns}\">{body}</{op}></soap:Body></soap:Envelope>",
            op = self.operation,
            ns = escape_xml(&self.namespace),
        )
    }

    pub fn action(&self) -> String {
        let separator = if self.namespace.ends_with('/') { "" } else { "/" };
        format!("\"{}{separator}{}\"", self.namespace, self.operation)
    }
}

fn is_xml_name(name: &str) -> bool {
    let mut chars = name.chars();
    matches!(chars.next(), Some(first) if first.is_ascii_alphabetic() || first == '_')
        && chars.all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'))
}

fn escape_xml(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            other => escaped.push(other),
        }
    }
    escaped
}

pub struct SoapDriver {
    request: SoapRequest,
    client: Arc<dyn HttpClient>,
    settings: WebSettings,
}

impl SoapDriver {
    pub fn new(request: SoapRequest, client: Arc<dyn HttpClient>, settings: WebSettings) -> Self {
        Self {
            request,
            client,
            settings,
        }
    }
}

impl SourceDriver for SoapDriver {
    fn kind(&self) -> SourceKind {
        SourceKind::Soap
    }

    fn fingerprint(&self, builder: &mut FingerprintBuilder) {
        builder
            .field("url", &self.request.url)
            .field("operation", &self.request.operation)
            .field("namespace", &self.request.namespace);
        for (name, value) in &self.request.arguments {
            builder.field(name, value);
        }
    }

    fn connect<'a>(&'a mut self, _ctx: &'a CallContext) -> BoxFuture<'a, Result<(), ErrorList>> {
        Box::pin(async { Ok(()) })
    }

    fn fetch<'a>(&'a mut self, ctx: &'a CallContext) -> BoxFuture<'a, Result<Payload, ErrorList>> {
        Box::pin(async move {
            let request = HttpRequest::post(&self.request.url)
                .with_headers(&self.settings.headers)
                .with_header("content-type", "text/xml; charset=utf-8")
                .with_header("soapaction", self.request.action())
                .with_body(self.request.envelope())
                .with_timeout_ms(self.settings.timeout_ms);
            let policy = self.settings.retry_policy();
            let response = fetch_with_retry(
                self.client.as_ref(),
                request,
                &policy,
                ctx,
                &self.request.url,
            )
            .await?;

            Ok(Payload::Text {
                content_type: response.content_type().map(str::to_owned),
                body: response.body,
                format_hint: Some(Format::Xml),
            })
        })
    }

    fn disconnect(&mut self) -> BoxFuture<'_, Result<(), ErrorList>> {
        Box::pin(async { Ok(()) })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> SoapRequest {
        let params = ParamSet::new()
            .with("url", "https://soap.example.org/service")
            .with("request", "GetPrice")
            .with("namespace", "urn:shop")
            .with("requestData", "item=a<b, qty=2");
        SoapRequest::from_params(&params, &WebSettings::default()).expect("valid")
    }

    #[test]
    fn envelope_escapes_values() {
        let envelope = request().envelope();
        assert!(envelope.contains("<GetPrice xmlns=\"urn:shop\">"));
        assert!(envelope.contains("<item>a&lt;b</item>"));
        assert!(envelope.contains("<qty>2</qty>"));
    }

    #[test]
    fn action_joins_namespace_and_operation() {
        assert_eq!(request().action(), "\"urn:shop/GetPrice\"");
    }

    #[test]
    fn invalid_names_are_rejected_one_by_one() {
        let params = ParamSet::new()
            .with("url", "https://soap.example.org/service")
            .with("request", "1bad")
            .with("request data", "ok=1, <x=2");
        let errors =
            SoapRequest::from_params(&params, &WebSettings::default()).expect_err("must fail");
        assert_eq!(errors.count(ErrorCode::InvalidParam), 2);
    }

    #[test]
    fn url_and_operation_are_required() {
        let errors = SoapRequest::from_params(&ParamSet::new(), &WebSettings::default())
            .expect_err("must fail");
        assert_eq!(errors.count(ErrorCode::NoParamSpecified), 2);
    }
}
