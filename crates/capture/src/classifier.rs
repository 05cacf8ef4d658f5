use crate::browser::ResponseEvent;
use endpoint_protocol::{CaptureOptions, OmittedReason};
use regex::Regex;

const JSON_CONTENT_TYPES: [&str; 4] = [
    "application/json",
    "application/ld+json",
    "application/hal+json",
    "application/vnd.api+json",
];

const JSON_RESOURCE_TYPES: [&str; 2] = ["xhr", "fetch"];

/// What to do with one raw response observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Not kept; no record, no side effect.
    Drop(DropCause),
    /// Kept, but no body read is attempted.
    MetadataOnly(OmittedReason),
    /// Kept; read the body and continue down the pipeline.
    ReadBody,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropCause {
    CaptureCapReached,
    UrlFiltered,
    NotJsonLike,
    FailureStatus,
}

/// JSON-gating over resource type, content type, URL filters and status.
#[derive(Debug)]
pub struct ResponseClassifier {
    include: Option<Regex>,
    exclude: Option<Regex>,
    capture_all_json: bool,
    max_captures: u64,
    max_body_bytes: u64,
}

impl ResponseClassifier {
    pub fn from_options(options: &CaptureOptions) -> Result<Self, regex::Error> {
        Ok(Self {
            include: options.include_regex.as_deref().map(Regex::new).transpose()?,
            exclude: options.exclude_regex.as_deref().map(Regex::new).transpose()?,
            capture_all_json: options.capture_all_json,
            max_captures: options.max_captures,
            max_body_bytes: options.max_body_bytes,
        })
    }

    /// Does a content-type header claim one of the JSON media types?
    pub fn is_json_content_type(content_type: &str) -> bool {
        let lowered = content_type.to_ascii_lowercase();
        JSON_CONTENT_TYPES.iter().any(|json| lowered.contains(json))
    }

    /// Gate one observation. `persisted` is the number of records already
    /// persisted in this run, for the capture cap.
    pub fn classify(&self, event: &ResponseEvent, persisted: u64) -> Decision {
        if self.max_captures > 0 && persisted >= self.max_captures {
            return Decision::Drop(DropCause::CaptureCapReached);
        }

        if let Some(include) = &self.include {
            if !include.is_match(&event.url) {
                return Decision::Drop(DropCause::UrlFiltered);
            }
        }
        if let Some(exclude) = &self.exclude {
            if exclude.is_match(&event.url) {
                return Decision::Drop(DropCause::UrlFiltered);
            }
        }

        // Default mode keeps xhr/fetch traffic plus anything that claims a
        // JSON media type. captureAllJson lifts the resource-type gate and
        // lets the parse attempt be the judge.
        if !self.capture_all_json {
            let json_resource = JSON_RESOURCE_TYPES
                .contains(&event.resource_type.to_ascii_lowercase().as_str());
            if !json_resource && !Self::is_json_content_type(&event.content_type()) {
                return Decision::Drop(DropCause::NotJsonLike);
            }
        }

        if !(200..400).contains(&event.status) {
            return Decision::Drop(DropCause::FailureStatus);
        }

        if event.status == 204 || event.status == 304 {
            return Decision::MetadataOnly(OmittedReason::EmptyBody);
        }

        if let Some(declared) = event.content_length() {
            if declared > self.max_body_bytes {
                return Decision::MetadataOnly(OmittedReason::MaxBodyBytes);
            }
        }

        Decision::ReadBody
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::browser::{BrowserResult, ResponseBody};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Arc;

    struct NoBody;

    #[async_trait]
    impl ResponseBody for NoBody {
        async fn read(&self) -> BrowserResult<Vec<u8>> {
            Err("no body".into())
        }
    }

    fn event(url: &str, status: u16, resource_type: &str, content_type: &str) -> ResponseEvent {
        let mut response_headers = HashMap::new();
        if !content_type.is_empty() {
            response_headers.insert("content-type".to_string(), content_type.to_string());
        }
        ResponseEvent {
            url: url.into(),
            method: "GET".into(),
            status,
            resource_type: resource_type.into(),
            request_headers: HashMap::new(),
            response_headers,
            body: Arc::new(NoBody),
        }
    }

    fn classifier(options: &CaptureOptions) -> ResponseClassifier {
        ResponseClassifier::from_options(options).expect("valid options")
    }

    fn default_classifier() -> ResponseClassifier {
        classifier(&CaptureOptions::for_url("https://example.com"))
    }

    #[test]
    fn xhr_and_fetch_pass_the_default_gate() {
        let classifier = default_classifier();
        for resource_type in ["xhr", "fetch", "XHR"] {
            let decision =
                classifier.classify(&event("https://e.com/a", 200, resource_type, "text/plain"), 0);
            assert_eq!(decision, Decision::ReadBody, "resource {resource_type}");
        }
    }

    #[test]
    fn json_content_type_passes_regardless_of_resource_type() {
        let classifier = default_classifier();
        for content_type in [
            "application/json",
            "Application/JSON; charset=utf-8",
            "application/ld+json",
            "application/hal+json",
            "application/vnd.api+json",
        ] {
            let decision =
                classifier.classify(&event("https://e.com/a", 200, "document", content_type), 0);
            assert_eq!(decision, Decision::ReadBody, "content-type {content_type}");
        }
    }

    #[test]
    fn non_json_documents_are_dropped_by_default_but_not_in_capture_all_mode() {
        let page = event("https://e.com/page", 200, "document", "text/html");

        let decision = default_classifier().classify(&page, 0);
        assert_eq!(decision, Decision::Drop(DropCause::NotJsonLike));

        let mut options = CaptureOptions::for_url("https://example.com");
        options.capture_all_json = true;
        assert_eq!(classifier(&options).classify(&page, 0), Decision::ReadBody);
    }

    #[test]
    fn url_gates_apply_in_order() {
        let mut options = CaptureOptions::for_url("https://example.com");
        options.include_regex = Some("/api/".into());
        options.exclude_regex = Some("/api/internal".into());
        let classifier = classifier(&options);

        let kept = event("https://e.com/api/items", 200, "xhr", "application/json");
        assert_eq!(classifier.classify(&kept, 0), Decision::ReadBody);

        let not_included = event("https://e.com/static/app.js", 200, "xhr", "application/json");
        assert_eq!(
            classifier.classify(&not_included, 0),
            Decision::Drop(DropCause::UrlFiltered)
        );

        let excluded = event("https://e.com/api/internal/x", 200, "xhr", "application/json");
        assert_eq!(
            classifier.classify(&excluded, 0),
            Decision::Drop(DropCause::UrlFiltered)
        );
    }

    #[test]
    fn capture_cap_drops_before_anything_else() {
        let mut options = CaptureOptions::for_url("https://example.com");
        options.max_captures = 2;
        let classifier = classifier(&options);

        let kept = event("https://e.com/api/items", 200, "xhr", "application/json");
        assert_eq!(classifier.classify(&kept, 1), Decision::ReadBody);
        assert_eq!(
            classifier.classify(&kept, 2),
            Decision::Drop(DropCause::CaptureCapReached)
        );
    }

    #[test]
    fn failure_statuses_are_dropped() {
        let classifier = default_classifier();
        for status in [101, 404, 500] {
            let decision =
                classifier.classify(&event("https://e.com/a", status, "xhr", "application/json"), 0);
            assert_eq!(decision, Decision::Drop(DropCause::FailureStatus), "status {status}");
        }
    }

    #[test]
    fn empty_body_statuses_skip_the_body_read() {
        let classifier = default_classifier();
        for status in [204, 304] {
            let decision =
                classifier.classify(&event("https://e.com/a", status, "xhr", "application/json"), 0);
            assert_eq!(
                decision,
                Decision::MetadataOnly(OmittedReason::EmptyBody),
                "status {status}"
            );
        }
    }

    #[test]
    fn declared_oversize_bodies_are_never_read() {
        let mut options = CaptureOptions::for_url("https://example.com");
        options.max_body_bytes = 1024;
        let classifier = classifier(&options);

        let mut oversized = event("https://e.com/a", 200, "xhr", "application/json");
        oversized
            .response_headers
            .insert("content-length".into(), "4096".into());

        assert_eq!(
            classifier.classify(&oversized, 0),
            Decision::MetadataOnly(OmittedReason::MaxBodyBytes)
        );
    }
}
