//! Typed request, response and trailer header blocks and their wire mapping.
//!
//! Parsing is total: malformed input never aborts the parse. Anything that
//! fails validation lands in an [`InvalidHeaders`] accumulator alongside the
//! best-effort record, so the caller can derive both the HTTP status and the
//! gRPC status to report from one consistent view.

use bytes::Bytes;
use http::header::{HeaderMap, HeaderValue};

use crate::compression::Coding;
use crate::error::CallError;
use crate::metadata::{decode_base64_lenient, CustomMetadata};
use crate::status::{
    Code, GrpcStatus, GRPC_MESSAGE_HEADER, GRPC_STATUS_DETAILS_HEADER, GRPC_STATUS_HEADER,
};
use crate::timeout::GrpcTimeout;

pub(crate) const CONTENT_TYPE_GRPC: &str = "application/grpc";

const TIMEOUT_HEADER: &str = "grpc-timeout";
const ENCODING_HEADER: &str = "grpc-encoding";
const ACCEPT_ENCODING_HEADER: &str = "grpc-accept-encoding";
const MESSAGE_TYPE_HEADER: &str = "grpc-message-type";
const TRACE_HEADER: &str = "grpc-trace-bin";

/// A header preserved verbatim: name plus raw wire value.
pub type RawHeader = (String, Bytes);

// ============================================================================
// Path
// ============================================================================

/// A service/method pair, rendered on the wire as `/<service>/<method>`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path {
    service: String,
    method: String,
}

impl Path {
    pub fn new(service: impl Into<String>, method: impl Into<String>) -> Result<Self, CallError> {
        let service = service.into();
        let method = method.into();
        let valid =
            |s: &str| !s.is_empty() && s.is_ascii() && !s.contains('/') && !s.contains(' ');
        if !valid(&service) || !valid(&method) {
            return Err(CallError::Protocol(format!(
                "invalid rpc path /{}/{}",
                service, method
            )));
        }
        Ok(Self { service, method })
    }

    /// Parses the `:path` pseudo-header form.
    pub fn parse(path: &str) -> Option<Self> {
        let rest = path.strip_prefix('/')?;
        let (service, method) = rest.split_once('/')?;
        Self::new(service, method).ok()
    }

    pub fn service(&self) -> &str {
        &self.service
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn full(&self) -> String {
        format!("/{}/{}", self.service, self.method)
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "/{}/{}", self.service, self.method)
    }
}

// ============================================================================
// Invalid-header accumulation
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum InvalidHeader {
    Invalid {
        /// The HTTP status this particular defect should be reported with,
        /// when one is more precise than the default 400.
        status: Option<http::StatusCode>,
        name: String,
        value: Bytes,
        reason: String,
    },
    Missing {
        name: &'static str,
    },
    Unexpected {
        name: String,
    },
}

/// Ordered accumulator of everything that failed header validation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InvalidHeaders {
    entries: Vec<InvalidHeader>,
}

impl InvalidHeaders {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[InvalidHeader] {
        &self.entries
    }

    fn push_invalid(
        &mut self,
        status: Option<http::StatusCode>,
        name: &str,
        value: &[u8],
        reason: impl Into<String>,
    ) {
        self.entries.push(InvalidHeader::Invalid {
            status,
            name: name.to_string(),
            value: Bytes::copy_from_slice(value),
            reason: reason.into(),
        });
    }

    fn push_missing(&mut self, name: &'static str) {
        self.entries.push(InvalidHeader::Missing { name });
    }

    /// The HTTP status to reply with: the first entry carrying one, else 400.
    pub fn http_status(&self) -> http::StatusCode {
        self.entries
            .iter()
            .find_map(|entry| match entry {
                InvalidHeader::Invalid {
                    status: Some(status),
                    ..
                } => Some(*status),
                _ => None,
            })
            .unwrap_or(http::StatusCode::BAD_REQUEST)
    }

    /// The gRPC status for the Trailers-Only reply this accumulator causes.
    pub fn to_grpc_status(&self) -> GrpcStatus {
        let code = if self.http_status() == http::StatusCode::UNSUPPORTED_MEDIA_TYPE {
            Code::Unimplemented
        } else {
            Code::InvalidArgument
        };
        let reason = self
            .entries
            .iter()
            .map(|entry| match entry {
                InvalidHeader::Invalid { name, reason, .. } => format!("{}: {}", name, reason),
                InvalidHeader::Missing { name } => format!("missing header {}", name),
                InvalidHeader::Unexpected { name } => format!("unexpected header {}", name),
            })
            .collect::<Vec<_>>()
            .join("; ");
        GrpcStatus::new(code, reason)
    }
}

// ============================================================================
// Header records
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq)]
pub struct RequestHeaders {
    pub timeout: Option<GrpcTimeout>,
    /// `content-type` suffix: `None` for bare `application/grpc`,
    /// `Some("proto")` for `application/grpc+proto`, and so on.
    pub format: Option<String>,
    pub encoding: Option<Coding>,
    pub accept_encoding: Option<Vec<Coding>>,
    pub message_type: Option<String>,
    pub user_agent: Option<String>,
    /// Decoded `grpc-trace-bin` payload.
    pub trace_context: Option<Bytes>,
    pub metadata: Vec<CustomMetadata>,
    pub unrecognized: Vec<RawHeader>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHeaders {
    pub format: Option<String>,
    pub encoding: Option<Coding>,
    pub accept_encoding: Option<Vec<Coding>>,
    pub metadata: Vec<CustomMetadata>,
    pub unrecognized: Vec<RawHeader>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Trailers {
    pub status: Code,
    pub message: Option<String>,
    /// Raw `grpc-status-details-bin` payload, carried opaquely.
    pub details: Option<Bytes>,
    pub metadata: Vec<CustomMetadata>,
    pub unrecognized: Vec<RawHeader>,
}

impl Default for Trailers {
    fn default() -> Self {
        Self::ok()
    }
}

impl Trailers {
    pub fn ok() -> Self {
        Self {
            status: Code::Ok,
            message: None,
            details: None,
            metadata: Vec::new(),
            unrecognized: Vec::new(),
        }
    }

    pub fn from_status(status: &GrpcStatus) -> Self {
        Self {
            status: status.code(),
            message: status.message().map(str::to_owned),
            details: status.details().cloned(),
            metadata: status.metadata().to_vec(),
            unrecognized: Vec::new(),
        }
    }

    pub fn to_status(&self) -> GrpcStatus {
        let mut status = match &self.message {
            Some(message) => GrpcStatus::new(self.status, message.clone()),
            None => GrpcStatus::with_code(self.status),
        };
        if let Some(details) = &self.details {
            status = status.with_details(details.clone());
        }
        status.with_metadata(self.metadata.clone())
    }
}

// ============================================================================
// Parsing
// ============================================================================

struct Recognized<'a> {
    name: &'a str,
    value: &'a [u8],
}

/// Iterates a `HeaderMap` as (name, value-bytes) pairs in insertion order.
fn entries(headers: &HeaderMap) -> impl Iterator<Item = Recognized<'_>> {
    headers.iter().map(|(name, value)| Recognized {
        name: name.as_str(),
        value: value.as_bytes(),
    })
}

fn parse_content_type(
    value: &[u8],
    invalid: &mut InvalidHeaders,
    format: &mut Option<String>,
    seen: &mut bool,
) {
    if std::mem::replace(seen, true) {
        invalid.push_invalid(None, http::header::CONTENT_TYPE.as_str(), value, "duplicate");
        return;
    }
    let text = String::from_utf8_lossy(value);
    if text.as_ref() == CONTENT_TYPE_GRPC {
        return;
    }
    match text.strip_prefix("application/grpc+") {
        Some(suffix) if !suffix.is_empty() => *format = Some(suffix.to_string()),
        _ => invalid.push_invalid(
            Some(http::StatusCode::UNSUPPORTED_MEDIA_TYPE),
            http::header::CONTENT_TYPE.as_str(),
            value,
            "not a gRPC content-type",
        ),
    }
}

fn parse_accept_encoding(value: &[u8], out: &mut Option<Vec<Coding>>) {
    let text = String::from_utf8_lossy(value);
    let list = out.get_or_insert_with(Vec::new);
    for name in text.split(',') {
        let name = name.trim();
        if !name.is_empty() {
            list.push(Coding::parse(name));
        }
    }
}

/// Shared tail of all three parsers: custom metadata and unrecognized
/// `grpc-*` headers.
fn parse_common(
    name: &str,
    value: &[u8],
    metadata: &mut Vec<CustomMetadata>,
    unrecognized: &mut Vec<RawHeader>,
    invalid: &mut InvalidHeaders,
) {
    if name.starts_with("grpc-") {
        unrecognized.push((name.to_string(), Bytes::copy_from_slice(value)));
        return;
    }
    match CustomMetadata::from_wire(name, value) {
        Ok(entry) => metadata.push(entry),
        Err(err) => invalid.push_invalid(None, name, value, err.to_string()),
    }
}

pub fn parse_request_headers(headers: &HeaderMap) -> (RequestHeaders, InvalidHeaders) {
    let mut out = RequestHeaders::default();
    let mut invalid = InvalidHeaders::default();
    let mut saw_content_type = false;

    for Recognized { name, value } in entries(headers) {
        match name {
            "content-type" => {
                parse_content_type(value, &mut invalid, &mut out.format, &mut saw_content_type)
            }
            "te" => {
                if value != b"trailers" {
                    invalid.push_invalid(None, name, value, "te must be \"trailers\"");
                }
            }
            TIMEOUT_HEADER => match GrpcTimeout::parse(value) {
                Some(timeout) if out.timeout.is_none() => out.timeout = Some(timeout),
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
                None => invalid.push_invalid(None, name, value, "malformed timeout"),
            },
            ENCODING_HEADER => match &out.encoding {
                None => out.encoding = Some(Coding::parse(&String::from_utf8_lossy(value))),
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
            },
            ACCEPT_ENCODING_HEADER => parse_accept_encoding(value, &mut out.accept_encoding),
            MESSAGE_TYPE_HEADER => match &out.message_type {
                None => out.message_type = Some(String::from_utf8_lossy(value).into_owned()),
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
            },
            "user-agent" => match &out.user_agent {
                None => out.user_agent = Some(String::from_utf8_lossy(value).into_owned()),
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
            },
            TRACE_HEADER => match decode_base64_lenient(value) {
                Some(decoded) if out.trace_context.is_none() => {
                    out.trace_context = Some(Bytes::from(decoded))
                }
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
                None => invalid.push_invalid(None, name, value, "invalid base64"),
            },
            _ => parse_common(
                name,
                value,
                &mut out.metadata,
                &mut out.unrecognized,
                &mut invalid,
            ),
        }
    }

    if !saw_content_type {
        invalid.push_missing("content-type");
    }
    (out, invalid)
}

pub fn parse_response_headers(headers: &HeaderMap) -> (ResponseHeaders, InvalidHeaders) {
    let mut out = ResponseHeaders::default();
    let mut invalid = InvalidHeaders::default();
    let mut saw_content_type = false;

    for Recognized { name, value } in entries(headers) {
        match name {
            "content-type" => {
                parse_content_type(value, &mut invalid, &mut out.format, &mut saw_content_type)
            }
            ENCODING_HEADER => match &out.encoding {
                None => out.encoding = Some(Coding::parse(&String::from_utf8_lossy(value))),
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
            },
            ACCEPT_ENCODING_HEADER => parse_accept_encoding(value, &mut out.accept_encoding),
            _ => parse_common(
                name,
                value,
                &mut out.metadata,
                &mut out.unrecognized,
                &mut invalid,
            ),
        }
    }

    if !saw_content_type {
        invalid.push_missing("content-type");
    }
    (out, invalid)
}

pub fn parse_trailers(headers: &HeaderMap) -> (Trailers, InvalidHeaders) {
    let mut out = Trailers::ok();
    let mut invalid = InvalidHeaders::default();
    let mut saw_status = false;

    for Recognized { name, value } in entries(headers) {
        match name {
            GRPC_STATUS_HEADER => match Code::from_bytes(value) {
                Some(code) if !saw_status => {
                    out.status = code;
                    saw_status = true;
                }
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
                None => invalid.push_invalid(None, name, value, "malformed status code"),
            },
            GRPC_MESSAGE_HEADER => match &out.message {
                None => out.message = Some(GrpcStatus::decode_message(value)),
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
            },
            GRPC_STATUS_DETAILS_HEADER => match decode_base64_lenient(value) {
                Some(decoded) if out.details.is_none() => out.details = Some(Bytes::from(decoded)),
                Some(_) => invalid.push_invalid(None, name, value, "duplicate"),
                None => invalid.push_invalid(None, name, value, "invalid base64"),
            },
            // Trailers-Only blocks carry the response headers too; accept
            // them silently so one parser serves both shapes.
            "content-type" | ENCODING_HEADER | ACCEPT_ENCODING_HEADER => {}
            _ => parse_common(
                name,
                value,
                &mut out.metadata,
                &mut out.unrecognized,
                &mut invalid,
            ),
        }
    }

    if !saw_status {
        invalid.push_missing(GRPC_STATUS_HEADER);
        out.status = Code::Unknown;
    }
    (out, invalid)
}

// ============================================================================
// Serialization
// ============================================================================

fn append_raw(map: &mut HeaderMap, name: &str, value: &[u8]) -> Result<(), CallError> {
    let name = http::header::HeaderName::from_bytes(name.as_bytes())
        .map_err(|err| CallError::Protocol(format!("header name {:?}: {}", name, err)))?;
    let value = HeaderValue::from_bytes(value)
        .map_err(|err| CallError::Protocol(format!("header value for {}: {}", name, err)))?;
    map.append(name, value);
    Ok(())
}

fn append_str(map: &mut HeaderMap, name: &str, value: &str) -> Result<(), CallError> {
    append_raw(map, name, value.as_bytes())
}

fn append_metadata(map: &mut HeaderMap, metadata: &[CustomMetadata]) -> Result<(), CallError> {
    for entry in metadata {
        append_raw(map, entry.name().as_str(), &entry.wire_value())?;
    }
    Ok(())
}

fn append_unrecognized(map: &mut HeaderMap, unrecognized: &[RawHeader]) -> Result<(), CallError> {
    for (name, value) in unrecognized {
        append_raw(map, name, value)?;
    }
    Ok(())
}

fn content_type_value(format: &Option<String>) -> String {
    match format {
        Some(format) => format!("{}+{}", CONTENT_TYPE_GRPC, format),
        None => CONTENT_TYPE_GRPC.to_string(),
    }
}

fn accept_encoding_header(codings: &[Coding]) -> String {
    codings
        .iter()
        .map(Coding::name)
        .collect::<Vec<_>>()
        .join(",")
}

pub fn serialize_request_headers(headers: &RequestHeaders) -> Result<HeaderMap, CallError> {
    let mut map = HeaderMap::new();
    append_str(&mut map, "content-type", &content_type_value(&headers.format))?;
    append_str(&mut map, "te", "trailers")?;
    if let Some(timeout) = &headers.timeout {
        append_str(&mut map, TIMEOUT_HEADER, &timeout.to_header_value())?;
    }
    if let Some(encoding) = &headers.encoding {
        append_str(&mut map, ENCODING_HEADER, encoding.name())?;
    }
    if let Some(accept) = &headers.accept_encoding {
        append_str(&mut map, ACCEPT_ENCODING_HEADER, &accept_encoding_header(accept))?;
    }
    if let Some(message_type) = &headers.message_type {
        append_str(&mut map, MESSAGE_TYPE_HEADER, message_type)?;
    }
    if let Some(user_agent) = &headers.user_agent {
        append_str(&mut map, "user-agent", user_agent)?;
    }
    if let Some(trace) = &headers.trace_context {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(trace);
        append_str(&mut map, TRACE_HEADER, &encoded)?;
    }
    append_metadata(&mut map, &headers.metadata)?;
    append_unrecognized(&mut map, &headers.unrecognized)?;
    Ok(map)
}

pub fn serialize_response_headers(headers: &ResponseHeaders) -> Result<HeaderMap, CallError> {
    let mut map = HeaderMap::new();
    append_str(&mut map, "content-type", &content_type_value(&headers.format))?;
    if let Some(encoding) = &headers.encoding {
        append_str(&mut map, ENCODING_HEADER, encoding.name())?;
    }
    if let Some(accept) = &headers.accept_encoding {
        append_str(&mut map, ACCEPT_ENCODING_HEADER, &accept_encoding_header(accept))?;
    }
    append_metadata(&mut map, &headers.metadata)?;
    append_unrecognized(&mut map, &headers.unrecognized)?;
    Ok(map)
}

pub fn serialize_trailers(trailers: &Trailers) -> Result<HeaderMap, CallError> {
    let mut map = HeaderMap::new();
    append_str(&mut map, GRPC_STATUS_HEADER, &trailers.status.value().to_string())?;
    if let Some(message) = &trailers.message {
        append_str(&mut map, GRPC_MESSAGE_HEADER, &GrpcStatus::encode_message(message))?;
    }
    if let Some(details) = &trailers.details {
        use base64::Engine;
        let encoded = base64::engine::general_purpose::STANDARD_NO_PAD.encode(details);
        append_str(&mut map, GRPC_STATUS_DETAILS_HEADER, &encoded)?;
    }
    append_metadata(&mut map, &trailers.metadata)?;
    append_unrecognized(&mut map, &trailers.unrecognized)?;
    Ok(map)
}

/// The single header block of a Trailers-Only response: the response headers
/// and the trailers combined.
pub fn serialize_trailers_only(
    headers: &ResponseHeaders,
    trailers: &Trailers,
) -> Result<HeaderMap, CallError> {
    let mut map = serialize_response_headers(headers)?;
    for (name, value) in serialize_trailers(trailers)? {
        if let Some(name) = name {
            map.append(name, value);
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn request_fixture() -> RequestHeaders {
        RequestHeaders {
            timeout: Some(GrpcTimeout::new(Duration::from_secs(5))),
            format: Some("proto".into()),
            encoding: Some(Coding::Gzip),
            accept_encoding: Some(vec![Coding::Identity, Coding::Gzip]),
            message_type: Some("pkg.Message".into()),
            user_agent: Some("hibari-test/0.1".into()),
            trace_context: Some(Bytes::from_static(&[0x00, 0xff])),
            metadata: vec![
                CustomMetadata::ascii("x-request-id", "abc-123").unwrap(),
                CustomMetadata::binary("trace-bin", vec![1, 2, 3]).unwrap(),
            ],
            unrecognized: vec![("grpc-previous-rpc-attempts".into(), Bytes::from_static(b"2"))],
        }
    }

    #[test]
    fn test_request_round_trip() {
        let headers = request_fixture();
        let map = serialize_request_headers(&headers).unwrap();
        let (parsed, invalid) = parse_request_headers(&map);
        assert!(invalid.is_empty(), "{:?}", invalid);
        assert_eq!(parsed, headers);
    }

    #[test]
    fn test_response_round_trip() {
        let headers = ResponseHeaders {
            format: None,
            encoding: Some(Coding::Identity),
            accept_encoding: Some(vec![Coding::Gzip]),
            metadata: vec![CustomMetadata::ascii("x-served-by", "unit-test").unwrap()],
            unrecognized: Vec::new(),
        };
        let map = serialize_response_headers(&headers).unwrap();
        let (parsed, invalid) = parse_response_headers(&map);
        assert!(invalid.is_empty(), "{:?}", invalid);
        assert_eq!(parsed, headers);
    }

    #[test]
    fn test_trailers_round_trip() {
        let trailers = Trailers {
            status: Code::NotFound,
            message: Some("no such key: \"a b\"".into()),
            details: Some(Bytes::from_static(&[9, 8, 7])),
            metadata: vec![CustomMetadata::ascii("x-retries", "3").unwrap()],
            unrecognized: Vec::new(),
        };
        let map = serialize_trailers(&trailers).unwrap();
        let (parsed, invalid) = parse_trailers(&map);
        assert!(invalid.is_empty(), "{:?}", invalid);
        assert_eq!(parsed, trailers);
    }

    #[test]
    fn test_missing_content_type_accumulates() {
        let map = HeaderMap::new();
        let (_, invalid) = parse_request_headers(&map);
        assert!(!invalid.is_empty());
        assert_eq!(invalid.http_status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_wrong_content_type_maps_to_415() {
        let mut map = HeaderMap::new();
        map.insert("content-type", "text/html".parse().unwrap());
        let (_, invalid) = parse_request_headers(&map);
        assert_eq!(
            invalid.http_status(),
            http::StatusCode::UNSUPPORTED_MEDIA_TYPE
        );
        assert_eq!(invalid.to_grpc_status().code(), Code::Unimplemented);
    }

    #[test]
    fn test_invalid_custom_metadata_accumulates() {
        let mut map = HeaderMap::new();
        map.insert("content-type", CONTENT_TYPE_GRPC.parse().unwrap());
        // An uppercase byte cannot appear in HeaderMap names, but a bad
        // base64 payload in a -bin header can.
        map.insert("data-bin", "!!!".parse().unwrap());
        let (parsed, invalid) = parse_request_headers(&map);
        assert!(parsed.metadata.is_empty());
        assert_eq!(invalid.entries().len(), 1);
        assert_eq!(invalid.http_status(), http::StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_unrecognized_grpc_headers_preserved() {
        let mut map = HeaderMap::new();
        map.insert("content-type", CONTENT_TYPE_GRPC.parse().unwrap());
        map.insert("grpc-something-new", "x".parse().unwrap());
        let (parsed, invalid) = parse_request_headers(&map);
        assert!(invalid.is_empty());
        assert_eq!(
            parsed.unrecognized,
            vec![("grpc-something-new".to_string(), Bytes::from_static(b"x"))]
        );

        let out = serialize_request_headers(&parsed).unwrap();
        assert_eq!(out.get("grpc-something-new").unwrap(), "x");
    }

    #[test]
    fn test_trailers_missing_status() {
        let map = HeaderMap::new();
        let (parsed, invalid) = parse_trailers(&map);
        assert_eq!(parsed.status, Code::Unknown);
        assert!(matches!(
            invalid.entries()[0],
            InvalidHeader::Missing { name: "grpc-status" }
        ));
    }

    #[test]
    fn test_trailers_only_combined_block() {
        let headers = ResponseHeaders::default();
        let trailers = Trailers::from_status(&GrpcStatus::unimplemented("missing method"));
        let map = serialize_trailers_only(&headers, &trailers).unwrap();
        assert_eq!(map.get("content-type").unwrap(), CONTENT_TYPE_GRPC);
        assert_eq!(map.get("grpc-status").unwrap(), "12");
        let (parsed, invalid) = parse_trailers(&map);
        assert!(invalid.is_empty());
        assert_eq!(parsed.status, Code::Unimplemented);
    }

    #[test]
    fn test_path_parse_and_render() {
        let path = Path::parse("/Greeter/SayHello").unwrap();
        assert_eq!(path.service(), "Greeter");
        assert_eq!(path.method(), "SayHello");
        assert_eq!(path.full(), "/Greeter/SayHello");

        assert!(Path::parse("Greeter/SayHello").is_none());
        assert!(Path::parse("/Greeter").is_none());
        assert!(Path::parse("//SayHello").is_none());
    }

    #[test]
    fn test_status_trailers_conversion() {
        let status = GrpcStatus::new(Code::NotFound, "nope")
            .with_metadata(vec![CustomMetadata::ascii("x-hint", "try-later").unwrap()]);
        let trailers = Trailers::from_status(&status);
        assert_eq!(trailers.to_status(), status);
    }
}
