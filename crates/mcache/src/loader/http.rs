use async_trait::async_trait;
use futures::StreamExt;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE, ETAG, HeaderMap, LAST_MODIFIED, RANGE};
use reqwest::{Client, StatusCode};
use tracing::{debug, info, instrument};

use super::{LoadRequest, LoadResponse, Loader};
use crate::client::create_client;
use crate::error::{CacheError, Result};
use crate::range::{parse_content_range, range_header};
use crate::CacheConfig;

/// Loader fetching spans with HTTP range requests.
#[derive(Debug, Clone)]
pub struct HttpLoader {
    client: Client,
}

impl HttpLoader {
    pub fn new(config: &CacheConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

/// Validator of a response: the ETag when present, Last-Modified otherwise.
pub(crate) fn extract_validator(headers: &HeaderMap) -> Option<String> {
    headers
        .get(ETAG)
        .or_else(|| headers.get(LAST_MODIFIED))
        .and_then(|v| v.to_str().ok())
        .map(|s| s.to_string())
}

fn header_str<'a>(headers: &'a HeaderMap, name: reqwest::header::HeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

/// Total length from an unsatisfied-range answer (`bytes */1000`).
fn unsatisfied_total(headers: &HeaderMap) -> Option<u64> {
    header_str(headers, CONTENT_RANGE)?
        .trim()
        .strip_prefix("bytes */")?
        .trim()
        .parse()
        .ok()
}

/// Reject a response whose validator differs from the expected one.
///
/// Origins that stop sending a validator are given the benefit of the doubt.
pub(crate) fn check_validator(expected: Option<&str>, actual: Option<&str>) -> Result<()> {
    match (expected, actual) {
        (Some(expected), Some(actual)) if expected != actual => Err(CacheError::ValidatorMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }),
        _ => Ok(()),
    }
}

#[async_trait]
impl Loader for HttpLoader {
    #[instrument(skip(self, request), fields(url = %request.url, offset = request.span.offset, length = ?request.span.length), level = "debug")]
    async fn load(&self, request: LoadRequest) -> Result<LoadResponse> {
        let response = self
            .client
            .get(request.url.clone())
            .header(RANGE, range_header(&request.span))
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers();

        let (offset, total_length) = match status {
            StatusCode::PARTIAL_CONTENT => {
                let content_range = header_str(headers, CONTENT_RANGE)
                    .and_then(parse_content_range)
                    .ok_or_else(|| {
                        CacheError::protocol("206 response without a valid Content-Range")
                    })?;
                if content_range.start != request.span.offset {
                    return Err(CacheError::protocol(format!(
                        "origin answered range starting at {} for a request at {}",
                        content_range.start, request.span.offset
                    )));
                }
                (content_range.start, content_range.total)
            }
            StatusCode::OK => {
                // Origin ignored the Range header and sent the whole body.
                if request.span.offset != 0 {
                    return Err(CacheError::protocol(format!(
                        "origin does not support range requests (asked for offset {})",
                        request.span.offset
                    )));
                }
                (0, response.content_length())
            }
            StatusCode::RANGE_NOT_SATISFIABLE => {
                return Err(match unsatisfied_total(headers) {
                    Some(total) => CacheError::OutOfRange {
                        offset: request.span.offset,
                        content_length: total,
                    },
                    None => CacheError::protocol("origin rejected the range without a length"),
                });
            }
            status => {
                return Err(CacheError::Network(format!(
                    "origin returned status {status} for {}",
                    request.url
                )));
            }
        };

        let validator = extract_validator(headers);
        check_validator(request.validator.as_deref(), validator.as_deref())?;

        let content_type = header_str(headers, CONTENT_TYPE).map(|s| s.to_string());

        info!(
            url = %request.url,
            status = %status,
            offset,
            total_length = ?total_length,
            "Origin response received"
        );
        debug!(validator = ?validator, content_type = ?content_type, "Origin response metadata");

        let chunks = response
            .bytes_stream()
            .map(|chunk| chunk.map_err(CacheError::from))
            .boxed();

        Ok(LoadResponse {
            offset,
            total_length,
            validator,
            content_type,
            chunks,
        })
    }
}
