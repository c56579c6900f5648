//! Converting a response into the template's declared return shape.

use crate::body::{BodyFormat, Serializer};
use crate::error::{RestError, RestResult};
use crate::exception::map_error;
use crate::response::HttpResponse;
use crate::template::{PageSpec, RequestTemplate, ReturnShape};
use bytes::Bytes;
use reqwest::header::{HeaderMap, CONTENT_TYPE};

/// A response converted per [`ReturnShape`].
#[derive(Debug)]
pub enum Decoded {
    Void,
    Boolean(bool),
    Bytes(Bytes),
    Value(serde_json::Value),
    /// The live response; its body is still on the connection.
    Stream(HttpResponse),
    Wrapped {
        status: u16,
        headers: HeaderMap,
        value: Box<Decoded>,
    },
    Page(RawPage),
}

/// The first page of a paged response, before item deserialization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawPage {
    pub items: Vec<serde_json::Value>,
    /// The next-page payload; `None` ends the sequence.
    pub next: Option<serde_json::Value>,
}

/// Validate the status and decode `response` per the template's return shape.
///
/// # Errors
///
/// An unexpected status yields the error chosen by the template's exception
/// mappings; see [`crate::exception`]. `BooleanFromStatus` operations never
/// fail on status.
pub async fn decode_response(
    template: &RequestTemplate,
    mut response: HttpResponse,
    serializer: &dyn Serializer,
) -> RestResult<Decoded> {
    let status = response.status();
    let shape = template.return_shape();

    if *shape.innermost() == ReturnShape::BooleanFromStatus {
        let exists = template.is_expected_status(status);
        response.release();
        tracing::debug!(status, exists, "decoded status as boolean");
        return Ok(wrap_if_needed(shape, status, response.headers(), Decoded::Boolean(exists)));
    }

    if !template.is_expected_status(status) {
        let headers = response.headers().clone();
        let body = response.bytes().await.unwrap_or_default();
        return Err(map_error(template.exception_mappings(), status, headers, &body));
    }

    let headers = match shape {
        ReturnShape::ResponseWrapper(_) => Some(response.headers().clone()),
        _ => None,
    };

    let decoded = match shape.innermost() {
        ReturnShape::Void => {
            response.drain().await?;
            Decoded::Void
        }
        ReturnShape::Bytes => Decoded::Bytes(response.bytes().await?),
        ReturnShape::DeserializedBody => {
            let format = response_format(template, &response);
            let bytes = response.bytes().await?;
            Decoded::Value(format.decode(&bytes, serializer)?)
        }
        ReturnShape::Stream => Decoded::Stream(response),
        ReturnShape::Paged(spec) => {
            let format = response_format(template, &response);
            let bytes = response.bytes().await?;
            Decoded::Page(extract_page(spec, format.decode(&bytes, serializer)?)?)
        }
        ReturnShape::BooleanFromStatus | ReturnShape::ResponseWrapper(_) => {
            unreachable!("innermost() strips wrappers and booleans return early")
        }
    };

    Ok(match headers {
        Some(headers) => Decoded::Wrapped {
            status,
            headers,
            value: Box::new(decoded),
        },
        None => decoded,
    })
}

fn wrap_if_needed(shape: &ReturnShape, status: u16, headers: &HeaderMap, decoded: Decoded) -> Decoded {
    match shape {
        ReturnShape::ResponseWrapper(_) => Decoded::Wrapped {
            status,
            headers: headers.clone(),
            value: Box::new(decoded),
        },
        _ => decoded,
    }
}

fn response_format(template: &RequestTemplate, response: &HttpResponse) -> BodyFormat {
    let content_type = response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or(template.content_type());
    BodyFormat::from_content_type(content_type)
}

/// Split a page body into its items and its next-page payload.
pub fn extract_page(spec: &PageSpec, body: serde_json::Value) -> RestResult<RawPage> {
    let serde_json::Value::Object(mut fields) = body else {
        if body.is_null() {
            return Ok(RawPage {
                items: Vec::new(),
                next: None,
            });
        }
        return Err(RestError::Encoding(format!(
            "paged response is not an object: {body}"
        )));
    };

    let items = match fields.remove(&spec.items_field) {
        None | Some(serde_json::Value::Null) => Vec::new(),
        Some(serde_json::Value::Array(items)) => items,
        Some(other) => {
            return Err(RestError::Encoding(format!(
                "`{}` is not an array: {other}",
                spec.items_field
            )))
        }
    };

    let next = fields
        .remove(&spec.next_field)
        .filter(|v| !v.is_null() && v.as_str() != Some(""));

    Ok(RawPage { items, next })
}
