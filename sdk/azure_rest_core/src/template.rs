//! Declarative operation descriptions.
//!
//! A [`RequestTemplate`] describes one operation's HTTP shape. It is built
//! once, validated at construction time, and resolved against fresh
//! [`Arguments`](crate::resolve::Arguments) on every call.
//!
//! ## Example
//!
//! ```rust
//! use azure_rest_core::template::{ParameterBinding, RequestTemplate, ReturnShape};
//! use azure_rest_core::exception::{ExceptionMapping, ExceptionType};
//! use reqwest::Method;
//!
//! # fn example() -> azure_rest_core::error::RestResult<()> {
//! let template = RequestTemplate::builder("Blobs_Download", Method::GET)
//!     .host("{endpoint}")
//!     .path("/{container}/{blob}")
//!     .binding(ParameterBinding::host("endpoint").encoded())
//!     .binding(ParameterBinding::path("container"))
//!     .binding(ParameterBinding::path("blob").encoded())
//!     .binding(ParameterBinding::query("timeout"))
//!     .expected_statuses([200, 206])
//!     .exception(ExceptionMapping::for_statuses([404], ExceptionType::new("BlobNotFound")))
//!     .returns(ReturnShape::Stream)
//!     .build()?;
//! # Ok(())
//! # }
//! ```

use crate::error::{RestError, RestResult};
use crate::exception::{ExceptionMapping, ExceptionType};
use reqwest::Method;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

/// Default content type for structured bodies.
pub const DEFAULT_CONTENT_TYPE: &str = "application/json";

/// Where a runtime value is placed in the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Host,
    Path,
    Query,
    Header,
    Body,
}

/// Rule for placing one runtime argument into a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParameterBinding {
    location: Location,
    name: String,
    wire_name: Option<String>,
    encoded: bool,
    multi_value: bool,
    header_prefix: Option<String>,
}

impl ParameterBinding {
    fn new(location: Location, name: impl Into<String>) -> Self {
        Self {
            location,
            name: name.into(),
            wire_name: None,
            encoded: false,
            multi_value: false,
            header_prefix: None,
        }
    }

    /// Bind a host template placeholder.
    pub fn host(name: impl Into<String>) -> Self {
        Self::new(Location::Host, name)
    }

    /// Bind a path template placeholder.
    pub fn path(name: impl Into<String>) -> Self {
        Self::new(Location::Path, name)
    }

    /// Bind a query parameter.
    pub fn query(name: impl Into<String>) -> Self {
        Self::new(Location::Query, name)
    }

    /// Bind a header.
    pub fn header(name: impl Into<String>) -> Self {
        Self::new(Location::Header, name)
    }

    /// Bind the request body.
    pub fn body(name: impl Into<String>) -> Self {
        Self::new(Location::Body, name)
    }

    /// Bind a map-valued argument expanded into one header per entry, named
    /// `prefix + key`.
    pub fn header_map(name: impl Into<String>, prefix: impl Into<String>) -> Self {
        let mut binding = Self::new(Location::Header, name);
        binding.header_prefix = Some(prefix.into());
        binding
    }

    /// Name used on the wire when it differs from the argument name.
    pub fn wire_name(mut self, wire_name: impl Into<String>) -> Self {
        self.wire_name = Some(wire_name.into());
        self
    }

    /// Trust the value as already encoded and insert it verbatim.
    pub fn encoded(mut self) -> Self {
        self.encoded = true;
        self
    }

    /// Emit one `name=value` pair per element of a list argument.
    pub fn multi_value(mut self) -> Self {
        self.multi_value = true;
        self
    }

    pub fn location(&self) -> Location {
        self.location
    }

    /// Argument name, also the placeholder name for host and path bindings.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Serialized name for query parameters and headers.
    pub fn serialized_name(&self) -> &str {
        self.wire_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_encoded(&self) -> bool {
        self.encoded
    }

    pub fn is_multi_value(&self) -> bool {
        self.multi_value
    }

    pub fn is_map_expansion(&self) -> bool {
        self.header_prefix.is_some()
    }

    pub fn header_prefix(&self) -> Option<&str> {
        self.header_prefix.as_deref()
    }
}

/// How the `next` payload of a page is fed into the following request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContinuationMode {
    /// The payload is an object of query parameters replacing the original ones.
    Query,
    /// The payload replaces the request body.
    Body,
    /// The payload is an absolute URL requested as-is.
    NextLink,
}

/// Where a paged response keeps its items and its continuation payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageSpec {
    /// Field holding the array of page elements.
    pub items_field: String,
    /// Field holding the next-page payload; absent or null ends the sequence.
    pub next_field: String,
    /// How the payload is re-submitted.
    pub continuation: ContinuationMode,
}

impl PageSpec {
    /// Items under `value`, absolute next link under `nextLink`.
    pub fn next_link() -> Self {
        Self {
            items_field: "value".into(),
            next_field: "nextLink".into(),
            continuation: ContinuationMode::NextLink,
        }
    }

    pub fn new(
        items_field: impl Into<String>,
        next_field: impl Into<String>,
        continuation: ContinuationMode,
    ) -> Self {
        Self {
            items_field: items_field.into(),
            next_field: next_field.into(),
            continuation,
        }
    }
}

/// The ways a decoded response can be presented to a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReturnShape {
    Void,
    BooleanFromStatus,
    Bytes,
    DeserializedBody,
    ResponseWrapper(Box<ReturnShape>),
    Stream,
    Paged(PageSpec),
}

impl ReturnShape {
    /// Wrap `inner` with status and headers.
    pub fn wrapped(inner: ReturnShape) -> Self {
        Self::ResponseWrapper(Box::new(inner))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Void => "void",
            Self::BooleanFromStatus => "boolean-from-status",
            Self::Bytes => "bytes",
            Self::DeserializedBody => "deserialized-body",
            Self::ResponseWrapper(_) => "response-wrapper",
            Self::Stream => "stream",
            Self::Paged(_) => "paged",
        }
    }

    /// The shape with any response wrapper removed.
    pub fn innermost(&self) -> &ReturnShape {
        match self {
            Self::ResponseWrapper(inner) => inner.innermost(),
            other => other,
        }
    }
}

/// Immutable description of one declared operation.
#[derive(Debug, Clone)]
pub struct RequestTemplate {
    operation_id: String,
    method: Method,
    host_template: String,
    path_template: String,
    bindings: Vec<ParameterBinding>,
    expected_statuses: Option<BTreeSet<u16>>,
    exception_mappings: Vec<ExceptionMapping>,
    content_type: String,
    return_shape: ReturnShape,
}

impl RequestTemplate {
    /// Start describing an operation.
    pub fn builder(operation_id: impl Into<String>, method: Method) -> RequestTemplateBuilder {
        RequestTemplateBuilder {
            operation_id: operation_id.into(),
            method,
            host_template: String::new(),
            path_template: String::new(),
            bindings: Vec::new(),
            expected_statuses: None,
            exception_mappings: Vec::new(),
            content_type: None,
            return_shape: ReturnShape::DeserializedBody,
        }
    }

    pub fn operation_id(&self) -> &str {
        &self.operation_id
    }

    pub fn method(&self) -> &Method {
        &self.method
    }

    pub fn host_template(&self) -> &str {
        &self.host_template
    }

    pub fn path_template(&self) -> &str {
        &self.path_template
    }

    pub fn bindings(&self) -> &[ParameterBinding] {
        &self.bindings
    }

    pub fn exception_mappings(&self) -> &[ExceptionMapping] {
        &self.exception_mappings
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn return_shape(&self) -> &ReturnShape {
        &self.return_shape
    }

    /// Whether `status` is in the expected set (2xx when none was declared).
    pub fn is_expected_status(&self, status: u16) -> bool {
        match &self.expected_statuses {
            Some(codes) => codes.contains(&status),
            None => (200..300).contains(&status),
        }
    }

    /// The binding for the body, if the operation takes one.
    pub fn body_binding(&self) -> Option<&ParameterBinding> {
        self.bindings.iter().find(|b| b.location == Location::Body)
    }

    /// Bindings at `location` in declaration order.
    pub fn bindings_at(&self, location: Location) -> impl Iterator<Item = &ParameterBinding> {
        self.bindings.iter().filter(move |b| b.location == location)
    }
}

/// Builder for [`RequestTemplate`].
#[derive(Debug)]
pub struct RequestTemplateBuilder {
    operation_id: String,
    method: Method,
    host_template: String,
    path_template: String,
    bindings: Vec<ParameterBinding>,
    expected_statuses: Option<BTreeSet<u16>>,
    exception_mappings: Vec<ExceptionMapping>,
    content_type: Option<String>,
    return_shape: ReturnShape,
}

impl RequestTemplateBuilder {
    /// Host template, e.g. `{endpoint}` or `https://{account}.{dnsSuffix}`.
    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.host_template = host.into();
        self
    }

    /// Path template, e.g. `/indexes('{indexName}')/docs`.
    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.path_template = path.into();
        self
    }

    pub fn binding(mut self, binding: ParameterBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// Replace the default 2xx expected range.
    pub fn expected_statuses(mut self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.expected_statuses
            .get_or_insert_with(BTreeSet::new)
            .extend(statuses);
        self
    }

    /// Append an exception mapping. Later mappings override earlier ones.
    pub fn exception(mut self, mapping: ExceptionMapping) -> Self {
        self.exception_mappings.push(mapping);
        self
    }

    /// Append a catch-all exception mapping.
    pub fn default_exception(self, exception: ExceptionType) -> Self {
        self.exception(ExceptionMapping::default_for(exception))
    }

    pub fn content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn returns(mut self, shape: ReturnShape) -> Self {
        self.return_shape = shape;
        self
    }

    /// Validate and freeze the template.
    ///
    /// # Errors
    ///
    /// Returns [`RestError::UnresolvedPlaceholder`] if a host or path
    /// placeholder has no binding, and [`RestError::InvalidTemplate`] for
    /// other inconsistencies (duplicate body bindings, unused host/path
    /// bindings, flags on the wrong location).
    pub fn build(self) -> RestResult<RequestTemplate> {
        check_placeholders(&self.host_template, &self.bindings, Location::Host)?;
        check_placeholders(&self.path_template, &self.bindings, Location::Path)?;

        let body_bindings = self
            .bindings
            .iter()
            .filter(|b| b.location == Location::Body)
            .count();
        if body_bindings > 1 {
            return Err(RestError::InvalidTemplate(format!(
                "operation `{}` declares {body_bindings} body parameters",
                self.operation_id
            )));
        }

        for binding in &self.bindings {
            if binding.multi_value && binding.location != Location::Query {
                return Err(RestError::InvalidTemplate(format!(
                    "`{}`: only query parameters can be multi-valued",
                    binding.name
                )));
            }
            if binding.header_prefix.is_some() && binding.location != Location::Header {
                return Err(RestError::InvalidTemplate(format!(
                    "`{}`: map expansion is only valid for headers",
                    binding.name
                )));
            }
        }

        Ok(RequestTemplate {
            operation_id: self.operation_id,
            method: self.method,
            host_template: self.host_template,
            path_template: self.path_template,
            bindings: self.bindings,
            expected_statuses: self.expected_statuses,
            exception_mappings: self.exception_mappings,
            content_type: self
                .content_type
                .unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string()),
            return_shape: self.return_shape,
        })
    }
}

/// Names of all `{placeholder}`s in a template, in order of appearance.
pub(crate) fn placeholders(template: &str) -> Vec<&str> {
    let mut names = Vec::new();
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let after = &rest[open + 1..];
        match after.find('}') {
            Some(close) => {
                names.push(&after[..close]);
                rest = &after[close + 1..];
            }
            None => break,
        }
    }
    names
}

fn check_placeholders(
    template: &str,
    bindings: &[ParameterBinding],
    location: Location,
) -> RestResult<()> {
    let names = placeholders(template);

    for name in &names {
        let bound = bindings
            .iter()
            .any(|b| b.location == location && b.name == *name);
        if !bound {
            return Err(RestError::UnresolvedPlaceholder {
                placeholder: (*name).to_string(),
                template: template.to_string(),
            });
        }
    }

    if let Some(unused) = bindings
        .iter()
        .filter(|b| b.location == location)
        .find(|b| !names.contains(&b.name.as_str()))
    {
        return Err(RestError::InvalidTemplate(format!(
            "`{}` is bound to the {location:?} but the template `{template}` has no such placeholder",
            unused.name
        )));
    }
    Ok(())
}

/// Templates keyed by operation id, built once per service client.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<RequestTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a template under its operation id.
    pub fn register(&mut self, template: RequestTemplate) -> RestResult<Arc<RequestTemplate>> {
        let id = template.operation_id().to_string();
        if self.templates.contains_key(&id) {
            return Err(RestError::InvalidTemplate(format!(
                "operation `{id}` is already registered"
            )));
        }
        let template = Arc::new(template);
        self.templates.insert(id, Arc::clone(&template));
        Ok(template)
    }

    /// Look up a template by operation id.
    pub fn get(&self, operation_id: &str) -> RestResult<Arc<RequestTemplate>> {
        self.templates.get(operation_id).cloned().ok_or_else(|| {
            RestError::InvalidTemplate(format!("unknown operation `{operation_id}`"))
        })
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}
