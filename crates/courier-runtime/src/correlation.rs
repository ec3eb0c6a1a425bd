//! Correlation context carried explicitly through receive, middleware,
//! handlers and outgoing messages.

use crate::envelope::Correlation;
use uuid::Uuid;

/// Correlation identifiers for one unit of work.
///
/// A fresh context is created for every consumed message or published
/// message. When a message is received, the sender's identifiers become this
/// context's parent request, session, trace and origin span.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CorrelationContext {
    request_id: String,
    parent_request_id: Option<String>,
    session_id: Option<String>,
    trace_id: String,
    origin_span: Option<String>,
}

impl CorrelationContext {
    /// Create a context with new request and trace identifiers
    pub fn new() -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            parent_request_id: None,
            session_id: None,
            trace_id: Uuid::new_v4().simple().to_string(),
            origin_span: None,
        }
    }

    /// Attach a session identifier
    pub fn with_session_id(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Take over the identifiers of an incoming message.
    ///
    /// The request id of this context is kept; empty incoming values are
    /// ignored.
    pub fn inherit(&mut self, incoming: &Correlation) {
        if !incoming.request.is_empty() {
            self.parent_request_id = Some(incoming.request.clone());
        }
        if let Some(session) = incoming.session.as_ref().filter(|s| !s.is_empty()) {
            self.session_id = Some(session.clone());
        }
        if !incoming.trace.is_empty() {
            self.trace_id = incoming.trace.clone();
        }
        self.origin_span = incoming.span.clone().filter(|s| !s.is_empty());
    }

    /// Correlation header for an outgoing message
    pub fn to_wire(&self) -> Correlation {
        Correlation {
            request: self.request_id.clone(),
            session: self.session_id.clone(),
            trace: self.trace_id.clone(),
            span: Some(self.request_id.clone()),
        }
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn parent_request_id(&self) -> Option<&str> {
        self.parent_request_id.as_deref()
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn trace_id(&self) -> &str {
        &self.trace_id
    }

    pub fn origin_span(&self) -> Option<&str> {
        self.origin_span.as_deref()
    }
}

impl Default for CorrelationContext {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[path = "correlation_tests.rs"]
mod tests;
