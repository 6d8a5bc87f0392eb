use rand::RngCore;
use tracing::span::{Attributes, Id};
use tracing::Subscriber;
use tracing_subscriber::layer::{Context, Layer};
use tracing_subscriber::registry::LookupSpan;
use uuid::Uuid;

/// Trace identity propagated across spans. Children inherit the trace id
/// and mint their own span id; every log record emitted inside an active
/// span carries both, whatever the emission transport is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceContext {
  pub trace_id: String,
  pub span_id: String,
}

impl TraceContext {
  pub fn root() -> Self {
    Self {
      trace_id: Uuid::new_v4().simple().to_string(),
      span_id: new_span_id(),
    }
  }

  pub fn child_of(parent: &TraceContext) -> Self {
    Self {
      trace_id: parent.trace_id.clone(),
      span_id: new_span_id(),
    }
  }
}

fn new_span_id() -> String {
  let mut bytes = [0u8; 8];
  rand::thread_rng().fill_bytes(&mut bytes);
  hex::encode(bytes)
}

/// Subscriber layer that attaches a [`TraceContext`] to every span.
///
/// This is a handler wrapper, not a log format: it only maintains the
/// context in span extensions. Formatting layers (fmt, json) render the
/// `trace_id`/`span_id` span fields recorded by the request middleware,
/// and in-process consumers read the context via [`span_context`].
pub struct TraceContextLayer;

impl<S> Layer<S> for TraceContextLayer
where
  S: Subscriber + for<'a> LookupSpan<'a>,
{
  fn on_new_span(&self, _attrs: &Attributes<'_>, id: &Id, ctx: Context<'_, S>) {
    let span = ctx.span(id).expect("span registered for its own id");
    let inherited = span
      .parent()
      .and_then(|parent| parent.extensions().get::<TraceContext>().cloned());
    let trace_ctx = match inherited {
      Some(parent) => TraceContext::child_of(&parent),
      None => TraceContext::root(),
    };
    span.extensions_mut().insert(trace_ctx);
  }
}

/// Read the trace context of `id`, if the layer has stamped one.
pub fn span_context<S>(ctx: &Context<'_, S>, id: &Id) -> Option<TraceContext>
where
  S: Subscriber + for<'a> LookupSpan<'a>,
{
  ctx
    .span(id)
    .and_then(|span| span.extensions().get::<TraceContext>().cloned())
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn child_inherits_trace_id_with_fresh_span_id() {
    let root = TraceContext::root();
    let child = TraceContext::child_of(&root);
    assert_eq!(child.trace_id, root.trace_id);
    assert_ne!(child.span_id, root.span_id);
  }

  #[test]
  fn root_ids_have_expected_width() {
    let ctx = TraceContext::root();
    assert_eq!(ctx.trace_id.len(), 32);
    assert_eq!(ctx.span_id.len(), 16);
  }
}
