//! Providers answering from the demo model on the tokio runtime

use crate::model::DemoModel;
use canopy_core::Token;
use scheduler::UpdateKind;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{debug, trace};
use viewer::{
    CompareRequest, ContentProvider, ContentReply, ContentRequest, EncodeRequest, TokenProvider,
};

/// Answers each content request from a runtime task after a fixed delay
pub struct LatencyProvider {
    model: Arc<DemoModel>,
    runtime: Handle,
    latency: Duration,
}

impl LatencyProvider {
    pub fn new(model: Arc<DemoModel>, runtime: Handle, latency: Duration) -> Arc<Self> {
        Arc::new(Self { model, runtime, latency })
    }
}

fn reply_for(model: &DemoModel, element: &str, kind: UpdateKind) -> ContentReply<String> {
    let children = model.children(element);
    match kind {
        UpdateKind::HasChildren => ContentReply::HasChildren(!children.is_empty()),
        UpdateKind::ChildCount => ContentReply::ChildCount(children.len()),
        UpdateKind::Children { offset, length } => {
            ContentReply::Children(children.iter().skip(offset).take(length).cloned().collect())
        }
    }
}

impl ContentProvider<String> for LatencyProvider {
    fn update(&self, request: ContentRequest<String>) {
        let model = self.model.clone();
        let latency = self.latency;
        trace!(kind = ?request.kind(), element = %request.element(), "content request");
        self.runtime.spawn(async move {
            tokio::time::sleep(latency).await;
            if request.is_canceled() {
                debug!(element = %request.element(), "skipping canceled request");
                return;
            }
            let reply = reply_for(&model, request.element(), request.kind());
            request.done(Ok(reply));
        });
    }
}

/// Tokens are element names
pub struct NameTokens;

impl TokenProvider<String> for NameTokens {
    fn encode(&self, request: EncodeRequest<String>) {
        let token = Token::from(request.element().clone());
        request.done(Ok(token));
    }

    fn compare(&self, request: CompareRequest<String>) {
        let equal = request.token().as_bytes() == request.element().as_bytes();
        request.done(Ok(equal));
    }
}
