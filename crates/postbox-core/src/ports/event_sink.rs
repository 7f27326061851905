//! EventSink port - processing event の通知先
//!
//! 一方向の通知のみ。sink が何をしても processor の動作は変わらない。

use crate::domain::ProcessingEvent;

pub trait EventSink: Send + Sync {
    fn emit(&self, event: ProcessingEvent);
}

/// Default sink: drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn emit(&self, _event: ProcessingEvent) {}
}

impl<F> EventSink for F
where
    F: Fn(ProcessingEvent) + Send + Sync,
{
    fn emit(&self, event: ProcessingEvent) {
        self(event)
    }
}
