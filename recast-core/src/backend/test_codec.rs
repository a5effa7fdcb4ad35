//! Scripted codec double for unit tests

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{CodecError, CodecResult, MediaCodec, OutputStatus, SurfaceHandle};
use crate::media::{BufferInfo, MediaFormat};

/// Stop and release calls, readable after the codec itself is dropped.
#[derive(Debug, Default, Clone)]
pub(crate) struct Lifecycle(Arc<Mutex<Vec<&'static str>>>);

impl Lifecycle {
    fn record(&self, call: &'static str) {
        self.0.lock().push(call);
    }

    pub(crate) fn calls(&self) -> Vec<&'static str> {
        self.0.lock().clone()
    }
}

/// Codec whose outputs are pushed by the test and whose inputs are recorded.
#[derive(Debug, Default)]
pub(crate) struct ScriptedCodec {
    slot_size: usize,
    input_slots: Vec<Vec<u8>>,
    input_limit: Option<usize>,
    queued: Vec<(BufferInfo, Vec<u8>)>,
    outputs: Vec<Option<Vec<u8>>>,
    released: Vec<usize>,
    rendered: Vec<usize>,
    events: VecDeque<OutputStatus>,
    format: MediaFormat,
    end_of_input_signaled: bool,
    lifecycle: Lifecycle,
    fail_release: bool,
}

impl ScriptedCodec {
    pub(crate) fn new(slot_size: usize) -> Self {
        Self {
            slot_size,
            ..Default::default()
        }
    }

    /// Refuses input slots once `limit` have been handed out.
    pub(crate) fn with_input_limit(mut self, limit: usize) -> Self {
        self.input_limit = Some(limit);
        self
    }

    pub(crate) fn with_output_format(mut self, format: MediaFormat) -> Self {
        self.format = format;
        self
    }

    pub(crate) fn failing_release(mut self) -> Self {
        self.fail_release = true;
        self
    }

    /// Stores an output buffer and returns its index.
    pub(crate) fn push_output(&mut self, bytes: Vec<u8>) -> usize {
        self.outputs.push(Some(bytes));
        self.outputs.len() - 1
    }

    pub(crate) fn push_event(&mut self, status: OutputStatus) {
        self.events.push_back(status);
    }

    pub(crate) fn queued_inputs(&self) -> &[(BufferInfo, Vec<u8>)] {
        &self.queued
    }

    pub(crate) fn released_outputs(&self) -> &[usize] {
        &self.released
    }

    pub(crate) fn rendered_outputs(&self) -> &[usize] {
        &self.rendered
    }

    pub(crate) fn end_of_input_signaled(&self) -> bool {
        self.end_of_input_signaled
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        self.lifecycle.clone()
    }
}

impl MediaCodec for ScriptedCodec {
    fn name(&self) -> &str {
        "scripted"
    }

    fn configure(&mut self, _format: &MediaFormat, _surface: Option<SurfaceHandle>) -> CodecResult<()> {
        Ok(())
    }

    fn create_input_surface(&mut self) -> CodecResult<SurfaceHandle> {
        Ok(SurfaceHandle(1))
    }

    fn start(&mut self) -> CodecResult<()> {
        self.lifecycle.record("start");
        Ok(())
    }

    fn stop(&mut self) -> CodecResult<()> {
        self.lifecycle.record("stop");
        Ok(())
    }

    fn release(&mut self) -> CodecResult<()> {
        self.lifecycle.record("release");
        if self.fail_release {
            return Err(CodecError::InvalidState {
                reason: "release refused".to_string(),
            });
        }
        Ok(())
    }

    fn dequeue_input_buffer(&mut self, _timeout: Duration) -> CodecResult<Option<usize>> {
        if self
            .input_limit
            .is_some_and(|limit| self.input_slots.len() >= limit)
        {
            return Ok(None);
        }
        self.input_slots.push(vec![0; self.slot_size]);
        Ok(Some(self.input_slots.len() - 1))
    }

    fn input_buffer(&mut self, index: usize) -> CodecResult<&mut [u8]> {
        self.input_slots
            .get_mut(index)
            .map(Vec::as_mut_slice)
            .ok_or(CodecError::InvalidBufferIndex { index })
    }

    fn queue_input_buffer(&mut self, index: usize, info: BufferInfo) -> CodecResult<()> {
        let slot = self
            .input_slots
            .get(index)
            .ok_or(CodecError::InvalidBufferIndex { index })?;
        let bytes = slot[info.offset..info.offset + info.size].to_vec();
        self.queued.push((info, bytes));
        Ok(())
    }

    fn dequeue_output_buffer(&mut self, _timeout: Duration) -> CodecResult<OutputStatus> {
        Ok(self
            .events
            .pop_front()
            .unwrap_or(OutputStatus::TryAgainLater))
    }

    fn output_buffer(&self, index: usize) -> CodecResult<&[u8]> {
        self.outputs
            .get(index)
            .and_then(Option::as_deref)
            .ok_or(CodecError::InvalidBufferIndex { index })
    }

    fn output_format(&self) -> CodecResult<MediaFormat> {
        Ok(self.format.clone())
    }

    fn release_output_buffer(&mut self, index: usize, render: bool) -> CodecResult<()> {
        let slot = self
            .outputs
            .get_mut(index)
            .ok_or(CodecError::InvalidBufferIndex { index })?;
        *slot = None;
        self.released.push(index);
        if render {
            self.rendered.push(index);
        }
        Ok(())
    }

    fn signal_end_of_input_stream(&mut self) -> CodecResult<()> {
        self.end_of_input_signaled = true;
        Ok(())
    }
}
