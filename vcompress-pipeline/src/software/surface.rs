//! In-memory render surfaces linking a software decoder to a software encoder.
//!
//! A decoder releasing an output buffer with `render = true` posts the frame
//! to its output surface. The output surface hands the frame to whichever
//! encoder input surface is current, and `swap_buffers` queues it as encoder
//! input.

use crate::codec::{InputSurface, OutputSurface, SurfaceId};
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;
use vcompress_core::error::Result;
use vcompress_core::CodecError;

/// One rendered frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Frame {
    pub data: Vec<u8>,
    pub presentation_time_us: i64,
}

/// Input side of a surface-fed encoder.
#[derive(Debug, Default)]
pub(crate) struct EncoderSurfaceQueue {
    pending: Option<Vec<u8>>,
    pending_time_ns: i64,
    pub frames: VecDeque<Frame>,
    pub end_of_stream: bool,
}

/// Routing table shared by every surface of one platform.
#[derive(Debug, Default)]
pub(crate) struct SurfaceHub {
    next_id: u64,
    rendered: HashMap<SurfaceId, VecDeque<Frame>>,
    current: Option<Rc<RefCell<EncoderSurfaceQueue>>>,
}

pub(crate) type SharedHub = Rc<RefCell<SurfaceHub>>;

impl SurfaceHub {
    fn allocate(&mut self) -> SurfaceId {
        self.next_id += 1;
        SurfaceId(self.next_id)
    }

    /// Post a decoded frame to surface `id`.
    pub fn render(&mut self, id: SurfaceId, frame: Frame) {
        self.rendered.entry(id).or_default().push_back(frame);
    }
}

/// Decoder render target.
#[derive(Debug)]
pub struct SoftwareOutputSurface {
    id: SurfaceId,
    hub: SharedHub,
    latest: Option<Frame>,
}

impl SoftwareOutputSurface {
    pub(crate) fn new(hub: SharedHub) -> Self {
        let id = hub.borrow_mut().allocate();
        Self { id, hub, latest: None }
    }
}

impl OutputSurface for SoftwareOutputSurface {
    fn id(&self) -> SurfaceId {
        self.id
    }

    fn await_new_image(&mut self) -> Result<()> {
        let frame = self
            .hub
            .borrow_mut()
            .rendered
            .get_mut(&self.id)
            .and_then(VecDeque::pop_front)
            .ok_or_else(|| CodecError::Other("No frame rendered to surface".into()))?;
        self.latest = Some(frame);
        Ok(())
    }

    fn draw_image(&mut self) -> Result<()> {
        let frame = self
            .latest
            .take()
            .ok_or_else(|| CodecError::Other("No image to draw".into()))?;
        let hub = self.hub.borrow();
        let target = hub
            .current
            .as_ref()
            .ok_or_else(|| CodecError::Other("No current input surface".into()))?;
        target.borrow_mut().pending = Some(frame.data);
        Ok(())
    }

    fn release(&mut self) {
        self.latest = None;
        self.hub.borrow_mut().rendered.remove(&self.id);
    }
}

/// Encoder input surface.
#[derive(Debug)]
pub struct SoftwareInputSurface {
    queue: Rc<RefCell<EncoderSurfaceQueue>>,
    hub: SharedHub,
}

impl SoftwareInputSurface {
    pub(crate) fn new(queue: Rc<RefCell<EncoderSurfaceQueue>>, hub: SharedHub) -> Self {
        Self { queue, hub }
    }
}

impl InputSurface for SoftwareInputSurface {
    fn make_current(&mut self) -> Result<()> {
        self.hub.borrow_mut().current = Some(self.queue.clone());
        Ok(())
    }

    fn set_presentation_time(&mut self, nanos: i64) -> Result<()> {
        self.queue.borrow_mut().pending_time_ns = nanos;
        Ok(())
    }

    fn swap_buffers(&mut self) -> Result<()> {
        let mut queue = self.queue.borrow_mut();
        let data = queue
            .pending
            .take()
            .ok_or_else(|| CodecError::Other("Nothing drawn before swap".into()))?;
        let presentation_time_us = queue.pending_time_ns / 1000;
        queue.frames.push_back(Frame {
            data,
            presentation_time_us,
        });
        Ok(())
    }

    fn release(&mut self) {
        let mut hub = self.hub.borrow_mut();
        if hub.current.as_ref().is_some_and(|q| Rc::ptr_eq(q, &self.queue)) {
            hub.current = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_travels_to_encoder_queue() {
        let hub = SharedHub::default();
        let queue = Rc::new(RefCell::new(EncoderSurfaceQueue::default()));
        let mut input = SoftwareInputSurface::new(queue.clone(), hub.clone());
        let mut output = SoftwareOutputSurface::new(hub.clone());

        input.make_current().unwrap();
        hub.borrow_mut().render(
            output.id(),
            Frame {
                data: vec![1, 2, 3],
                presentation_time_us: 0,
            },
        );
        output.await_new_image().unwrap();
        output.draw_image().unwrap();
        input.set_presentation_time(33_000_000).unwrap();
        input.swap_buffers().unwrap();

        let frame = queue.borrow_mut().frames.pop_front().unwrap();
        assert_eq!(frame.data, vec![1, 2, 3]);
        assert_eq!(frame.presentation_time_us, 33_000);
    }

    #[test]
    fn test_await_without_render_fails() {
        let hub = SharedHub::default();
        let mut output = SoftwareOutputSurface::new(hub);
        assert!(output.await_new_image().is_err());
    }
}
