//! Carries opaque text/binary frames straight to a user callback;
//! never produces an answer from `process_frame` (spec §3 "Chat").

use crate::error::Error;
use crate::frame::Frame;
use crate::protocol::{OnFrameCallback, ProcessContext, Protocol};

#[derive(Clone)]
pub struct ChatProtocol {
    name: String,
    on_frame: Option<OnFrameCallback>,
}

impl ChatProtocol {
    pub fn new(name: impl Into<String>) -> Self {
        ChatProtocol {
            name: name.into(),
            on_frame: None,
        }
    }

    pub fn with_callback(mut self, callback: OnFrameCallback) -> Self {
        self.on_frame = Some(callback);
        self
    }
}

impl Protocol for ChatProtocol {
    fn name(&self) -> &str {
        &self.name
    }

    fn process_frame(&mut self, ctx: &ProcessContext, frame: Frame) -> Result<Option<Frame>, Error> {
        if let Some(callback) = &self.on_frame {
            callback(ctx.connection_id, &frame);
        }
        Ok(None)
    }

    fn clone_box(&self) -> Box<dyn Protocol> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::OpCode;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn fires_callback_and_never_answers() {
        let seen = Arc::new(AtomicUsize::new(0));
        let seen2 = seen.clone();
        let mut chat = ChatProtocol::new("chat")
            .with_callback(Arc::new(move |_id, frame| {
                assert_eq!(frame.opcode, OpCode::Text);
                seen2.fetch_add(1, Ordering::SeqCst);
            }));
        let ctx = ProcessContext {
            connection_id: uuid::Uuid::new_v4(),
        };
        let answer = chat
            .process_frame(&ctx, Frame::new(OpCode::Text, b"hi".to_vec()))
            .unwrap();
        assert!(answer.is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn without_callback_is_a_no_op() {
        let mut chat = ChatProtocol::new("chat");
        let ctx = ProcessContext {
            connection_id: uuid::Uuid::new_v4(),
        };
        let answer = chat
            .process_frame(&ctx, Frame::new(OpCode::Binary, vec![1, 2, 3]))
            .unwrap();
        assert!(answer.is_none());
    }
}
