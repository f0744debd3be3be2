#![no_main]

use libfuzzer_sys::fuzz_target;
use std::time::Duration;
use wsrest_engine::frame::FrameCodec;
use wsrest_engine::MemoryIo;

// Feeds arbitrary bytes straight into the frame codec's reader, the way
// an unmasked peer's raw TCP stream would arrive. The codec must never
// panic on malformed input — only ever return an `Error` or `NoData` —
// regardless of what garbage header/length/payload bytes show up.
fuzz_target!(|data: &[u8]| {
    let io = MemoryIo::new(data.to_vec());
    let mut codec = FrameCodec::new(io);
    // A handful of reads: one header can claim a length spanning most of
    // `data`, leaving a short tail that still deserves a chance to parse
    // as its own frame.
    for _ in 0..4 {
        let _ = codec.get_frame(Duration::from_millis(5));
    }
});
