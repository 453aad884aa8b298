//! Raw-buffer diagnostics.
//!
//! When a packet decode fails the receive loop dumps the offending buffer
//! at error level before discarding the message, so hostile or corrupt
//! traffic can be inspected after the fact.

use tracing::error;

/// Bytes per hex dump line.
const LINE_WIDTH: usize = 16;

/// Dump cap; anything longer is truncated with a marker.
const MAX_DUMP: usize = 256;

/// Render a buffer as an offset/hex/ASCII dump.
pub fn hexdump(buf: &[u8]) -> String {
    let shown = &buf[..buf.len().min(MAX_DUMP)];
    let mut out = String::with_capacity(shown.len() * 4);

    for (i, chunk) in shown.chunks(LINE_WIDTH).enumerate() {
        out.push_str(&format!("{:08x}  ", i * LINE_WIDTH));
        for j in 0..LINE_WIDTH {
            match chunk.get(j) {
                Some(byte) => out.push_str(&format!("{byte:02x} ")),
                None => out.push_str("   "),
            }
        }
        out.push(' ');
        for byte in chunk {
            out.push(if byte.is_ascii_graphic() || *byte == b' ' {
                *byte as char
            } else {
                '.'
            });
        }
        out.push('\n');
    }

    if buf.len() > MAX_DUMP {
        out.push_str(&format!("... {} bytes truncated\n", buf.len() - MAX_DUMP));
    }

    out
}

/// Log a failed buffer with context.
pub fn dump_raw_buffer(context: &str, buf: &[u8]) {
    error!(context, len = buf.len(), "Raw buffer dump:\n{}", hexdump(buf));
}
