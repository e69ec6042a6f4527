pub mod logging;

pub(crate) fn env_truthy(var: &str) -> Option<bool> {
    std::env::var(var).map(|v| v != "0" && !v.is_empty()).ok()
}

/// Offset/hex/ascii dump used when tracing rejected payloads.
pub fn hexdump(bytes: &[u8]) -> String {
    const WIDTH: usize = 16;
    let mut out = String::new();
    for (i, chunk) in bytes.chunks(WIDTH).enumerate() {
        use std::fmt::Write as _;
        let offset = i * WIDTH;
        let _ = write!(out, "{offset:08x}  ");
        for (j, byte) in chunk.iter().enumerate() {
            if j == WIDTH / 2 {
                out.push(' ');
            }
            let _ = write!(out, "{byte:02x} ");
        }
        for _ in chunk.len()..WIDTH {
            out.push_str("   ");
        }
        out.push(' ');
        for &byte in chunk {
            let ch = if (0x20..=0x7e).contains(&byte) {
                byte as char
            } else {
                '.'
            };
            out.push(ch);
        }
        out.push('\n');
    }
    out
}
