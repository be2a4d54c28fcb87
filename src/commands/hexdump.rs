//! Hexdump output for `read` without an output file

use std::fmt::Write;

const BYTES_PER_LINE: usize = 16;

/// Format `data` as 16-byte lines with an address column and ASCII gutter
pub fn format(base: u64, data: &[u8]) -> String {
    let mut out = String::new();
    for (i, line) in data.chunks(BYTES_PER_LINE).enumerate() {
        let _ = write!(out, "{:08X}  ", base + (i * BYTES_PER_LINE) as u64);
        for col in 0..BYTES_PER_LINE {
            match line.get(col) {
                Some(byte) => {
                    let _ = write!(out, "{:02X} ", byte);
                }
                None => out.push_str("   "),
            }
            if col == 7 {
                out.push(' ');
            }
        }
        out.push_str(" |");
        out.extend(line.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_full_line() {
        let data: Vec<u8> = (0x40..0x50).collect();
        assert_eq!(
            format(0x1000, &data),
            "00001000  40 41 42 43 44 45 46 47  48 49 4A 4B 4C 4D 4E 4F  |@ABCDEFGHIJKLMNO|\n"
        );
    }

    #[test]
    fn test_partial_line_is_padded() {
        let out = format(0, &[0x00, 0x41, 0xFF]);
        assert_eq!(
            out,
            format!("00000000  00 41 FF {}  |.A.|\n", " ".repeat(13 * 3))
        );
    }

    #[test]
    fn test_line_count() {
        assert_eq!(format(0, &[0u8; 33]).lines().count(), 3);
        assert!(format(0, &[]).is_empty());
    }
}
