//! Hex address parsing and formatting utilities.

use anyhow::Result;

/// Parse a hex address string (with or without 0x prefix, `_` separators allowed).
pub fn parse_hex_address(s: &str) -> Result<u64> {
    let s = s.trim().trim_start_matches("0x").trim_start_matches("0X");
    let digits: String = s.chars().filter(|c| *c != '_').collect();
    u64::from_str_radix(&digits, 16).map_err(|e| anyhow::anyhow!("Invalid hex address: {}", e))
}

/// Format an address as a hex string with 0x prefix.
pub fn format_hex_address(addr: u64) -> String {
    format!("0x{:X}", addr)
}

/// Format bytes as hexdump rows of 16, offsets relative to `base`
pub fn hexdump_rows(base: u64, bytes: &[u8], ascii: bool) -> Vec<String> {
    bytes
        .chunks(16)
        .enumerate()
        .map(|(i, chunk)| {
            let mut row = format!("0x{:X}: ", base.wrapping_add(i as u64 * 16));

            for j in 0..16 {
                if j == 8 {
                    row.push(' ');
                }
                match chunk.get(j) {
                    Some(byte) => row.push_str(&format!("{:02X} ", byte)),
                    None => row.push_str("   "),
                }
            }

            if ascii {
                row.push_str(" |");
                for byte in chunk {
                    if (0x20..0x7F).contains(byte) {
                        row.push(*byte as char);
                    } else {
                        row.push('.');
                    }
                }
                for _ in chunk.len()..16 {
                    row.push(' ');
                }
                row.push('|');
            }
            row
        })
        .collect()
}
