//! Entry name encoding and normalization.
//!
//! Names are stored either as UTF-8 (general purpose flag bit 11) or in the
//! legacy IBM code page 437. Stored names always use `/` as the separator,
//! are relative, and end with `/` for directories.

/// Code page 437, bytes 0x80 to 0xFF.
const CP437_HIGH: [char; 128] = [
    '\u{00C7}', '\u{00FC}', '\u{00E9}', '\u{00E2}', '\u{00E4}', '\u{00E0}', '\u{00E5}', '\u{00E7}',
    '\u{00EA}', '\u{00EB}', '\u{00E8}', '\u{00EF}', '\u{00EE}', '\u{00EC}', '\u{00C4}', '\u{00C5}',
    '\u{00C9}', '\u{00E6}', '\u{00C6}', '\u{00F4}', '\u{00F6}', '\u{00F2}', '\u{00FB}', '\u{00F9}',
    '\u{00FF}', '\u{00D6}', '\u{00DC}', '\u{00A2}', '\u{00A3}', '\u{00A5}', '\u{20A7}', '\u{0192}',
    '\u{00E1}', '\u{00ED}', '\u{00F3}', '\u{00FA}', '\u{00F1}', '\u{00D1}', '\u{00AA}', '\u{00BA}',
    '\u{00BF}', '\u{2310}', '\u{00AC}', '\u{00BD}', '\u{00BC}', '\u{00A1}', '\u{00AB}', '\u{00BB}',
    '\u{2591}', '\u{2592}', '\u{2593}', '\u{2502}', '\u{2524}', '\u{2561}', '\u{2562}', '\u{2556}',
    '\u{2555}', '\u{2563}', '\u{2551}', '\u{2557}', '\u{255D}', '\u{255C}', '\u{255B}', '\u{2510}',
    '\u{2514}', '\u{2534}', '\u{252C}', '\u{251C}', '\u{2500}', '\u{253C}', '\u{255E}', '\u{255F}',
    '\u{255A}', '\u{2554}', '\u{2569}', '\u{2566}', '\u{2560}', '\u{2550}', '\u{256C}', '\u{2567}',
    '\u{2568}', '\u{2564}', '\u{2565}', '\u{2559}', '\u{2558}', '\u{2552}', '\u{2553}', '\u{256B}',
    '\u{256A}', '\u{2518}', '\u{250C}', '\u{2588}', '\u{2584}', '\u{258C}', '\u{2590}', '\u{2580}',
    '\u{03B1}', '\u{00DF}', '\u{0393}', '\u{03C0}', '\u{03A3}', '\u{03C3}', '\u{00B5}', '\u{03C4}',
    '\u{03A6}', '\u{0398}', '\u{03A9}', '\u{03B4}', '\u{221E}', '\u{03C6}', '\u{03B5}', '\u{2229}',
    '\u{2261}', '\u{00B1}', '\u{2265}', '\u{2264}', '\u{2320}', '\u{2321}', '\u{00F7}', '\u{2248}',
    '\u{00B0}', '\u{2219}', '\u{00B7}', '\u{221A}', '\u{207F}', '\u{00B2}', '\u{25A0}', '\u{00A0}',
];

/// Decodes a stored name (or comment).
pub fn decode_name(bytes: &[u8], utf8: bool) -> String {
    if utf8 {
        String::from_utf8_lossy(bytes).into_owned()
    } else {
        decode_cp437(bytes)
    }
}

/// Decodes a cp437 byte-array into an UTF-8 String.
fn decode_cp437(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|&b| if b < 0x80 { b as char } else { CP437_HIGH[(b - 0x80) as usize] })
        .collect()
}

fn encode_cp437(name: &str) -> Option<Vec<u8>> {
    name.chars()
        .map(|c| {
            if c.is_ascii() {
                Some(c as u8)
            } else {
                CP437_HIGH
                    .iter()
                    .position(|&h| h == c)
                    .map(|i| 0x80 + i as u8)
            }
        })
        .collect()
}

/// Encodes a name for storage. Returns the bytes and whether the UTF-8 flag
/// must be set: always when `utf8` is requested, and also when the name has
/// characters code page 437 cannot represent.
pub fn encode_name(name: &str, utf8: bool) -> (Vec<u8>, bool) {
    if !utf8 {
        if let Some(bytes) = encode_cp437(name) {
            return (bytes, false);
        }
    }
    (name.as_bytes().to_vec(), true)
}

/// Normalizes a file path into a stored entry name: `\` becomes `/`, a
/// drive or UNC prefix and leading slashes are dropped, and `.` segments
/// are removed.
pub fn transform_name(name: &str) -> String {
    let name = name.replace('\\', "/");
    let mut rest = name.as_str();
    let bytes = rest.as_bytes();
    if bytes.len() >= 2 && bytes[1] == b':' && bytes[0].is_ascii_alphabetic() {
        rest = &rest[2..];
    } else if let Some(unc) = rest.strip_prefix("//") {
        // //server/share/path
        let mut parts = unc.splitn(3, '/');
        let _server = parts.next();
        let _share = parts.next();
        rest = parts.next().unwrap_or("");
    }
    let trailing_slash = rest.ends_with('/');
    let segments: Vec<&str> = rest
        .split('/')
        .filter(|s| !s.is_empty() && *s != ".")
        .collect();
    let mut out = segments.join("/");
    if trailing_slash && !out.is_empty() {
        out.push('/');
    }
    out
}

/// [`transform_name`] for a directory: the result always ends with `/`.
pub fn transform_directory_name(name: &str) -> String {
    let mut out = transform_name(name);
    if !out.ends_with('/') {
        out.push('/');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cp437_round_trip() {
        let name = "caf\u{00E9}/\u{00C7}a \u{2591}.txt";
        let (bytes, utf8) = encode_name(name, false);
        assert!(!utf8);
        assert_eq!(bytes[3], 0x82);
        assert_eq!(decode_name(&bytes, false), name);
    }

    #[test]
    fn test_unmappable_name_forces_utf8() {
        let (bytes, utf8) = encode_name("\u{65E5}\u{672C}.txt", false);
        assert!(utf8);
        assert_eq!(decode_name(&bytes, true), "\u{65E5}\u{672C}.txt");
    }

    #[test]
    fn test_requested_utf8_is_kept() {
        let (bytes, utf8) = encode_name("plain.txt", true);
        assert!(utf8);
        assert_eq!(bytes, b"plain.txt");
    }

    #[test]
    fn test_transform_name() {
        assert_eq!(transform_name("C:\\dir\\file.txt"), "dir/file.txt");
        assert_eq!(transform_name("/abs/./path"), "abs/path");
        assert_eq!(transform_name("//server/share/x/y"), "x/y");
        assert_eq!(transform_name("sub/dir/"), "sub/dir/");
        assert_eq!(transform_name("a//b"), "a/b");
    }

    #[test]
    fn test_directory_name_gets_slash() {
        assert_eq!(transform_directory_name("docs"), "docs/");
        assert_eq!(transform_directory_name("docs\\"), "docs/");
    }
}
