//! Content type detection from leading bytes

/// (offset, magic, mime)
const SIGNATURES: &[(usize, &[u8], &str)] = &[
    (0, b"\x89PNG\r\n\x1a\n", "image/png"),
    (0, b"\xff\xd8\xff", "image/jpeg"),
    (0, b"GIF87a", "image/gif"),
    (0, b"GIF89a", "image/gif"),
    (0, b"\x00\x00\x01\x00", "image/x-icon"),
    (0, b"%PDF-", "application/pdf"),
    (0, b"PK\x03\x04", "application/zip"),
    (0, b"\x1f\x8b", "application/gzip"),
    (0, b"OggS", "audio/ogg"),
    (0, b"ID3", "audio/mpeg"),
    (0, b"\x00asm", "application/wasm"),
];

/// RIFF container: format tag at offset 8
const RIFF_FORMATS: &[(&[u8], &str)] = &[(b"WEBP", "image/webp"), (b"WAVE", "audio/wav")];

/// ISO base media: brand at offset 8 after `ftyp` at 4
const FTYP_BRANDS: &[(&[u8], &str)] = &[
    (b"avif", "image/avif"),
    (b"heic", "image/heic"),
    (b"heix", "image/heic"),
    (b"mif1", "image/heif"),
];

const TEXT_PLAIN: &str = "text/plain; charset=utf-8";
const OCTET_STREAM: &str = "application/octet-stream";

/// Best-effort MIME type for `data`
pub fn content_type(data: &[u8]) -> &'static str {
    if data.is_empty() {
        return TEXT_PLAIN;
    }

    for (offset, magic, mime) in SIGNATURES {
        if data.get(*offset..offset + magic.len()) == Some(*magic) {
            return *mime;
        }
    }

    if data.starts_with(b"RIFF") {
        if let Some(format) = data.get(8..12) {
            if let Some((_, mime)) = RIFF_FORMATS.iter().find(|(tag, _)| *tag == format) {
                return *mime;
            }
        }
    }

    if data.get(4..8) == Some(&b"ftyp"[..]) {
        let brand = data.get(8..12).unwrap_or_default();
        return FTYP_BRANDS
            .iter()
            .find(|(tag, _)| *tag == brand)
            .map(|(_, mime)| *mime)
            .unwrap_or("video/mp4");
    }

    // BMP: "BM", file size, then four reserved zero bytes
    if data.starts_with(b"BM") && data.get(6..10) == Some(&[0u8; 4][..]) {
        return "image/bmp";
    }

    // MPEG audio frame sync without an ID3 header
    if data.len() >= 2 && data[0] == 0xff && (data[1] & 0xe0) == 0xe0 {
        return "audio/mpeg";
    }

    if let Ok(text) = std::str::from_utf8(data) {
        if text.chars().any(is_binary_control) {
            return OCTET_STREAM;
        }
        return markup_type(text).unwrap_or(TEXT_PLAIN);
    }

    OCTET_STREAM
}

fn is_binary_control(c: char) -> bool {
    c.is_control() && !matches!(c, '\n' | '\r' | '\t' | '\x0c')
}

fn markup_type(text: &str) -> Option<&'static str> {
    let head: String = text
        .trim_start_matches('\u{feff}')
        .trim_start()
        .chars()
        .take(64)
        .collect::<String>()
        .to_ascii_lowercase();

    if head.starts_with("<?xml") {
        Some("text/xml; charset=utf-8")
    } else if ["<!doctype html", "<html", "<head", "<body"]
        .iter()
        .any(|tag| head.starts_with(tag))
    {
        Some("text/html; charset=utf-8")
    } else {
        None
    }
}
