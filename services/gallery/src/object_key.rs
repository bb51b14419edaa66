//! Object key and image URL handling.
//!
//! Keys are derived from the uploaded filename plus an upload timestamp:
//!
//! ```text
//! My Photo.PNG  @ 2024-01-15T10:30:45.123Z
//!      │
//!      ▼
//! my-photo-png-2024-01-15T10:30:45.123Z.png
//! └─ sanitized ┘ └──── timestamp ─────┘ └ext┘
//! ```
//!
//! Stored records only keep the public URL of the object, so the delete path
//! has to recover the key from that URL. Read paths may also rewrite the
//! region embedded in a URL.

use chrono::{DateTime, SecondsFormat, Utc};

/// Length of a millisecond-precision UTC timestamp, e.g. `2024-01-15T10:30:45.123Z`
const TIMESTAMP_LEN: usize = 24;

/// Fallback stem for uploads whose filename sanitizes to nothing
const DEFAULT_STEM: &str = "image";

/// Fallback extension when neither filename nor content type yields one
const DEFAULT_EXTENSION: &str = "bin";

/// Derive the object key for an upload.
///
/// Format: `{sanitized filename}-{ISO-8601 timestamp}.{extension}`
///
/// Two uploads of the same filename within the same millisecond collide.
pub fn derive_object_key(filename: &str, content_type: &str, now: DateTime<Utc>) -> String {
    let mut stem = sanitize_filename(filename);
    if stem.is_empty() {
        stem = DEFAULT_STEM.to_string();
    }

    let timestamp = now.to_rfc3339_opts(SecondsFormat::Millis, true);
    let extension = file_extension(filename)
        .or_else(|| extension_from_content_type(content_type))
        .unwrap_or_else(|| DEFAULT_EXTENSION.to_string());

    format!("{stem}-{timestamp}.{extension}")
}

/// Lower-case the filename and replace everything outside `[a-z0-9]` with `-`.
///
/// Works per `char`: a character outside the BMP maps to a single `-`.
fn sanitize_filename(filename: &str) -> String {
    filename
        .to_lowercase()
        .chars()
        .map(|c| match c {
            'a'..='z' | '0'..='9' => c,
            _ => '-',
        })
        .collect()
}

/// Lower-cased text after the last `.` of a filename
fn file_extension(filename: &str) -> Option<String> {
    let (_, extension) = filename.rsplit_once('.')?;
    is_extension(extension).then(|| extension.to_ascii_lowercase())
}

/// `image/png` -> `png`, `image/svg+xml` -> `svg`
fn extension_from_content_type(content_type: &str) -> Option<String> {
    let essence = content_type.split(';').next()?.trim();
    let (_, subtype) = essence.split_once('/')?;
    let subtype = subtype.split('+').next()?;
    is_extension(subtype).then(|| subtype.to_ascii_lowercase())
}

fn is_extension(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_alphanumeric())
}

/// Recover the object key from a stored image URL.
///
/// Handles both virtual-hosted URLs (`https://bucket.s3.region.amazonaws.com/key`)
/// and path-style URLs (`https://endpoint/bucket/key`). When the URL cannot be
/// parsed, the last path segment is used instead. Returns `None` when no key
/// can be recovered.
pub fn object_key_from_url(image_url: &str, bucket: &str) -> Option<String> {
    let key = match key_from_url_path(image_url, bucket) {
        Some(key) => key,
        None => {
            let segment = image_url.rsplit('/').next().unwrap_or_default();
            percent_decode(segment).unwrap_or_else(|| segment.to_string())
        }
    };

    (!key.is_empty()).then_some(key)
}

fn key_from_url_path(image_url: &str, bucket: &str) -> Option<String> {
    let path = url_path(image_url)?;
    let mut key = path.strip_prefix('/').unwrap_or(path);

    if !bucket.is_empty() {
        if let Some(rest) = key
            .strip_prefix(bucket)
            .and_then(|rest| rest.strip_prefix('/'))
        {
            key = rest;
        }
    }

    percent_decode(key)
}

/// Path component of an absolute URL: everything after the authority, before `?` or `#`
fn url_path(url: &str) -> Option<&str> {
    let (scheme, rest) = url.split_once("://")?;
    let valid_scheme = scheme
        .chars()
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic())
        && scheme
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'));
    if !valid_scheme {
        return None;
    }

    let authority_end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
    if authority_end == 0 {
        return None;
    }

    let after_authority = &rest[authority_end..];
    let path_end = after_authority.find(['?', '#']).unwrap_or(after_authority.len());
    Some(&after_authority[..path_end])
}

/// Percent-encode a key for use as a single URL path component.
///
/// Keeps the characters `encodeURIComponent` keeps: `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
pub fn encode_key(key: &str) -> String {
    let mut encoded = String::with_capacity(key.len());
    for byte in key.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

/// Decode `%XX` sequences. Returns `None` on malformed escapes or invalid UTF-8.
pub fn percent_decode(input: &str) -> Option<String> {
    let bytes = input.as_bytes();
    let mut decoded = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes.get(i + 1..i + 3)?;
            let hex = std::str::from_utf8(hex).ok()?;
            decoded.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            decoded.push(bytes[i]);
            i += 1;
        }
    }

    String::from_utf8(decoded).ok()
}

/// Replace the first region token (`us-east-1`, `eu-west-1`, ...) in `url`
/// with `target_region`. URLs without a region token are returned unchanged.
pub fn rewrite_region(url: &str, target_region: &str) -> String {
    match find_region(url) {
        Some((start, end)) => format!("{}{}{}", &url[..start], target_region, &url[end..]),
        None => url.to_string(),
    }
}

/// Byte range of the first substring shaped like `[a-z]{2}-[a-z]+-[0-9]+`.
pub(crate) fn find_region(haystack: &str) -> Option<(usize, usize)> {
    let bytes = haystack.as_bytes();

    for start in 0..bytes.len() {
        let mut i = start;

        // two-letter prefix
        if !(bytes.get(i).is_some_and(u8::is_ascii_lowercase)
            && bytes.get(i + 1).is_some_and(u8::is_ascii_lowercase)
            && bytes.get(i + 2) == Some(&b'-'))
        {
            continue;
        }
        i += 3;

        // area word
        let word_start = i;
        while bytes.get(i).is_some_and(u8::is_ascii_lowercase) {
            i += 1;
        }
        if i == word_start || bytes.get(i) != Some(&b'-') {
            continue;
        }
        i += 1;

        // ordinal
        let digits_start = i;
        while bytes.get(i).is_some_and(u8::is_ascii_digit) {
            i += 1;
        }
        if i == digits_start {
            continue;
        }

        return Some((start, i));
    }

    None
}

/// What an object key says about the image it stores
#[derive(Debug, Clone, PartialEq)]
pub struct KeyParts {
    /// Title recovered from the key
    pub title: String,
    /// Upload timestamp embedded in the key
    pub timestamp: Option<DateTime<Utc>>,
    /// File extension
    pub extension: Option<String>,
}

/// Split a key of the form `{title}-{timestamp}.{ext}` back into its parts.
///
/// This is a best-effort view: keys written by other tools fall back to
/// splitting on the last `-`, then to the last path segment.
pub fn split_object_key(key: &str) -> KeyParts {
    let name = key.rsplit('/').next().unwrap_or_default();

    if let Some(parts) = split_stamped(name) {
        return parts;
    }

    if let Some((title, rest)) = name.rsplit_once('-') {
        let extension = rest
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_string())
            .filter(|ext| !ext.is_empty());
        if !title.is_empty() {
            return KeyParts {
                title: title.to_string(),
                timestamp: None,
                extension,
            };
        }
    }

    KeyParts {
        title: if name.is_empty() {
            "Untitled".to_string()
        } else {
            name.to_string()
        },
        timestamp: None,
        extension: None,
    }
}

fn split_stamped(name: &str) -> Option<KeyParts> {
    let with_extension = name
        .rsplit_once('.')
        .filter(|(_, ext)| is_extension(ext))
        .and_then(|(stem, ext)| split_timestamp(stem).map(|(title, ts)| (title, ts, Some(ext))));

    let (title, timestamp, extension) =
        with_extension.or_else(|| split_timestamp(name).map(|(title, ts)| (title, ts, None)))?;

    Some(KeyParts {
        title: title.to_string(),
        timestamp: Some(timestamp),
        extension: extension.map(str::to_string),
    })
}

/// `{title}-{timestamp}` -> (title, timestamp)
fn split_timestamp(stem: &str) -> Option<(&str, DateTime<Utc>)> {
    let split = stem.len().checked_sub(TIMESTAMP_LEN)?;
    if !stem.is_char_boundary(split) {
        return None;
    }

    let (head, stamp) = stem.split_at(split);
    let title = head.strip_suffix('-')?;
    if title.is_empty() {
        return None;
    }

    let timestamp = DateTime::parse_from_rfc3339(stamp).ok()?.with_timezone(&Utc);
    Some((title, timestamp))
}
