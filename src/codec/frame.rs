use super::DEFAULT_MAX_FRAME_SIZE;
use crate::error::Error;
use bincode::error::DecodeError;
use bincode::{Decode, Encode};
use tracing::{error, trace, warn};

// ============================================================================
// Constants
// ============================================================================

const MAGIC: &[u8] = b"rvg!";
const MAGIC_SIZE: usize = MAGIC.len();
const VERSION_MAJOR: u8 = 0;
const VERSION_MINOR: u8 = 1;
const VERSION_SIZE: usize = 2; // major + minor
const BODY_SIZE_SIZE: usize = 4;
const HEADER_SIZE: usize = MAGIC_SIZE + VERSION_SIZE + BODY_SIZE_SIZE;
const INITIAL_BODY_CAPACITY: usize = 128;
// Upper bound on the bytes a body may claim while decoding, including the
// capacity of length-prefixed lists and strings.
const DECODE_LIMIT: usize = DEFAULT_MAX_FRAME_SIZE;

// ============================================================================
// Frame Serialization and Deserialization
// ============================================================================

/// Serializes a frame body to its wire format.
///
/// Wire format: \[MAGIC\]\[VERSION\]\[body_size\]\[body\]
/// - MAGIC: 4 bytes ("rvg!") - helps detect protocol mismatches
/// - VERSION: 2 bytes (major, minor) - protocol version
/// - body_size: 4 bytes (u32 LE) - length of the body
/// - body: bincode encoding of the call or response
pub(crate) fn encode_frame<T: Encode>(body: &T) -> Result<Vec<u8>, Error> {
    let mut buf = Vec::with_capacity(HEADER_SIZE + INITIAL_BODY_CAPACITY);

    buf.extend_from_slice(MAGIC);
    buf.push(VERSION_MAJOR);
    buf.push(VERSION_MINOR);

    // Reserve space for body size (will be filled in later)
    let body_size_pos = buf.len();
    buf.extend([0u8; BODY_SIZE_SIZE]);

    bincode::encode_into_std_write(body, &mut buf, bincode::config::standard())
        .map_err(|e| Error::MalformedData(format!("bincode: {e}")))?;

    let body_len = u32::try_from(buf.len() - HEADER_SIZE).map_err(|_| Error::FrameTooLarge {
        size: buf.len() - HEADER_SIZE,
        limit: u32::MAX as usize,
    })?;
    buf[body_size_pos..body_size_pos + BODY_SIZE_SIZE].copy_from_slice(&body_len.to_le_bytes());

    trace!(len = buf.len(), "Encoded frame");
    Ok(buf)
}

/// Deserializes one frame from the front of `buf`.
///
/// Designed for streaming: returns `Ok(None)` while the buffer holds less than
/// a complete frame, so the caller can wait for more bytes.
///
/// Returns:
/// - `Ok(Some((body, bytes_read)))` - one complete frame
/// - `Ok(None)` - not enough data yet
/// - `Err(_)` - bad magic, version mismatch, oversized or malformed body
pub(crate) fn decode_frame<T: Decode<()>>(
    buf: &[u8],
    max_body_size: usize,
) -> Result<Option<(T, usize)>, Error> {
    if buf.len() < HEADER_SIZE {
        return Ok(None);
    }

    if &buf[0..MAGIC_SIZE] != MAGIC {
        error!(
            expected = ?MAGIC,
            received = ?&buf[0..MAGIC_SIZE],
            "Invalid magic bytes in frame header"
        );
        return Err(Error::InvalidMagicBytes);
    }

    let version_major = buf[MAGIC_SIZE];
    let version_minor = buf[MAGIC_SIZE + 1];
    if version_major != VERSION_MAJOR || version_minor != VERSION_MINOR {
        error!(
            expected_major = VERSION_MAJOR,
            expected_minor = VERSION_MINOR,
            received_major = version_major,
            received_minor = version_minor,
            "Protocol version mismatch"
        );
        return Err(Error::VersionMismatch {
            expected_major: VERSION_MAJOR,
            expected_minor: VERSION_MINOR,
            received_major: version_major,
            received_minor: version_minor,
        });
    }

    let body_size_bytes: [u8; BODY_SIZE_SIZE] = match buf
        .get(MAGIC_SIZE + VERSION_SIZE..HEADER_SIZE)
        .and_then(|s| s.try_into().ok())
    {
        Some(bytes) => bytes,
        None => return Ok(None),
    };
    let body_size = u32::from_le_bytes(body_size_bytes) as usize;
    if body_size > max_body_size {
        warn!(body_size, max_body_size, "Frame exceeds size limit");
        return Err(Error::FrameTooLarge {
            size: body_size,
            limit: max_body_size,
        });
    }

    let frame_size = HEADER_SIZE + body_size;
    if buf.len() < frame_size {
        return Ok(None); // Wait for more data
    }

    let body = &buf[HEADER_SIZE..frame_size];
    let config = bincode::config::standard().with_limit::<DECODE_LIMIT>();
    let (decoded, used) = bincode::decode_from_slice::<T, _>(body, config).map_err(|e| match e {
        DecodeError::LimitExceeded => {
            warn!(body_size, limit = DECODE_LIMIT, "Frame body claims more than the decode limit");
            Error::FrameTooLarge {
                size: body_size,
                limit: DECODE_LIMIT,
            }
        }
        e => Error::MalformedData(format!("bincode: {e}")),
    })?;
    if used != body_size {
        return Err(Error::MalformedData(format!(
            "frame body has {} trailing bytes",
            body_size - used
        )));
    }

    trace!(len = frame_size, "Decoded frame");
    Ok(Some((decoded, frame_size)))
}
