//! Cancellable base64 encoding of document bodies.

use base64::{engine::general_purpose::STANDARD, Engine};
use tokio_util::sync::CancellationToken;

use super::{cancelled, ImportResult};

/// Encode `data` chunk by chunk, yielding between chunks.
///
/// The chunk size is rounded down to a multiple of 3 so the concatenated
/// output carries padding only at the very end.
pub async fn encode_base64(
    data: &[u8],
    chunk_size: usize,
    cancel: &CancellationToken,
) -> ImportResult<String> {
    let chunk_size = (chunk_size / 3).max(1) * 3;
    let mut out = String::with_capacity(data.len().div_ceil(3) * 4);

    for chunk in data.chunks(chunk_size) {
        if cancel.is_cancelled() {
            return Err(cancelled("encode"));
        }
        STANDARD.encode_string(chunk, &mut out);
        tokio::task::yield_now().await;
    }

    if cancel.is_cancelled() {
        return Err(cancelled("encode"));
    }
    Ok(out)
}
