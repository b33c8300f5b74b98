//! Incremental-delivery emulation.
//!
//! [`emulated`] replays a finished reply word by word with a fixed pause
//! between chunks. It stands in for server-side streaming; the pause is UI
//! pacing only.

use std::time::Duration;

use futures_util::stream::{self, BoxStream, StreamExt};

/// Ordered, finite sequence of reply chunks.
pub type TextStream = BoxStream<'static, String>;

/// Split `text` into word chunks. Every chunk but the last keeps one
/// trailing space, so concatenating the chunks gives the words back joined
/// by single spaces.
pub fn word_chunks(text: &str) -> Vec<String> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let last = words.len().saturating_sub(1);
    words
        .into_iter()
        .enumerate()
        .map(|(i, w)| if i < last { format!("{w} ") } else { w.to_string() })
        .collect()
}

/// First chunk immediately, then one chunk per `delay`.
pub fn emulated(text: String, delay: Duration) -> TextStream {
    stream::iter(word_chunks(&text).into_iter().enumerate())
        .then(move |(i, chunk)| async move {
            if i > 0 && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            chunk
        })
        .boxed()
}
