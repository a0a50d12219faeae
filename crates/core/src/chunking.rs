use crate::error::QaError;
use crate::models::QaOptions;
use serde::{Deserialize, Serialize};

/// Split points in order of preference. The empty separator splits between characters.
pub const DEFAULT_SEPARATORS: [&str; 4] = ["\n\n", "\n", " ", ""];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl ChunkingConfig {
    pub fn new(max_chars: usize, overlap_chars: usize) -> Result<Self, QaError> {
        if max_chars == 0 {
            return Err(QaError::InvalidConfiguration(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if overlap_chars >= max_chars {
            return Err(QaError::InvalidConfiguration(format!(
                "chunk overlap ({overlap_chars}) must be less than chunk size ({max_chars})"
            )));
        }
        Ok(Self {
            max_chars,
            overlap_chars,
        })
    }
}

impl TryFrom<&QaOptions> for ChunkingConfig {
    type Error = QaError;

    fn try_from(value: &QaOptions) -> Result<Self, Self::Error> {
        Self::new(value.chunk_size, value.chunk_overlap)
    }
}

/// Splits `text` into chunks of at most `chunk_size` characters, each chunk after
/// the first repeating the last `overlap` characters of its predecessor.
pub fn split_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<String>, QaError> {
    let config = ChunkingConfig::new(chunk_size, overlap)?;
    Ok(split_with_separators(text, config, &DEFAULT_SEPARATORS))
}

/// Like [`split_text`] with a caller-chosen separator list.
///
/// Each chunk ends after the coarsest separator that fits its window. Only when
/// no separator fits is the window cut between characters, and only if `""` is
/// in `separators`; otherwise a run with no split point may produce a chunk
/// longer than `max_chars`.
pub fn split_with_separators(text: &str, config: ChunkingConfig, separators: &[&str]) -> Vec<String> {
    if text.is_empty() {
        return Vec::new();
    }

    // Byte offset of every char start, followed by the text length.
    let char_offsets: Vec<usize> = text
        .char_indices()
        .map(|(offset, _)| offset)
        .chain(std::iter::once(text.len()))
        .collect();
    let total = char_offsets.len() - 1;

    let levels = split_points(text, separators, &char_offsets);
    let splits_chars = separators.contains(&"");

    let mut chunks = Vec::new();
    let mut start = 0;
    let mut previous_end = 0;

    loop {
        let limit = start + config.max_chars;
        // The next chunk's overlap must fall inside this one.
        let min_end = (previous_end + 1).max(start + config.overlap_chars);
        let end = if limit >= total {
            total
        } else {
            levels
                .iter()
                .find_map(|points| last_point_within(points, min_end, limit))
                .unwrap_or_else(|| {
                    if splits_chars {
                        limit
                    } else {
                        levels
                            .iter()
                            .filter_map(|points| first_point_after(points, limit))
                            .min()
                            .unwrap_or(total)
                    }
                })
        };

        chunks.push(text[char_offsets[start]..char_offsets[end]].to_string());
        if end >= total {
            break;
        }

        previous_end = end;
        start = end - config.overlap_chars;
    }

    chunks
}

/// Char index just past every occurrence of each non-empty separator, one
/// ascending list per separator in preference order.
fn split_points(text: &str, separators: &[&str], char_offsets: &[usize]) -> Vec<Vec<usize>> {
    separators
        .iter()
        .filter(|separator| !separator.is_empty())
        .map(|separator| {
            text.match_indices(separator)
                .filter_map(|(offset, matched)| {
                    char_offsets.binary_search(&(offset + matched.len())).ok()
                })
                .collect()
        })
        .collect()
}

fn last_point_within(points: &[usize], min: usize, max: usize) -> Option<usize> {
    let below = points.partition_point(|&point| point <= max);
    below
        .checked_sub(1)
        .map(|index| points[index])
        .filter(|&point| point >= min)
}

fn first_point_after(points: &[usize], max: usize) -> Option<usize> {
    points.get(points.partition_point(|&point| point <= max)).copied()
}
