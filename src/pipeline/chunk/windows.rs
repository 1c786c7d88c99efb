//! Micro-windows over long chunks.
//!
//! Long passages are judged again in overlapping windows so content near
//! the end of a chunk is not lost to context truncation. All values are
//! char counts.

/// Chunks longer than this are additionally judged per window.
pub const MICRO_WINDOW_THRESHOLD: usize = 4000;
pub const MICRO_WINDOW_SIZE: usize = 3000;
pub const MICRO_WINDOW_OVERLAP: usize = 600;

/// Half-open char range of one window within its chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: usize,
    pub end: usize,
}

/// Windows for a chunk of `len` chars; empty when at or under the threshold.
pub fn micro_windows(len: usize) -> Vec<Window> {
    plan_windows(len, MICRO_WINDOW_THRESHOLD, MICRO_WINDOW_SIZE, MICRO_WINDOW_OVERLAP)
}

fn plan_windows(len: usize, threshold: usize, size: usize, overlap: usize) -> Vec<Window> {
    if len <= threshold || size == 0 {
        return Vec::new();
    }
    let step = size.saturating_sub(overlap).max(1);
    let mut windows = Vec::new();
    let mut start = 0;
    loop {
        let end = (start + size).min(len);
        windows.push(Window { start, end });
        if end == len {
            break;
        }
        start += step;
    }
    windows
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_chunks_have_no_windows() {
        assert!(micro_windows(0).is_empty());
        assert!(micro_windows(MICRO_WINDOW_THRESHOLD).is_empty());
    }

    #[test]
    fn windows_overlap_and_cover_to_end() {
        let windows = micro_windows(7000);
        assert_eq!(
            windows,
            vec![
                Window { start: 0, end: 3000 },
                Window { start: 2400, end: 5400 },
                Window { start: 4800, end: 7000 },
            ]
        );
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end - pair[1].start, MICRO_WINDOW_OVERLAP);
        }
    }

    #[test]
    fn just_over_threshold_gets_two_windows() {
        let windows = micro_windows(MICRO_WINDOW_THRESHOLD + 1);
        assert_eq!(windows.len(), 2);
        assert_eq!(windows.last().unwrap().end, MICRO_WINDOW_THRESHOLD + 1);
    }
}
