//! Pagination cursor shared by every listing endpoint.
//!
//! A [`PageCursor`] drives "fetch page N, stop at N_max or when a
//! terminator is seen" loops. One cursor exists per listing operation and
//! is discarded when the loop terminates. The upstream terminator (an empty
//! page or an absent continuation token) is reported by the listing driver
//! via [`PageCursor::mark_exhausted`]; the page ceiling is enforced by the
//! cursor itself.
//!
//! Offsets start at the minimum page's implied offset,
//! `(min_page - 1) * page_size`, so callers can resume from an arbitrary
//! starting page rather than re-scanning from page 1.

use thiserror::Error;

/// Page size of the listing APIs the original targeted.
pub const DEFAULT_PAGE_SIZE: u32 = 30;

/// Error parsing a user-supplied page range string.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PageRangeError {
    /// The string was not of the form `""`, `"N"`, or `"A-B"`.
    #[error("invalid page range {input:?}: expected \"\", \"N\", or \"A-B\"")]
    Malformed {
        /// The offending input.
        input: String,
    },

    /// Pages are 1-indexed; zero is not a page.
    #[error("invalid page range {input:?}: pages are numbered from 1")]
    ZeroPage {
        /// The offending input.
        input: String,
    },
}

/// One step of a pagination loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageStep {
    /// 1-indexed page number.
    pub page: u32,
    /// Item offset implied by the page number and page size.
    pub offset: u32,
}

/// Per-listing pagination state.
///
/// # Example
///
/// ```
/// use fetchkit::PageCursor;
///
/// let mut cursor = PageCursor::bounded(2, 4, 30);
/// let pages: Vec<u32> = std::iter::from_fn(|| cursor.next().map(|s| s.page)).collect();
/// assert_eq!(pages, vec![2, 3, 4]);
/// assert!(cursor.is_done());
/// ```
#[derive(Debug, Clone)]
pub struct PageCursor {
    max_page: Option<u32>,
    page_size: u32,
    next_page: u32,
    next_offset: u32,
    exhausted: bool,
}

impl PageCursor {
    /// Creates a cursor over pages `min_page..=max_page`.
    ///
    /// `min_page` is clamped to at least 1. If `min_page > max_page` the
    /// cursor yields zero steps.
    #[must_use]
    pub fn bounded(min_page: u32, max_page: u32, page_size: u32) -> Self {
        Self::new(min_page, Some(max_page), page_size)
    }

    /// Creates a cursor from `min_page` with no upper bound; termination
    /// then depends entirely on the upstream terminator.
    #[must_use]
    pub fn unbounded(min_page: u32, page_size: u32) -> Self {
        Self::new(min_page, None, page_size)
    }

    /// Creates a cursor from a parsed `(min, max)` pair, e.g. the output of
    /// [`parse_page_range`].
    #[must_use]
    pub fn new(min_page: u32, max_page: Option<u32>, page_size: u32) -> Self {
        let min_page = min_page.max(1);
        Self {
            max_page,
            page_size,
            next_page: min_page,
            next_offset: (min_page - 1) * page_size,
            exhausted: false,
        }
    }

    /// Yields the next page to fetch, or `None` when the loop is done.
    ///
    /// The page number strictly increases across calls; the offset advances
    /// by `page_size` per step.
    pub fn next(&mut self) -> Option<PageStep> {
        if self.exhausted {
            return None;
        }
        if let Some(max_page) = self.max_page {
            if self.next_page > max_page {
                self.exhausted = true;
                return None;
            }
        }

        let step = PageStep {
            page: self.next_page,
            offset: self.next_offset,
        };
        self.next_page += 1;
        self.next_offset += self.page_size;
        Some(step)
    }

    /// Records that the upstream reported zero new items or no continuation
    /// token; subsequent [`next`](Self::next) calls yield `None`.
    pub fn mark_exhausted(&mut self) {
        self.exhausted = true;
    }

    /// Returns true once the loop has terminated, either by page ceiling or
    /// upstream terminator.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.exhausted
            || self
                .max_page
                .is_some_and(|max_page| self.next_page > max_page)
    }

    /// Returns the configured page size.
    #[must_use]
    pub fn page_size(&self) -> u32 {
        self.page_size
    }
}

/// Parses a user-supplied page range string into `(min_page, max_page)`.
///
/// Accepted forms, mirroring the original's page-number arguments:
/// - `""` - every page from 1 (unbounded)
/// - `"3"` - exactly page 3
/// - `"2-5"` - pages 2 through 5; a reversed range is swapped
///
/// # Errors
///
/// Returns [`PageRangeError`] for non-numeric input or a zero page number.
pub fn parse_page_range(input: &str) -> Result<(u32, Option<u32>), PageRangeError> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Ok((1, None));
    }

    let parse_one = |part: &str| -> Result<u32, PageRangeError> {
        let page: u32 = part.trim().parse().map_err(|_| PageRangeError::Malformed {
            input: input.to_string(),
        })?;
        if page == 0 {
            return Err(PageRangeError::ZeroPage {
                input: input.to_string(),
            });
        }
        Ok(page)
    };

    match trimmed.split_once('-') {
        Some((low, high)) => {
            let low = parse_one(low)?;
            let high = parse_one(high)?;
            if low > high {
                Ok((high, Some(low)))
            } else {
                Ok((low, Some(high)))
            }
        }
        None => {
            let page = parse_one(trimmed)?;
            Ok((page, Some(page)))
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn drain(cursor: &mut PageCursor) -> Vec<PageStep> {
        std::iter::from_fn(|| cursor.next()).collect()
    }

    // ==================== PageCursor Tests ====================

    #[test]
    fn test_bounded_cursor_pages_and_offsets() {
        let mut cursor = PageCursor::bounded(2, 4, 30);
        let steps = drain(&mut cursor);
        assert_eq!(
            steps.iter().map(|s| s.page).collect::<Vec<_>>(),
            vec![2, 3, 4]
        );
        assert_eq!(
            steps.iter().map(|s| s.offset).collect::<Vec<_>>(),
            vec![30, 60, 90]
        );
        assert!(cursor.is_done());
        assert!(cursor.next().is_none());
    }

    #[test]
    fn test_unbounded_cursor_stops_on_mark_exhausted() {
        let mut cursor = PageCursor::unbounded(1, 30);
        let mut pages = Vec::new();
        while let Some(step) = cursor.next() {
            pages.push(step.page);
            if step.page == 3 {
                // Upstream returned zero entities on page 3.
                cursor.mark_exhausted();
            }
        }
        assert_eq!(pages, vec![1, 2, 3]);
        assert!(cursor.is_done());
    }

    #[test]
    fn test_min_above_max_yields_zero_steps() {
        let mut cursor = PageCursor::bounded(5, 2, 30);
        assert!(cursor.next().is_none());
        assert!(cursor.is_done());
    }

    #[test]
    fn test_offset_resumes_from_min_page() {
        let mut cursor = PageCursor::unbounded(4, 25);
        let step = cursor.next().unwrap();
        assert_eq!(step.page, 4);
        assert_eq!(step.offset, 75);
    }

    #[test]
    fn test_zero_min_page_clamped_to_one() {
        let mut cursor = PageCursor::unbounded(0, 30);
        let step = cursor.next().unwrap();
        assert_eq!(step.page, 1);
        assert_eq!(step.offset, 0);
    }

    #[test]
    fn test_single_page_cursor() {
        let mut cursor = PageCursor::bounded(7, 7, 30);
        let steps = drain(&mut cursor);
        assert_eq!(steps, vec![PageStep { page: 7, offset: 180 }]);
    }

    // ==================== parse_page_range Tests ====================

    #[test]
    fn test_parse_empty_is_unbounded() {
        assert_eq!(parse_page_range("").unwrap(), (1, None));
        assert_eq!(parse_page_range("   ").unwrap(), (1, None));
    }

    #[test]
    fn test_parse_single_page() {
        assert_eq!(parse_page_range("3").unwrap(), (3, Some(3)));
    }

    #[test]
    fn test_parse_range() {
        assert_eq!(parse_page_range("2-5").unwrap(), (2, Some(5)));
        assert_eq!(parse_page_range(" 2 - 5 ").unwrap(), (2, Some(5)));
    }

    #[test]
    fn test_parse_reversed_range_swapped() {
        assert_eq!(parse_page_range("5-2").unwrap(), (2, Some(5)));
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(matches!(
            parse_page_range("abc"),
            Err(PageRangeError::Malformed { .. })
        ));
        assert!(matches!(
            parse_page_range("1-x"),
            Err(PageRangeError::Malformed { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_zero() {
        assert!(matches!(
            parse_page_range("0"),
            Err(PageRangeError::ZeroPage { .. })
        ));
        assert!(matches!(
            parse_page_range("0-3"),
            Err(PageRangeError::ZeroPage { .. })
        ));
    }
}
