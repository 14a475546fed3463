//! Scroll-driven incremental loading of an issue's message thread.

use std::time::{Duration, Instant};

use tracing::{debug, trace, warn};

use crate::api::PAGE_SIZE;

/// Minimum spacing between two scroll evaluations.
pub const SCROLL_THROTTLE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PaginationCursor {
    pub current_index: usize,
    pub is_loading: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
}

/// The server's echo of a page it returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageAck {
    pub offset: usize,
    pub returned: usize,
    pub total_events: usize,
}

/// `idle -> loading -> idle` per page, one request in flight at most.
#[derive(Debug, Clone)]
pub struct Paginator {
    cursor: PaginationCursor,
    total_events: usize,
    threshold: usize,
    throttle: Duration,
    last_evaluated: Option<Instant>,
    exhausted: bool,
}

impl Paginator {
    /// `initial` is the number of events already delivered with the issue.
    pub fn new(initial: usize, total_events: usize, threshold: usize) -> Self {
        Self {
            cursor: PaginationCursor {
                current_index: initial,
                is_loading: false,
            },
            total_events,
            threshold,
            throttle: SCROLL_THROTTLE,
            last_evaluated: None,
            exhausted: false,
        }
    }

    pub fn cursor(&self) -> PaginationCursor {
        self.cursor
    }

    pub fn total_events(&self) -> usize {
        self.total_events
    }

    pub fn has_more(&self) -> bool {
        !self.exhausted && self.cursor.current_index < self.total_events
    }

    /// Evaluates a scroll event. Returns the page to request when the reader
    /// is within `threshold` rows of the end and more events exist; the
    /// paginator is then `loading` until [`Self::complete`] or [`Self::fail`].
    pub fn on_scroll(&mut self, remaining_rows: usize, now: Instant) -> Option<PageRequest> {
        if let Some(last) = self.last_evaluated
            && now.saturating_duration_since(last) < self.throttle
        {
            trace!("scroll evaluation throttled");
            return None;
        }
        self.last_evaluated = Some(now);
        if self.cursor.is_loading || remaining_rows >= self.threshold || !self.has_more() {
            return None;
        }
        self.cursor.is_loading = true;
        let request = PageRequest {
            offset: self.cursor.current_index,
            limit: PAGE_SIZE,
        };
        debug!(?request, "requesting next page");
        Some(request)
    }

    /// Advances strictly from the server-echoed values.
    pub fn complete(&mut self, ack: PageAck) {
        self.cursor.is_loading = false;
        self.total_events = ack.total_events;
        if ack.returned == 0 {
            debug!(offset = ack.offset, "empty page, thread exhausted");
            self.exhausted = true;
            return;
        }
        self.cursor.current_index = ack.offset + ack.returned;
    }

    /// Leaves the cursor where it was so the next qualifying scroll retries.
    pub fn fail(&mut self) {
        warn!(
            offset = self.cursor.current_index,
            "page request failed, will retry on next scroll"
        );
        self.cursor.is_loading = false;
    }

    /// `Loaded N of M` while more events remain, otherwise nothing.
    pub fn indicator(&self) -> Option<String> {
        self.has_more().then(|| {
            format!(
                "Loaded {} of {}",
                self.cursor.current_index, self.total_events
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const THRESHOLD: usize = 10;

    fn later(start: Instant, ms: u64) -> Instant {
        start + Duration::from_millis(ms)
    }

    #[test]
    fn walks_a_45_event_thread() {
        let start = Instant::now();
        let mut p = Paginator::new(20, 45, THRESHOLD);
        assert_eq!(p.indicator().as_deref(), Some("Loaded 20 of 45"));

        let req = p.on_scroll(3, start).expect("first page");
        assert_eq!(req, PageRequest { offset: 20, limit: 20 });
        p.complete(PageAck {
            offset: 20,
            returned: 20,
            total_events: 45,
        });
        assert_eq!(p.cursor().current_index, 40);

        let req = p.on_scroll(3, later(start, 600)).expect("second page");
        assert_eq!(req, PageRequest { offset: 40, limit: 20 });
        p.complete(PageAck {
            offset: 40,
            returned: 5,
            total_events: 45,
        });
        assert_eq!(p.cursor().current_index, 45);
        assert!(!p.has_more());
        assert_eq!(p.indicator(), None);
        assert_eq!(p.on_scroll(0, later(start, 1200)), None);
    }

    #[test]
    fn scrolls_inside_throttle_window_fetch_once() {
        let start = Instant::now();
        let mut p = Paginator::new(20, 100, THRESHOLD);
        let fetched = (0..10)
            .filter_map(|i| p.on_scroll(0, later(start, i * 40)))
            .count();
        assert_eq!(fetched, 1);
    }

    #[test]
    fn loading_flag_blocks_overlapping_requests() {
        let start = Instant::now();
        let mut p = Paginator::new(20, 100, THRESHOLD);
        assert!(p.on_scroll(0, start).is_some());
        assert!(p.on_scroll(0, later(start, 600)).is_none());
        assert!(p.cursor().is_loading);
    }

    #[test]
    fn far_from_bottom_does_not_fetch() {
        let mut p = Paginator::new(20, 100, THRESHOLD);
        assert!(p.on_scroll(THRESHOLD, Instant::now()).is_none());
        assert!(!p.cursor().is_loading);
    }

    #[test]
    fn failure_keeps_cursor_for_retry() {
        let start = Instant::now();
        let mut p = Paginator::new(20, 100, THRESHOLD);
        assert!(p.on_scroll(0, start).is_some());
        p.fail();
        assert_eq!(p.cursor(), PaginationCursor { current_index: 20, is_loading: false });
        let retry = p.on_scroll(0, later(start, 500)).expect("retry");
        assert_eq!(retry.offset, 20);
    }

    #[test]
    fn empty_page_stops_the_loop() {
        let start = Instant::now();
        let mut p = Paginator::new(20, 45, THRESHOLD);
        assert!(p.on_scroll(0, start).is_some());
        p.complete(PageAck {
            offset: 20,
            returned: 0,
            total_events: 45,
        });
        assert_eq!(p.cursor().current_index, 20);
        assert!(p.on_scroll(0, later(start, 600)).is_none());
        assert!(p.on_scroll(0, later(start, 1200)).is_none());
    }

    #[test]
    fn cursor_follows_server_echo_not_local_increment() {
        let start = Instant::now();
        let mut p = Paginator::new(20, 60, THRESHOLD);
        assert!(p.on_scroll(0, start).is_some());
        p.complete(PageAck {
            offset: 18,
            returned: 20,
            total_events: 60,
        });
        assert_eq!(p.cursor().current_index, 38);
    }
}
