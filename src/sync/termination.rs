//! When to stop paging through the article list.

use std::fmt;

/// Default number of consecutive pages without unknown items before stopping.
pub const DEFAULT_CAUGHT_UP_PAGES: u32 = 2;

/// Why a sweep ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The upstream returned a page with no items.
    EmptyPage,
    /// Enough consecutive pages held only known items.
    CaughtUp,
    /// The upstream's last page was processed.
    LastPage,
    /// The configured page limit was reached.
    PageLimit,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::EmptyPage => "empty page",
            Self::CaughtUp => "caught up",
            Self::LastPage => "last page",
            Self::PageLimit => "page limit",
        };
        f.write_str(text)
    }
}

/// Stop conditions for one list sweep.
///
/// `caught_up_pages = 0` disables the caught-up heuristic, leaving the
/// upstream's last page, an empty page, and `max_pages` as the only stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TerminationPolicy {
    max_pages: Option<u32>,
    caught_up_pages: u32,
}

impl Default for TerminationPolicy {
    fn default() -> Self {
        Self {
            max_pages: None,
            caught_up_pages: DEFAULT_CAUGHT_UP_PAGES,
        }
    }
}

impl TerminationPolicy {
    /// Creates a policy. `max_pages` of `None` or `Some(0)` means unlimited.
    #[must_use]
    pub fn new(max_pages: Option<u32>, caught_up_pages: u32) -> Self {
        Self {
            max_pages: max_pages.filter(|pages| *pages > 0),
            caught_up_pages,
        }
    }

    #[must_use]
    pub fn max_pages(&self) -> Option<u32> {
        self.max_pages
    }

    #[must_use]
    pub fn caught_up_pages(&self) -> u32 {
        self.caught_up_pages
    }

    /// The same policy with the caught-up heuristic switched off.
    ///
    /// Used until a sweep has covered the whole listing once.
    #[must_use]
    pub fn without_caught_up(self) -> Self {
        Self {
            caught_up_pages: 0,
            ..self
        }
    }

    /// Starts tracking a sweep.
    #[must_use]
    pub fn tracker(&self) -> SweepTracker {
        SweepTracker {
            policy: *self,
            consecutive_known_pages: 0,
            pages_seen: 0,
        }
    }
}

/// Running state of one sweep.
#[derive(Debug, Clone)]
pub struct SweepTracker {
    policy: TerminationPolicy,
    consecutive_known_pages: u32,
    /// Pages processed by this run; a resumed sweep starts mid-listing.
    pages_seen: u32,
}

impl SweepTracker {
    /// Records a processed page and decides whether the sweep ends here.
    ///
    /// `max_pages` limits the pages processed by this run, not the page
    /// number. `unknown_items` counts items that were absent from the manifest when
    /// the page arrived, whether or not fetching them succeeded.
    pub fn after_page(
        &mut self,
        page: u32,
        upstream_max_page: u32,
        items: usize,
        unknown_items: usize,
    ) -> Option<StopReason> {
        self.pages_seen += 1;
        if items == 0 {
            return Some(StopReason::EmptyPage);
        }

        if unknown_items == 0 {
            self.consecutive_known_pages += 1;
        } else {
            self.consecutive_known_pages = 0;
        }

        if self.policy.caught_up_pages > 0
            && self.consecutive_known_pages >= self.policy.caught_up_pages
        {
            return Some(StopReason::CaughtUp);
        }
        if page >= upstream_max_page {
            return Some(StopReason::LastPage);
        }
        if self.policy.max_pages.is_some_and(|max| self.pages_seen >= max) {
            return Some(StopReason::PageLimit);
        }
        None
    }
}
