//! Per-cycle suppression window tracking.

use crate::policy::WindowBoundary;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use suppression_common::{AlertRecord, GroupKey};

/// Outcome of admitting one document into a group window.
#[derive(Debug, Clone, PartialEq)]
pub struct Admission {
    /// Id of the prior alert being extended; `None` while the window will
    /// become a new alert.
    pub alert_id: Option<String>,
    pub is_new_alert: bool,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub doc_count: u64,
}

/// Accumulated state for one group key during a cycle.
#[derive(Debug, Clone)]
pub struct GroupWindow {
    pub key: GroupKey,
    /// Prior open alert this window extends.
    pub base: Option<AlertRecord>,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    /// Documents contributed during this cycle.
    pub contributed: u64,
    /// Earliest contributing document (suppression timestamp, then input order).
    pub first_document_id: String,
    pub first_suppression_ts: DateTime<Utc>,
    pub first_event_ts: DateTime<Utc>,
    /// Latest suppression timestamp contributed during this cycle.
    pub last_suppression_ts: DateTime<Utc>,
}

impl GroupWindow {
    pub fn is_new_alert(&self) -> bool {
        self.base.is_none()
    }

    /// Suppressed documents attributed to the alert after this cycle.
    pub fn docs_count(&self) -> u64 {
        match self.base.as_ref().and_then(AlertRecord::docs_count) {
            Some(prior) => prior + self.contributed,
            None => self.contributed.saturating_sub(1),
        }
    }

    fn admission(&self) -> Admission {
        Admission {
            alert_id: self.base.as_ref().map(|alert| alert.id.clone()),
            is_new_alert: self.is_new_alert(),
            window_start: self.start,
            window_end: self.end,
            doc_count: self.docs_count(),
        }
    }
}

/// Document being admitted.
#[derive(Debug, Clone, Copy)]
pub struct Contribution<'a> {
    pub document_id: &'a str,
    pub suppression_ts: DateTime<Utc>,
    pub event_ts: DateTime<Utc>,
}

/// Tracks one window per group key, in first-seen order.
pub struct WindowTracker {
    window: Option<Duration>,
    boundary: WindowBoundary,
    windows: Vec<GroupWindow>,
    index: HashMap<GroupKey, usize>,
}

impl WindowTracker {
    pub fn new(window: Option<Duration>, boundary: WindowBoundary) -> Self {
        Self {
            window,
            boundary,
            windows: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Admits a document into the window for `key`.
    ///
    /// Within a cycle every document of a key lands in the same window. The
    /// first document decides whether that window extends `existing` (open,
    /// with a duration configured, and within it) or starts a new alert.
    pub fn admit(
        &mut self,
        key: &GroupKey,
        doc: Contribution<'_>,
        existing: Option<&AlertRecord>,
    ) -> Admission {
        if let Some(&slot) = self.index.get(key) {
            let window = &mut self.windows[slot];
            window.end = window.end.max(doc.suppression_ts);
            window.last_suppression_ts = window.last_suppression_ts.max(doc.suppression_ts);
            if window.base.is_none() {
                window.start = window.start.min(doc.suppression_ts);
            }
            if doc.suppression_ts < window.first_suppression_ts {
                window.first_suppression_ts = doc.suppression_ts;
                window.first_event_ts = doc.event_ts;
                window.first_document_id = doc.document_id.to_string();
            }
            window.contributed += 1;
            return window.admission();
        }

        let mut window = GroupWindow {
            key: key.clone(),
            base: None,
            start: doc.suppression_ts,
            end: doc.suppression_ts,
            contributed: 1,
            first_document_id: doc.document_id.to_string(),
            first_suppression_ts: doc.suppression_ts,
            first_event_ts: doc.event_ts,
            last_suppression_ts: doc.suppression_ts,
        };
        self.attach(&mut window, existing);
        let admission = window.admission();

        self.index.insert(key.clone(), self.windows.len());
        self.windows.push(window);
        admission
    }

    /// Re-evaluates a window against a freshly read prior alert, keeping the
    /// documents contributed during this cycle. Used after a write conflict.
    pub fn rebase(&self, window: &GroupWindow, existing: Option<&AlertRecord>) -> GroupWindow {
        let mut rebased = window.clone();
        rebased.base = None;
        rebased.start = window.first_suppression_ts;
        rebased.end = window.last_suppression_ts;
        self.attach(&mut rebased, existing);
        rebased
    }

    fn attach(&self, window: &mut GroupWindow, existing: Option<&AlertRecord>) {
        let Some(alert) = existing.filter(|alert| self.extends(alert, window.first_suppression_ts))
        else {
            return;
        };
        if let Some((start, end)) = alert.suppression_window() {
            window.start = start;
            window.end = end.max(window.last_suppression_ts);
            window.base = Some(alert.clone());
        }
    }

    fn extends(&self, alert: &AlertRecord, ts: DateTime<Utc>) -> bool {
        let Some(window) = self.window else {
            return false;
        };
        if !alert.is_open() {
            return false;
        }
        match alert.suppression_end() {
            Some(end) => self.boundary.within(ts - end, window),
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }

    /// Windows in first-seen order.
    pub fn into_windows(self) -> Vec<GroupWindow> {
        self.windows
    }
}
