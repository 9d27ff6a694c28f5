//! In-memory results panel and event log.

use std::collections::VecDeque;

use chrono::{DateTime, Local};
use ml_core::Detection;

const EVENT_LOG_CAPACITY: usize = 200;

#[derive(Debug, Clone, PartialEq)]
pub struct ResultEntry {
    pub time: String,
    pub label: String,
    pub confidence: f32,
}

impl ResultEntry {
    pub fn line(&self) -> String {
        format!(
            "[{}] Found: {} (Conf: {:.2})",
            self.time, self.label, self.confidence
        )
    }
}

#[derive(Debug, Default)]
pub struct ResultsLog {
    entries: Vec<ResultEntry>,
}

impl ResultsLog {
    pub fn record(&mut self, detections: &[Detection], at: DateTime<Local>) {
        let time = at.format("%H:%M:%S").to_string();
        self.entries
            .extend(detections.iter().map(|det| ResultEntry {
                time: time.clone(),
                label: det.label.clone(),
                confidence: det.confidence,
            }));
    }

    pub fn entries(&self) -> &[ResultEntry] {
        &self.entries
    }

    pub fn lines(&self) -> impl Iterator<Item = String> + '_ {
        self.entries.iter().map(ResultEntry::line)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Bounded history of status and arm messages, oldest dropped first.
#[derive(Debug)]
pub struct EventLog {
    lines: VecDeque<String>,
    capacity: usize,
}

impl Default for EventLog {
    fn default() -> Self {
        Self::with_capacity(EVENT_LOG_CAPACITY)
    }
}

impl EventLog {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            lines: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    pub fn push(&mut self, line: impl Into<String>) {
        if self.lines.len() == self.capacity {
            self.lines.pop_front();
        }
        self.lines.push_back(line.into());
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.lines.back().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use ml_core::BoundingBox;

    use super::*;

    #[test]
    fn results_render_like_the_panel() {
        let mut log = ResultsLog::default();
        let at = Local.with_ymd_and_hms(2024, 5, 1, 9, 8, 7).unwrap();
        log.record(
            &[Detection {
                label: "mouse".into(),
                confidence: 0.876,
                bbox: BoundingBox {
                    x1: 0,
                    y1: 0,
                    x2: 1,
                    y2: 1,
                },
            }],
            at,
        );
        assert_eq!(
            log.lines().collect::<Vec<_>>(),
            vec!["[09:08:07] Found: mouse (Conf: 0.88)".to_string()]
        );
        log.clear();
        assert!(log.is_empty());
    }

    #[test]
    fn event_log_drops_oldest_lines() {
        let mut log = EventLog::with_capacity(2);
        log.push("a");
        log.push("b");
        log.push("c");
        assert_eq!(log.lines().collect::<Vec<_>>(), vec!["b", "c"]);
        assert_eq!(log.last(), Some("c"));
    }
}
