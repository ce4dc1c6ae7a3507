//! Corruption heuristic
//!
//! A cheap plausibility check applied to every note and response before
//! it is handed out or carried through compaction. It catches torn or
//! garbage records, not bit rot: there is no checksum.

use crate::layout::ItemRecord;
use notesdb_common::{HARD_MAX_TEXT_LEN, Timestamp};
use std::fmt;

/// Why a record was judged corrupted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Defect {
    TextLength(i32),
    NegativeResponseCount(i32),
    ModifiedInFuture(Timestamp),
    AuthoredInFuture(Timestamp),
    TextPastEnd { end: i64, size: u64 },
}

impl fmt::Display for Defect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TextLength(len) => write!(f, "text length {len} out of range"),
            Self::NegativeResponseCount(n) => write!(f, "negative response count {n}"),
            Self::ModifiedInFuture(ts) => write!(f, "last modified in the future ({ts})"),
            Self::AuthoredInFuture(ts) => write!(f, "authored in the future ({ts})"),
            Self::TextPastEnd { end, size } => {
                write!(f, "text ends at {end}, past end of text file ({size})")
            }
        }
    }
}

/// Check one record
///
/// `response_count` is given for base notes only; `text_size` is the
/// current size of the text file.
pub fn check(
    item: &ItemRecord,
    response_count: Option<i32>,
    text_size: u64,
    now: Timestamp,
) -> Result<(), Defect> {
    let length = item.text.length;
    if !(0..=HARD_MAX_TEXT_LEN).contains(&length) {
        return Err(Defect::TextLength(length));
    }
    if let Some(count) = response_count.filter(|c| *c < 0) {
        return Err(Defect::NegativeResponseCount(count));
    }
    if item.last_modified > now {
        return Err(Defect::ModifiedInFuture(item.last_modified));
    }
    if item.authored > now {
        return Err(Defect::AuthoredInFuture(item.authored));
    }
    let end = item.text.offset.saturating_add(i64::from(length));
    if item.text.offset < 0 || u64::try_from(end).map_or(true, |e| e > text_size) {
        return Err(Defect::TextPastEnd {
            end,
            size: text_size,
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::TextAddr;

    const NOW: Timestamp = 1_700_000_000;

    fn healthy() -> ItemRecord {
        ItemRecord {
            authored: NOW - 60,
            last_modified: NOW - 30,
            text: TextAddr {
                offset: 8,
                length: 100,
            },
            ..ItemRecord::default()
        }
    }

    #[test]
    fn test_healthy_record_passes() {
        assert_eq!(check(&healthy(), Some(3), 108, NOW), Ok(()));
        assert_eq!(check(&healthy(), None, 4096, NOW), Ok(()));
    }

    #[test]
    fn test_each_defect() {
        let mut item = healthy();
        item.text.length = HARD_MAX_TEXT_LEN + 1;
        assert!(matches!(
            check(&item, None, u64::MAX, NOW),
            Err(Defect::TextLength(_))
        ));

        assert_eq!(
            check(&healthy(), Some(-1), 4096, NOW),
            Err(Defect::NegativeResponseCount(-1))
        );

        let mut item = healthy();
        item.last_modified = NOW + 1;
        assert_eq!(
            check(&item, None, 4096, NOW),
            Err(Defect::ModifiedInFuture(NOW + 1))
        );

        let mut item = healthy();
        item.authored = NOW + 5;
        assert_eq!(
            check(&item, None, 4096, NOW),
            Err(Defect::AuthoredInFuture(NOW + 5))
        );

        assert_eq!(
            check(&healthy(), None, 107, NOW),
            Err(Defect::TextPastEnd {
                end: 108,
                size: 107
            })
        );
    }

    #[test]
    fn test_defect_messages() {
        let msg = Defect::TextPastEnd { end: 10, size: 4 }.to_string();
        assert!(msg.contains("past end"));
    }
}
