use chrono::{DateTime, FixedOffset, NaiveTime, Utc};
use store::schedule::SlotTime;

/// Calendar day key in the configured reference timezone. The day a posting
/// run belongs to is decided once, here, so history lookups and new history
/// rows always agree.
pub fn day_key(now: DateTime<Utc>, offset: FixedOffset) -> String {
    now.with_timezone(&offset).date_naive().to_string()
}

/// Slots whose window has opened by `now`, in schedule order. A slot window
/// runs from its start time to the next midnight, so a scheduler that was
/// down at 09:00 still picks the morning slot up at 18:30.
pub fn due(schedule: &[SlotTime], now: DateTime<FixedOffset>) -> Vec<SlotTime> {
    schedule
        .iter()
        .filter(|entry| start_of(entry).map_or(false, |start| start <= now.time()))
        .copied()
        .collect()
}

fn start_of(entry: &SlotTime) -> Option<NaiveTime> {
    NaiveTime::from_hms_opt(entry.hour, entry.minute, 0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use store::schedule::Slot;

    fn schedule() -> Vec<SlotTime> {
        vec![
            SlotTime {
                slot: Slot::Morning,
                hour: 9,
                minute: 0,
            },
            SlotTime {
                slot: Slot::Noon,
                hour: 13,
                minute: 0,
            },
            SlotTime {
                slot: Slot::Evening,
                hour: 18,
                minute: 0,
            },
        ]
    }

    fn at(offset: FixedOffset, hour: u32, minute: u32) -> DateTime<FixedOffset> {
        offset
            .with_ymd_and_hms(2024, 3, 10, hour, minute, 0)
            .single()
            .expect("valid time")
    }

    #[test]
    fn only_opened_windows_are_due() {
        let utc = FixedOffset::east_opt(0).expect("offset");
        let due = due(&schedule(), at(utc, 9, 5));
        let slots: Vec<Slot> = due.iter().map(|s| s.slot).collect();
        assert_eq!(vec![Slot::Morning], slots);
    }

    #[test]
    fn late_wake_catches_up_every_opened_window() {
        let utc = FixedOffset::east_opt(0).expect("offset");
        let due = due(&schedule(), at(utc, 18, 30));
        let slots: Vec<Slot> = due.iter().map(|s| s.slot).collect();
        assert_eq!(vec![Slot::Morning, Slot::Noon, Slot::Evening], slots);
    }

    #[test]
    fn windows_reset_after_midnight() {
        let utc = FixedOffset::east_opt(0).expect("offset");
        assert!(due(&schedule(), at(utc, 0, 30)).is_empty());
    }

    #[test]
    fn day_key_follows_the_reference_timezone() {
        let offset = FixedOffset::east_opt(2 * 3600).expect("offset");
        // 23:30 UTC is already the next day two hours east.
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 23, 30, 0).single().expect("time");
        assert_eq!("2024-03-11", day_key(now, offset));
        let utc = FixedOffset::east_opt(0).expect("offset");
        assert_eq!("2024-03-10", day_key(now, utc));
    }
}
