//! Holiday features: the per-row event flag and Prophet-style holiday windows.

use std::collections::{HashMap, HashSet};

use chrono::NaiveDate;
use tracing::{debug, info};

use crate::preprocess::FeatureError;
use crate::records::{
    HolidayEvent, HolidayKind, HolidayWindowRecord, Locale, PreparedRow, StoreHoliday,
};
use crate::stores::{EnrichedRecord, StoreDirectory};

const TRANSFER_PREFIX: &str = "Traslado ";

/// Observed (non-transferred) holidays indexed by the scope they apply to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HolidayCalendar {
    national: HashSet<NaiveDate>,
    regional: HashMap<NaiveDate, HashSet<String>>,
    local: HashMap<NaiveDate, HashSet<String>>,
}

impl HolidayCalendar {
    pub fn from_events(events: &[HolidayEvent]) -> Self {
        let mut calendar = Self::default();
        for event in events.iter().filter(|event| !event.transferred) {
            match event.locale {
                Locale::National => {
                    calendar.national.insert(event.date);
                }
                Locale::Regional => {
                    calendar
                        .regional
                        .entry(event.date)
                        .or_default()
                        .insert(event.locale_name.clone());
                }
                Locale::Local => {
                    calendar
                        .local
                        .entry(event.date)
                        .or_default()
                        .insert(event.locale_name.clone());
                }
            }
        }
        calendar
    }

    pub fn is_national(&self, date: NaiveDate) -> bool {
        self.national.contains(&date)
    }

    pub fn is_regional(&self, date: NaiveDate, state: &str) -> bool {
        self.regional
            .get(&date)
            .is_some_and(|states| states.contains(state))
    }

    pub fn is_local(&self, date: NaiveDate, city: &str) -> bool {
        self.local
            .get(&date)
            .is_some_and(|cities| cities.contains(city))
    }

    pub fn is_holiday(&self, date: NaiveDate, city: &str, state: &str) -> bool {
        self.is_national(date) || self.is_regional(date, state) || self.is_local(date, city)
    }
}

/// Flattens joined rows into prepared rows carrying the boolean `event` flag.
pub fn flag_holidays(rows: Vec<EnrichedRecord>, events: &[HolidayEvent]) -> Vec<PreparedRow> {
    let calendar = HolidayCalendar::from_events(events);
    let mut flagged = 0u64;

    let prepared: Vec<PreparedRow> = rows
        .into_iter()
        .map(|row| {
            let event = calendar.is_holiday(row.record.date, &row.store.city, &row.store.state);
            if event {
                flagged += 1;
            }
            PreparedRow {
                id: row.record.id,
                date: row.record.date,
                store_nbr: row.record.store_nbr,
                family: row.record.family,
                sales: row.record.sales,
                onpromotion: row.record.onpromotion,
                city: row.store.city,
                state: row.store.state,
                store_type: row.store.store_type,
                store_cluster: row.store.cluster,
                series_id: row.series_id,
                event,
            }
        })
        .collect();

    info!(
        component = "holidays",
        event = "prep.holidays.flagged",
        rows = prepared.len(),
        flagged_rows = flagged
    );

    prepared
}

#[derive(Debug)]
struct ParsedOccurrence<'a> {
    event: &'a HolidayEvent,
    name: String,
    lower_window: i32,
    upper_window: i32,
}

impl ParsedOccurrence<'_> {
    /// The dated occurrence of the holiday itself, as opposed to a `+N`/`-N` satellite.
    fn is_actual_day(&self) -> bool {
        self.lower_window == self.upper_window
    }
}

/// Splits `Name+N` / `Name-N` into `(Name, lower, upper)`.
///
/// Only an all-digit tail counts as a window; `Ecuador-Suiza` stays a plain name.
pub fn parse_window_suffix(description: &str) -> (String, i32, i32) {
    let mut name = description.trim();
    let mut upper_window = 0;
    let mut lower_window = 0;

    if let Some((head, tail)) = name.rsplit_once('+') {
        if let Some(days) = parse_days(tail) {
            upper_window = days;
            name = head;
        }
    }

    // Split at the last `-` and require digits after it. A first-`-` split would cut
    // `Mundial de futbol Brasil: Ecuador-Suiza` down to a name shared with other matches.
    if let Some((head, tail)) = name.rsplit_once('-') {
        if let Some(days) = parse_days(tail) {
            lower_window = -days;
            name = head;
        }
    }

    (name.trim_end().to_string(), lower_window, upper_window)
}

fn parse_days(raw: &str) -> Option<i32> {
    let raw = raw.trim();
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

/// Builds the holiday-window table.
///
/// Work days and transferred dates are dropped. Each holiday name takes the widest
/// window seen across all of its occurrences, attached to its actual-day rows only.
pub fn build_holiday_windows(events: &[HolidayEvent]) -> Vec<HolidayWindowRecord> {
    let occurrences: Vec<ParsedOccurrence<'_>> = events
        .iter()
        .filter(|event| event.kind != HolidayKind::WorkDay && !event.transferred)
        .map(|event| {
            let description = event
                .description
                .strip_prefix(TRANSFER_PREFIX)
                .unwrap_or(&event.description);
            let (name, lower_window, upper_window) = parse_window_suffix(description);
            ParsedOccurrence {
                event,
                name,
                lower_window,
                upper_window,
            }
        })
        .collect();

    let mut windows: HashMap<&str, (i32, i32)> = HashMap::new();
    for occurrence in &occurrences {
        let entry = windows
            .entry(occurrence.name.as_str())
            .or_insert((0, 0));
        entry.0 = entry.0.min(occurrence.lower_window);
        entry.1 = entry.1.max(occurrence.upper_window);
    }

    let out: Vec<HolidayWindowRecord> = occurrences
        .iter()
        .filter(|occurrence| occurrence.is_actual_day())
        .map(|occurrence| {
            let (lower_window, upper_window) = windows[occurrence.name.as_str()];
            HolidayWindowRecord {
                date: occurrence.event.date,
                locale: occurrence.event.locale,
                locale_name: occurrence.event.locale_name.clone(),
                event: occurrence.name.clone(),
                lower_window,
                upper_window,
            }
        })
        .collect();

    debug!(
        component = "holidays",
        event = "prep.holidays.windows.names",
        distinct_names = windows.len()
    );
    info!(
        component = "holidays",
        event = "prep.holidays.windows.built",
        source_events = events.len(),
        kept_occurrences = occurrences.len(),
        window_rows = out.len()
    );

    out
}

/// Holiday windows that apply to one store, in Prophet `holidays` layout.
pub fn holidays_for_store(
    stores: &StoreDirectory,
    windows: &[HolidayWindowRecord],
    store_nbr: u32,
) -> Result<Vec<StoreHoliday>, FeatureError> {
    let store = stores.require(store_nbr)?;

    Ok(windows
        .iter()
        .filter(|window| match window.locale {
            Locale::National => true,
            Locale::Regional => window.locale_name == store.state,
            Locale::Local => window.locale_name == store.city,
        })
        .map(|window| StoreHoliday {
            ds: window.date,
            holiday: window.event.clone(),
            lower_window: window.lower_window,
            upper_window: window.upper_window,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::records::{SalesRecord, StoreInfo};

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn holiday(date: NaiveDate, locale: Locale, locale_name: &str, description: &str) -> HolidayEvent {
        HolidayEvent {
            date,
            kind: HolidayKind::Holiday,
            locale,
            locale_name: locale_name.to_string(),
            description: description.to_string(),
            transferred: false,
        }
    }

    fn store(store_nbr: u32, city: &str, state: &str) -> StoreInfo {
        StoreInfo {
            store_nbr,
            city: city.to_string(),
            state: state.to_string(),
            store_type: "A".to_string(),
            cluster: 1,
        }
    }

    fn enriched(date: NaiveDate, store: StoreInfo) -> EnrichedRecord {
        EnrichedRecord {
            series_id: store.store_nbr,
            record: SalesRecord {
                id: 1,
                date,
                store_nbr: store.store_nbr,
                family: "AUTOMOTIVE".to_string(),
                sales: Some(1.0),
                onpromotion: 0,
            },
            store,
        }
    }

    #[test]
    fn suffix_parsing_handles_windows_and_plain_dashes() {
        assert_eq!(parse_window_suffix("Navidad-4"), ("Navidad".to_string(), -4, 0));
        assert_eq!(
            parse_window_suffix("Terremoto Manabi+30"),
            ("Terremoto Manabi".to_string(), 0, 30)
        );
        assert_eq!(parse_window_suffix("Navidad"), ("Navidad".to_string(), 0, 0));
        assert_eq!(
            parse_window_suffix("Mundial de futbol Brasil: Ecuador-Suiza"),
            ("Mundial de futbol Brasil: Ecuador-Suiza".to_string(), 0, 0)
        );
    }

    #[test]
    fn windows_aggregate_per_name_onto_actual_day() {
        let events = vec![
            holiday(day(2013, 12, 22), Locale::National, "Ecuador", "X-3"),
            holiday(day(2013, 12, 25), Locale::National, "Ecuador", "X"),
            holiday(day(2013, 12, 27), Locale::National, "Ecuador", "X+2"),
        ];

        let windows = build_holiday_windows(&events);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].date, day(2013, 12, 25));
        assert_eq!(windows[0].event, "X");
        assert_eq!(windows[0].lower_window, -3);
        assert_eq!(windows[0].upper_window, 2);
    }

    #[test]
    fn world_cup_matches_keep_distinct_names() {
        let events = vec![
            holiday(
                day(2014, 6, 15),
                Locale::National,
                "Ecuador",
                "Mundial de futbol Brasil: Ecuador-Suiza",
            ),
            holiday(
                day(2014, 6, 20),
                Locale::National,
                "Ecuador",
                "Mundial de futbol Brasil: Ecuador-Honduras",
            ),
        ];

        let windows = build_holiday_windows(&events);
        let names: Vec<&str> = windows.iter().map(|w| w.event.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "Mundial de futbol Brasil: Ecuador-Suiza",
                "Mundial de futbol Brasil: Ecuador-Honduras",
            ]
        );
        assert!(windows
            .iter()
            .all(|w| w.lower_window == 0 && w.upper_window == 0));
    }

    #[test]
    fn names_without_suffixed_occurrences_keep_zero_windows() {
        let events = vec![
            holiday(day(2014, 1, 1), Locale::National, "Ecuador", "Primer dia del ano"),
            holiday(day(2015, 1, 1), Locale::National, "Ecuador", "Primer dia del ano"),
        ];

        let windows = build_holiday_windows(&events);
        assert_eq!(windows.len(), 2);
        assert!(windows
            .iter()
            .all(|w| w.lower_window == 0 && w.upper_window == 0));
    }

    #[test]
    fn work_days_and_transferred_dates_are_dropped_and_traslado_is_stripped() {
        let mut work_day = holiday(day(2013, 1, 5), Locale::National, "Ecuador", "Recupero");
        work_day.kind = HolidayKind::WorkDay;
        let mut transferred =
            holiday(day(2012, 10, 9), Locale::National, "Ecuador", "Independencia");
        transferred.transferred = true;
        let mut moved = holiday(
            day(2012, 10, 12),
            Locale::National,
            "Ecuador",
            "Traslado Independencia",
        );
        moved.kind = HolidayKind::Transfer;

        let windows = build_holiday_windows(&[work_day, transferred, moved]);
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].event, "Independencia");
        assert_eq!(windows[0].date, day(2012, 10, 12));
    }

    #[test]
    fn flag_is_boolean_or_across_scopes() {
        let d = day(2014, 5, 24);
        let events = vec![
            holiday(d, Locale::National, "Ecuador", "Batalla de Pichincha"),
            holiday(d, Locale::Regional, "Pichincha", "Provincializacion"),
            holiday(d, Locale::Regional, "Pichincha", "Provincializacion"),
        ];

        let rows = flag_holidays(
            vec![enriched(d, store(1, "Quito", "Pichincha"))],
            &events,
        );
        assert_eq!(rows.len(), 1);
        assert!(rows[0].event);
    }

    #[test]
    fn local_holiday_flags_only_matching_city() {
        let d = day(2013, 12, 6);
        let events = vec![holiday(d, Locale::Local, "Quito", "Fundacion de Quito")];

        let rows = flag_holidays(
            vec![
                enriched(d, store(1, "Quito", "Pichincha")),
                enriched(d, store(2, "Cayambe", "Pichincha")),
                enriched(day(2013, 12, 7), store(1, "Quito", "Pichincha")),
            ],
            &events,
        );

        assert!(rows[0].event);
        assert!(!rows[1].event);
        assert!(!rows[2].event);
        assert_eq!(rows[1].city, "Cayambe");
    }

    #[test]
    fn transferred_holidays_do_not_flag() {
        let d = day(2012, 10, 9);
        let mut event = holiday(d, Locale::National, "Ecuador", "Independencia de Guayaquil");
        event.transferred = true;

        let rows = flag_holidays(vec![enriched(d, store(1, "Quito", "Pichincha"))], &[event]);
        assert!(!rows[0].event);
    }

    #[test]
    fn store_holidays_filter_by_locale_scope() {
        let stores = StoreDirectory::new(vec![
            store(1, "Quito", "Pichincha"),
            store(24, "Guayaquil", "Guayas"),
        ])
        .unwrap();
        let windows = build_holiday_windows(&[
            holiday(day(2013, 1, 1), Locale::National, "Ecuador", "Primer dia del ano"),
            holiday(day(2013, 6, 25), Locale::Regional, "Imbabura", "Provincializacion de Imbabura"),
            holiday(day(2013, 12, 6), Locale::Local, "Quito", "Fundacion de Quito"),
            holiday(day(2013, 7, 25), Locale::Local, "Guayaquil", "Fundacion de Guayaquil"),
        ]);

        let quito = holidays_for_store(&stores, &windows, 1).unwrap();
        let names: Vec<&str> = quito.iter().map(|h| h.holiday.as_str()).collect();
        assert_eq!(names, vec!["Primer dia del ano", "Fundacion de Quito"]);
        assert_eq!(quito[1].ds, day(2013, 12, 6));

        let err = holidays_for_store(&stores, &windows, 99).unwrap_err();
        assert!(matches!(err, FeatureError::UnknownStore(99)));
    }
}
