//! Feature recoding
//!
//! Each raw column that needs recoding has a pure function from raw value
//! (including missing) to its output feature(s). `recode_features` applies
//! them to the consolidated frame and returns a new frame; the input is never
//! modified.

use chrono::{Datelike, NaiveDate};
use polars::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use crate::config::FeatureConfig;
use crate::error::Result;

use super::schema::{require_columns, GRAV_ORDER, YEAR_TAG};

/// Raw columns read by the recoder
pub const RECODE_INPUTS: &[&str] = &[
    "hrmn", "mois", "jour", "grav", "choc", "secu", "surf", "sexe", "place", "trajet", "an_nais",
    YEAR_TAG,
];

/// Ordinal severity scale: uninjured < light < hospitalised < fatality
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Uninjured = 0,
    Light = 1,
    Hospitalized = 2,
    Fatality = 3,
}

impl Severity {
    pub const ALL: [Severity; 4] = [
        Severity::Uninjured,
        Severity::Light,
        Severity::Hospitalized,
        Severity::Fatality,
    ];

    /// Map the raw `grav` code (1 uninjured, 2 killed, 3 hospitalised, 4 light)
    pub fn from_raw(code: i64) -> Option<Severity> {
        match code {
            1 => Some(Severity::Uninjured),
            2 => Some(Severity::Fatality),
            3 => Some(Severity::Hospitalized),
            4 => Some(Severity::Light),
            _ => None,
        }
    }

    pub fn from_ordinal(ordinal: u8) -> Option<Severity> {
        Severity::ALL.get(ordinal as usize).copied()
    }

    pub fn ordinal(&self) -> u8 {
        *self as u8
    }

    pub fn label(&self) -> &'static str {
        match self {
            Severity::Uninjured => "uninjured",
            Severity::Light => "light injury",
            Severity::Hospitalized => "hospitalized",
            Severity::Fatality => "fatality",
        }
    }
}

/// Ordinal severity of a raw `grav` value
pub fn severity_ordinal(grav: Option<i64>) -> Option<i64> {
    grav.and_then(Severity::from_raw).map(|s| s.ordinal() as i64)
}

/// Collision-direction family flags derived from an impact point code
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CollisionFlags {
    pub front: bool,
    pub rear: bool,
    pub side: bool,
    pub multiple: bool,
}

/// Split an impact code into its direction family: front {1,2,3},
/// rear {4,5,6}, side {7,8}, multiple {9}. Code 0 sets no flag.
pub fn collision_flags(code: Option<i64>) -> Option<CollisionFlags> {
    let code = code?;
    Some(CollisionFlags {
        front: (1..=3).contains(&code),
        rear: (4..=6).contains(&code),
        side: (7..=8).contains(&code),
        multiple: code == 9,
    })
}

/// Decode the compound safety-equipment code (equipment * 10 + usage).
///
/// Used → the equipment type, not used → 0, undetermined or missing → -1.
pub fn decode_safety_equipment(secu: Option<i64>) -> i64 {
    match secu {
        Some(code) if code >= 0 => match code % 10 {
            1 => code / 10,
            2 => 0,
            _ => -1,
        },
        _ => -1,
    }
}

/// Normal surface → 1, adverse (wet, flooded, snow, mud, ice, grease) → 0,
/// other or unknown → -1
pub fn surface_flag(surf: Option<i64>) -> i64 {
    match surf {
        Some(1) => 1,
        Some(2..=8) => 0,
        _ => -1,
    }
}

pub fn seat_group(place: Option<i64>) -> &'static str {
    match place {
        Some(1) => "driver",
        Some(2) => "front passenger",
        Some(3..=6) => "rear passenger",
        _ => "other/unknown",
    }
}

pub fn trip_group(trajet: Option<i64>) -> &'static str {
    match trajet {
        Some(1) => "work",
        Some(4) => "professional",
        Some(5) => "leisure",
        Some(2) | Some(3) | Some(9) => "other",
        _ => "unknown",
    }
}

pub fn age_band(age: Option<i64>) -> &'static str {
    match age {
        None => "unknown",
        Some(a) if a < 18 => "child",
        Some(a) if a < 30 => "young",
        Some(a) if a < 60 => "adult",
        Some(_) => "senior",
    }
}

/// (is_male, is_female) from the raw sex code; missing sets neither
pub fn sex_flags(sexe: Option<i64>) -> (i64, i64) {
    match sexe {
        Some(1) => (1, 0),
        Some(2) => (0, 1),
        _ => (0, 0),
    }
}

/// Hour of day from `hrmn`, which appears as `1530`, `15:30` or `930`
pub fn parse_hour(hrmn: Option<&str>) -> Option<i64> {
    let digits: String = hrmn?.chars().filter(|c| c.is_ascii_digit()).collect();
    let value: i64 = digits.parse().ok()?;
    let hour = if digits.len() <= 2 { value } else { value / 100 };
    (0..24).contains(&hour).then_some(hour)
}

/// Day of week (0 = Monday) of the accident date
pub fn weekday(year: Option<i64>, month: Option<i64>, day: Option<i64>) -> Option<i64> {
    let date = NaiveDate::from_ymd_opt(
        i32::try_from(year?).ok()?,
        u32::try_from(month?).ok()?,
        u32::try_from(day?).ok()?,
    )?;
    Some(date.weekday().num_days_from_monday() as i64)
}

/// Replace ages outside the `[q, 1 - q]` quantile band with the median plus a
/// seeded uniform jitter of at most `jitter` years. Missing ages stay missing.
pub fn clean_ages(ages: &[Option<i64>], quantile: f64, jitter: i64, seed: u64) -> Vec<Option<i64>> {
    let mut sorted: Vec<i64> = ages.iter().flatten().copied().collect();
    if sorted.is_empty() || quantile <= 0.0 {
        return ages.to_vec();
    }
    sorted.sort_unstable();

    let last = (sorted.len() - 1) as f64;
    let low = sorted[(quantile * last).floor() as usize];
    let high = sorted[((1.0 - quantile) * last).ceil() as usize];
    let median = sorted[sorted.len() / 2];

    let mut rng = StdRng::seed_from_u64(seed);
    let mut replaced = 0usize;
    let cleaned = ages
        .iter()
        .map(|age| {
            age.map(|a| {
                if a < low || a > high {
                    replaced += 1;
                    (median + rng.gen_range(-jitter..=jitter)).max(0)
                } else {
                    a
                }
            })
        })
        .collect();

    debug!(replaced, low, high, median, "replaced outlier ages");
    cleaned
}

fn int_values(df: &DataFrame, name: &str) -> Result<Vec<Option<i64>>> {
    let column = df.column(name)?.cast(&DataType::Int64)?;
    let values = column.i64()?.into_iter().collect();
    Ok(values)
}

fn text_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let values = column
        .str()?
        .into_iter()
        .map(|v| v.map(str::to_string))
        .collect();
    Ok(values)
}

/// Apply every recoding rule to the consolidated frame.
///
/// Raw source columns are left in place; the irrelevant-column pass removes
/// them once the fill policy has consulted them.
pub fn recode_features(merged: &DataFrame, config: &FeatureConfig) -> Result<DataFrame> {
    require_columns(merged, RECODE_INPUTS, "recode")?;

    let years = int_values(merged, YEAR_TAG)?;
    let months = int_values(merged, "mois")?;
    let days = int_values(merged, "jour")?;

    let hours: Vec<Option<i64>> = text_values(merged, "hrmn")?
        .iter()
        .map(|v| parse_hour(v.as_deref()))
        .collect();
    let weekdays: Vec<Option<i64>> = years
        .iter()
        .zip(months.iter())
        .zip(days.iter())
        .map(|((y, m), d)| weekday(*y, *m, *d))
        .collect();

    let grav_order: Vec<Option<i64>> = int_values(merged, "grav")?
        .into_iter()
        .map(severity_ordinal)
        .collect();

    let flags: Vec<Option<CollisionFlags>> = int_values(merged, "choc")?
        .into_iter()
        .map(collision_flags)
        .collect();
    let flag_column = |name: &str, pick: fn(&CollisionFlags) -> bool| {
        let values: Vec<Option<i64>> = flags
            .iter()
            .map(|f| f.as_ref().map(|f| pick(f) as i64))
            .collect();
        Column::new(name.into(), values)
    };

    let secu: Vec<i64> = int_values(merged, "secu")?
        .into_iter()
        .map(decode_safety_equipment)
        .collect();
    let surface: Vec<i64> = int_values(merged, "surf")?
        .into_iter()
        .map(surface_flag)
        .collect();
    let (is_male, is_female): (Vec<i64>, Vec<i64>) = int_values(merged, "sexe")?
        .into_iter()
        .map(sex_flags)
        .unzip();
    let seats: Vec<&str> = int_values(merged, "place")?
        .into_iter()
        .map(seat_group)
        .collect();
    let trips: Vec<&str> = int_values(merged, "trajet")?
        .into_iter()
        .map(trip_group)
        .collect();

    let raw_ages: Vec<Option<i64>> = int_values(merged, "an_nais")?
        .into_iter()
        .zip(years.iter())
        .map(|(birth, year)| Some(year.as_ref()? - birth?))
        .collect();
    let ages = clean_ages(
        &raw_ages,
        config.age_outlier_quantile,
        config.age_jitter_years,
        config.seed,
    );
    let bands: Vec<&str> = ages.iter().map(|a| age_band(*a)).collect();

    let mut recoded = merged.clone();
    for column in [
        Column::new("hour".into(), hours),
        Column::new("jour_semaine".into(), weekdays),
        Column::new(GRAV_ORDER.into(), grav_order),
        flag_column("choc_avant", |f| f.front),
        flag_column("choc_arriere", |f| f.rear),
        flag_column("choc_cote", |f| f.side),
        flag_column("choc_multiple", |f| f.multiple),
        Column::new("secu_equipement".into(), secu),
        Column::new("surface_normale".into(), surface),
        Column::new("is_male".into(), is_male),
        Column::new("is_female".into(), is_female),
        Column::new("seat_group".into(), seats),
        Column::new("trip_group".into(), trips),
        Column::new("age".into(), ages),
        Column::new("age_band".into(), bands),
    ] {
        recoded.with_column(column)?;
    }

    Ok(recoded)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_order() {
        assert!(Severity::Fatality > Severity::Hospitalized);
        assert!(Severity::Hospitalized > Severity::Light);
        assert!(Severity::Light > Severity::Uninjured);
        assert_eq!(severity_ordinal(Some(2)), Some(3));
        assert_eq!(severity_ordinal(Some(4)), Some(1));
        assert_eq!(severity_ordinal(Some(7)), None);
        assert_eq!(severity_ordinal(None), None);
    }

    #[test]
    fn test_collision_flags_families() {
        let front = collision_flags(Some(2)).unwrap();
        assert!(front.front && !front.rear && !front.side && !front.multiple);
        assert!(collision_flags(Some(6)).unwrap().rear);
        assert!(collision_flags(Some(8)).unwrap().side);
        assert!(collision_flags(Some(9)).unwrap().multiple);
        assert_eq!(collision_flags(Some(0)), Some(CollisionFlags::default()));
        assert_eq!(collision_flags(None), None);
    }

    #[test]
    fn test_surface_flag() {
        assert_eq!(surface_flag(Some(1)), 1);
        assert_eq!(surface_flag(Some(7)), 0);
        assert_eq!(surface_flag(Some(9)), -1);
        assert_eq!(surface_flag(None), -1);
    }

    #[test]
    fn test_parse_hour_formats() {
        assert_eq!(parse_hour(Some("1530")), Some(15));
        assert_eq!(parse_hour(Some("15:30")), Some(15));
        assert_eq!(parse_hour(Some("930")), Some(9));
        assert_eq!(parse_hour(Some("7")), Some(7));
        assert_eq!(parse_hour(Some("2930")), None);
        assert_eq!(parse_hour(None), None);
    }

    #[test]
    fn test_weekday() {
        // 2018-01-01 was a Monday
        assert_eq!(weekday(Some(2018), Some(1), Some(1)), Some(0));
        assert_eq!(weekday(Some(2018), Some(2), Some(30)), None);
    }

    #[test]
    fn test_clean_ages_replaces_only_tails() {
        let mut ages: Vec<Option<i64>> = (0..4).flat_map(|_| 20..=69).map(Some).collect();
        ages.push(Some(-3));
        ages.push(Some(140));
        ages.push(None);

        let cleaned = clean_ages(&ages, 0.01, 5, 7);

        assert_eq!(cleaned[0], Some(20));
        assert_eq!(cleaned[25], Some(45));
        assert_eq!(cleaned[49], Some(69));
        assert_eq!(cleaned[202], None);
        for replaced in &cleaned[200..202] {
            let v = replaced.unwrap();
            assert!((40..=50).contains(&v), "replacement {} not near the median", v);
        }
    }

    #[test]
    fn test_clean_ages_is_deterministic() {
        let ages: Vec<Option<i64>> = (0..200).map(|i| Some(i % 90)).chain([Some(500)]).collect();
        assert_eq!(clean_ages(&ages, 0.01, 5, 1), clean_ages(&ages, 0.01, 5, 1));
    }
}
