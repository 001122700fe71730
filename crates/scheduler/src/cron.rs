//! A zero-dependency 5-field cron expression parser: `minute hour
//! day-of-month month day-of-week`. Carried from the teacher's workflow
//! engine, generalized from user-defined routines to the scheduler's
//! seven fixed jobs (spec §4.7).

use chrono::{DateTime, Datelike, Timelike, Utc};

#[derive(Debug, Clone)]
pub struct CronExpr {
    minutes: Vec<u32>,
    hours: Vec<u32>,
    days_of_month: Vec<u32>,
    months: Vec<u32>,
    days_of_week: Vec<u32>,
}

impl CronExpr {
    /// Supports `*`, `*/N` (step), `N` (literal), `N-M` (range), `N,M` (list).
    pub fn parse(expr: &str) -> Result<Self, String> {
        let fields: Vec<&str> = expr.trim().split_whitespace().collect();
        if fields.len() != 5 {
            return Err(format!(
                "expected 5 fields (minute hour dom month dow), got {}",
                fields.len()
            ));
        }

        Ok(CronExpr {
            minutes: Self::parse_field(fields[0], 0, 59)?,
            hours: Self::parse_field(fields[1], 0, 23)?,
            days_of_month: Self::parse_field(fields[2], 1, 31)?,
            months: Self::parse_field(fields[3], 1, 12)?,
            days_of_week: Self::parse_field(fields[4], 0, 6)?,
        })
    }

    fn parse_field(field: &str, min: u32, max: u32) -> Result<Vec<u32>, String> {
        let mut values = Vec::new();

        for part in field.split(',') {
            let part = part.trim();

            if part.contains('/') {
                let pieces: Vec<&str> = part.splitn(2, '/').collect();
                let step: u32 = pieces[1].parse().map_err(|_| format!("invalid step: {}", pieces[1]))?;
                if step == 0 {
                    return Err("step cannot be zero".into());
                }
                let (start, end) = if pieces[0] == "*" {
                    (min, max)
                } else if pieces[0].contains('-') {
                    Self::parse_range(pieces[0], min, max)?
                } else {
                    let s: u32 = pieces[0].parse().map_err(|_| format!("invalid number: {}", pieces[0]))?;
                    (s, max)
                };
                let mut v = start;
                while v <= end {
                    values.push(v);
                    v += step;
                }
            } else if part.contains('-') {
                let (start, end) = Self::parse_range(part, min, max)?;
                for v in start..=end {
                    values.push(v);
                }
            } else if part == "*" {
                for v in min..=max {
                    values.push(v);
                }
            } else {
                let v: u32 = part.parse().map_err(|_| format!("invalid number: {part}"))?;
                if v < min || v > max {
                    return Err(format!("{v} out of range {min}-{max}"));
                }
                values.push(v);
            }
        }

        values.sort();
        values.dedup();
        if values.is_empty() {
            return Err("field produced no values".into());
        }
        Ok(values)
    }

    fn parse_range(s: &str, min: u32, max: u32) -> Result<(u32, u32), String> {
        let pieces: Vec<&str> = s.splitn(2, '-').collect();
        let start: u32 = pieces[0].parse().map_err(|_| format!("invalid range start: {}", pieces[0]))?;
        let end: u32 = pieces[1].parse().map_err(|_| format!("invalid range end: {}", pieces[1]))?;
        if start < min || end > max || start > end {
            return Err(format!("range {start}-{end} invalid for {min}-{max}"));
        }
        Ok((start, end))
    }

    pub fn matches(&self, dt: &DateTime<Utc>) -> bool {
        self.minutes.contains(&dt.minute())
            && self.hours.contains(&dt.hour())
            && self.days_of_month.contains(&dt.day())
            && self.months.contains(&dt.month())
            && self.days_of_week.contains(&dt.weekday().num_days_from_sunday())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_five_minutes() {
        let expr = CronExpr::parse("*/5 * * * *").unwrap();
        assert_eq!(expr.minutes, vec![0, 5, 10, 15, 20, 25, 30, 35, 40, 45, 50, 55]);
    }

    #[test]
    fn daily_at_two_am() {
        let expr = CronExpr::parse("0 2 * * *").unwrap();
        let two_am = chrono::NaiveDate::from_ymd_opt(2026, 7, 28)
            .unwrap()
            .and_hms_opt(2, 0, 0)
            .unwrap()
            .and_utc();
        let three_am = chrono::NaiveDate::from_ymd_opt(2026, 7, 28)
            .unwrap()
            .and_hms_opt(3, 0, 0)
            .unwrap()
            .and_utc();
        assert!(expr.matches(&two_am));
        assert!(!expr.matches(&three_am));
    }

    #[test]
    fn invalid_field_count_rejected() {
        assert!(CronExpr::parse("* * *").is_err());
    }

    #[test]
    fn out_of_range_literal_rejected() {
        assert!(CronExpr::parse("70 * * * *").is_err());
    }
}
