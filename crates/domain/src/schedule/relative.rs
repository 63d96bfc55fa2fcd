//! 相对时间写法
//!
//! 时长短语（`"1 minute"`、`"every 2 hours"`、`"1 day + 12 hours"`、`"90s"`）是固定间隔；
//! 时间点短语（`"tomorrow"`、`"midnight"`、`"noon"`、`"next monday"`）是一次性时间点。

use std::fmt;

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc, Weekday};

use super::{Interval, ScheduleExpression};

/// 相对 `after` 求值的一次性时间点
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelativePoint {
    Tomorrow,
    Midnight,
    Noon,
    Weekday(Weekday),
}

impl RelativePoint {
    pub fn resolve(&self, after: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let today = after.date_naive();
        match self {
            // 今天的零点不晚于 after，因此下一个零点总是明天零点
            RelativePoint::Tomorrow | RelativePoint::Midnight => at_hour(today.succ_opt()?, 0),
            RelativePoint::Noon => {
                let noon = at_hour(today, 12)?;
                if noon > after {
                    Some(noon)
                } else {
                    at_hour(today.succ_opt()?, 12)
                }
            }
            RelativePoint::Weekday(weekday) => {
                let mut date = today.succ_opt()?;
                while date.weekday() != *weekday {
                    date = date.succ_opt()?;
                }
                at_hour(date, 0)
            }
        }
    }
}

impl fmt::Display for RelativePoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelativePoint::Tomorrow => write!(f, "tomorrow"),
            RelativePoint::Midnight => write!(f, "midnight"),
            RelativePoint::Noon => write!(f, "noon"),
            RelativePoint::Weekday(weekday) => write!(f, "next {weekday}"),
        }
    }
}

fn at_hour(date: NaiveDate, hour: u32) -> Option<DateTime<Utc>> {
    date.and_hms_opt(hour, 0, 0).map(|naive| naive.and_utc())
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Token {
    Number(u64),
    Word(String),
}

/// 无法识别时返回 `None`，交给下一种写法
pub fn parse(text: &str) -> Option<ScheduleExpression> {
    let mut tokens = tokenize(&text.to_lowercase())?;
    tokens.retain(|token| !matches!(token, Token::Word(w) if w == "and"));

    if let Some(point) = parse_point(&tokens) {
        return Some(ScheduleExpression::RelativePoint(point));
    }

    if matches!(tokens.first(), Some(Token::Word(w)) if w == "every") {
        tokens.remove(0);
    }
    parse_interval(&tokens).map(ScheduleExpression::Interval)
}

fn tokenize(text: &str) -> Option<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut current = String::new();

    let flush = |current: &mut String, tokens: &mut Vec<Token>| -> Option<()> {
        if current.is_empty() {
            return Some(());
        }
        let token = if current.bytes().all(|b| b.is_ascii_digit()) {
            Token::Number(current.parse().ok()?)
        } else {
            Token::Word(current.clone())
        };
        tokens.push(token);
        current.clear();
        Some(())
    };

    for c in text.chars() {
        if c.is_whitespace() || c == ',' || c == '+' {
            flush(&mut current, &mut tokens)?;
        } else if c.is_ascii_digit() || c.is_alphabetic() {
            let boundary = current
                .chars()
                .last()
                .is_some_and(|last| last.is_ascii_digit() != c.is_ascii_digit());
            if boundary {
                flush(&mut current, &mut tokens)?;
            }
            current.push(c);
        } else {
            return None;
        }
    }
    flush(&mut current, &mut tokens)?;

    if tokens.is_empty() {
        None
    } else {
        Some(tokens)
    }
}

fn parse_point(tokens: &[Token]) -> Option<RelativePoint> {
    let words: Vec<&str> = tokens
        .iter()
        .map(|token| match token {
            Token::Word(w) => Some(w.as_str()),
            Token::Number(_) => None,
        })
        .collect::<Option<_>>()?;

    match words.as_slice() {
        ["tomorrow"] => Some(RelativePoint::Tomorrow),
        ["midnight"] => Some(RelativePoint::Midnight),
        ["noon"] | ["midday"] => Some(RelativePoint::Noon),
        ["next", day] | [day] => weekday(day).map(RelativePoint::Weekday),
        _ => None,
    }
}

fn weekday(word: &str) -> Option<Weekday> {
    match word {
        "monday" | "mon" => Some(Weekday::Mon),
        "tuesday" | "tue" | "tues" => Some(Weekday::Tue),
        "wednesday" | "wed" => Some(Weekday::Wed),
        "thursday" | "thu" | "thur" | "thurs" => Some(Weekday::Thu),
        "friday" | "fri" => Some(Weekday::Fri),
        "saturday" | "sat" => Some(Weekday::Sat),
        "sunday" | "sun" => Some(Weekday::Sun),
        _ => None,
    }
}

enum Unit {
    Seconds(u64),
    Months(u64),
}

fn unit(word: &str) -> Option<Unit> {
    let unit = match word {
        "s" | "sec" | "secs" | "second" | "seconds" => Unit::Seconds(1),
        "m" | "min" | "mins" | "minute" | "minutes" => Unit::Seconds(60),
        "h" | "hr" | "hrs" | "hour" | "hours" => Unit::Seconds(3_600),
        "d" | "day" | "days" => Unit::Seconds(86_400),
        "w" | "week" | "weeks" => Unit::Seconds(7 * 86_400),
        "fortnight" | "fortnights" => Unit::Seconds(14 * 86_400),
        "month" | "months" => Unit::Months(1),
        "y" | "year" | "years" => Unit::Months(12),
        _ => return None,
    };
    Some(unit)
}

fn parse_interval(tokens: &[Token]) -> Option<Interval> {
    let mut months: u64 = 0;
    let mut seconds: u64 = 0;
    let mut index = 0;

    while index < tokens.len() {
        let (count, word) = match (&tokens[index], tokens.get(index + 1)) {
            (Token::Number(n), Some(Token::Word(w))) => {
                index += 2;
                (*n, w)
            }
            // 省略数量时按 1 计，例如 "every minute"
            (Token::Word(w), _) => {
                index += 1;
                (1, w)
            }
            _ => return None,
        };
        match unit(word)? {
            Unit::Seconds(factor) => seconds = seconds.checked_add(count.checked_mul(factor)?)?,
            Unit::Months(factor) => months = months.checked_add(count.checked_mul(factor)?)?,
        }
    }

    let interval = Interval {
        months: u32::try_from(months).ok()?,
        seconds,
    };
    // 间隔必须在 chrono 可表示范围内
    Duration::try_seconds(i64::try_from(interval.seconds).ok()?)?;
    (!interval.is_zero()).then_some(interval)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn interval(text: &str) -> Option<Interval> {
        match parse(text)? {
            ScheduleExpression::Interval(interval) => Some(interval),
            _ => None,
        }
    }

    fn point(text: &str) -> Option<RelativePoint> {
        match parse(text)? {
            ScheduleExpression::RelativePoint(point) => Some(point),
            _ => None,
        }
    }

    #[test]
    fn test_interval_phrases() {
        assert_eq!(interval("1 minute"), Some(Interval::from_seconds(60)));
        assert_eq!(interval("every 2 hours"), Some(Interval::from_seconds(7_200)));
        assert_eq!(interval("every minute"), Some(Interval::from_seconds(60)));
        assert_eq!(
            interval("1 day + 12 hours"),
            Some(Interval::from_seconds(86_400 + 43_200))
        );
        assert_eq!(
            interval("2 hours and 30 minutes"),
            Some(Interval::from_seconds(9_000))
        );
        assert_eq!(interval("90s"), Some(Interval::from_seconds(90)));
        assert_eq!(interval("1h30m"), Some(Interval::from_seconds(5_400)));
        assert_eq!(interval("1 Month"), Some(Interval { months: 1, seconds: 0 }));
        assert_eq!(interval("2 years"), Some(Interval { months: 24, seconds: 0 }));
    }

    #[test]
    fn test_point_phrases() {
        assert_eq!(point("tomorrow"), Some(RelativePoint::Tomorrow));
        assert_eq!(point("Next Monday"), Some(RelativePoint::Weekday(Weekday::Mon)));
        assert_eq!(point("friday"), Some(RelativePoint::Weekday(Weekday::Fri)));
        assert_eq!(point("noon"), Some(RelativePoint::Noon));
    }

    #[test]
    fn test_rejected_phrases() {
        assert!(parse("0 0 * * *").is_none());
        assert!(parse("not-a-schedule").is_none());
        assert!(parse("60").is_none());
        assert!(parse("0 minutes").is_none());
        assert!(parse("5 parsecs").is_none());
        assert!(parse("next").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn test_resolve_points() {
        // 2025-06-02 是星期一
        let monday_morning = Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap();

        assert_eq!(
            RelativePoint::Tomorrow.resolve(monday_morning),
            Some(Utc.with_ymd_and_hms(2025, 6, 3, 0, 0, 0).unwrap())
        );
        assert_eq!(
            RelativePoint::Noon.resolve(monday_morning),
            Some(Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap())
        );
        assert_eq!(
            RelativePoint::Noon.resolve(Utc.with_ymd_and_hms(2025, 6, 2, 12, 0, 0).unwrap()),
            Some(Utc.with_ymd_and_hms(2025, 6, 3, 12, 0, 0).unwrap())
        );
        assert_eq!(
            RelativePoint::Weekday(Weekday::Mon).resolve(monday_morning),
            Some(Utc.with_ymd_and_hms(2025, 6, 9, 0, 0, 0).unwrap())
        );
        assert_eq!(
            RelativePoint::Weekday(Weekday::Wed).resolve(monday_morning),
            Some(Utc.with_ymd_and_hms(2025, 6, 4, 0, 0, 0).unwrap())
        );
    }
}
