//! 5 字段 CRON 表达式（分钟精度，UTC）
//!
//! 字段依次为：分钟、小时、日、月、星期，语法与 Vixie cron 一致：星期的 `0` 和 `7`
//! 都表示周日，日与星期同时受限时按"或"匹配，否则按"与"匹配。
//! 计算交给 `cron` crate；这里负责把 5 字段写法转换成它的 6 字段写法。

use std::fmt;
use std::str::FromStr;

use ::cron::Schedule;
use chrono::{DateTime, Duration, Utc};

use periodic_core::{SchedulerError, SchedulerResult};

/// 向前搜索的最大范围，超过即认为字段组合自相矛盾
const SEARCH_WINDOW_DAYS: i64 = 4 * 366;

const WEEKDAY_NAMES: [&str; 7] = ["SUN", "MON", "TUE", "WED", "THU", "FRI", "SAT"];

struct FieldBounds {
    name: &'static str,
    min: u32,
    max: u32,
}

const MINUTE: FieldBounds = FieldBounds { name: "分钟", min: 0, max: 59 };
const HOUR: FieldBounds = FieldBounds { name: "小时", min: 0, max: 23 };
const DAY_OF_MONTH: FieldBounds = FieldBounds { name: "日", min: 1, max: 31 };
const MONTH: FieldBounds = FieldBounds { name: "月", min: 1, max: 12 };

#[derive(Clone)]
pub struct CronExpression {
    source: String,
    /// 日与星期按"或"匹配时拆成两个调度，取较早的一次
    schedules: Vec<Schedule>,
}

impl CronExpression {
    /// 恰好 5 个字段或以 `@` 开头的文本视为 CRON 写法
    pub fn try_parse(text: &str) -> Option<SchedulerResult<Self>> {
        let text = text.trim();
        if let Some(name) = text.strip_prefix('@') {
            let result = match macro_expansion(name) {
                Some(expanded) => Self::parse_fields(text, expanded),
                None => Err(SchedulerError::invalid_schedule(text, format!("未知的CRON宏: @{name}"))),
            };
            return Some(result);
        }
        if text.split_whitespace().count() != 5 {
            return None;
        }
        Some(Self::parse_fields(text, text))
    }

    pub fn parse(text: &str) -> SchedulerResult<Self> {
        Self::try_parse(text).unwrap_or_else(|| {
            Err(SchedulerError::invalid_schedule(text, "CRON表达式必须包含5个字段"))
        })
    }

    fn parse_fields(source: &str, fields: &str) -> SchedulerResult<Self> {
        let parts: Vec<&str> = fields.split_whitespace().collect();
        let [minute, hour, dom, month, dow] = parts[..] else {
            return Err(SchedulerError::invalid_schedule(source, "CRON表达式必须包含5个字段"));
        };
        let invalid = |message: String| SchedulerError::invalid_schedule(source, message);

        for (field, bounds) in [(minute, &MINUTE), (hour, &HOUR), (dom, &DAY_OF_MONTH), (month, &MONTH)] {
            check_bounds(field, bounds).map_err(invalid)?;
        }
        let weekdays = weekday_field(dow).map_err(invalid)?;

        let day_fields = if is_restricted(dom) && is_restricted(dow) {
            vec![(wildcard(dom), "*"), ("*", weekdays.as_str())]
        } else {
            vec![(wildcard(dom), weekdays.as_str())]
        };
        let schedules = day_fields
            .into_iter()
            .map(|(days, weekdays)| {
                let expression = format!(
                    "0 {} {} {days} {} {weekdays}",
                    wildcard(minute),
                    wildcard(hour),
                    wildcard(month)
                );
                Schedule::from_str(&expression).map_err(|e| invalid(e.to_string()))
            })
            .collect::<SchedulerResult<Vec<_>>>()?;

        Ok(Self {
            source: source.to_string(),
            schedules,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 严格晚于 `after` 的第一个匹配的整分钟
    pub fn next_after(&self, after: DateTime<Utc>) -> SchedulerResult<DateTime<Utc>> {
        let limit = after + Duration::days(SEARCH_WINDOW_DAYS);
        self.schedules
            .iter()
            .filter_map(|schedule| schedule.after(&after).next())
            .min()
            .filter(|next| *next <= limit)
            .ok_or_else(|| SchedulerError::ScheduleUnsatisfiable {
                schedule: self.source.clone(),
            })
    }

    pub fn matches(&self, at: DateTime<Utc>) -> bool {
        self.schedules.iter().any(|schedule| schedule.includes(at))
    }
}

impl PartialEq for CronExpression {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

impl Eq for CronExpression {}

impl fmt::Debug for CronExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronExpression")
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

fn macro_expansion(name: &str) -> Option<&'static str> {
    match name.to_ascii_lowercase().as_str() {
        "yearly" | "annually" => Some("0 0 1 1 *"),
        "monthly" => Some("0 0 1 * *"),
        "weekly" => Some("0 0 * * 0"),
        "daily" | "midnight" => Some("0 0 * * *"),
        "hourly" => Some("0 * * * *"),
        _ => None,
    }
}

/// 以 `*` 或 `?` 开头的字段视为不受限
fn is_restricted(field: &str) -> bool {
    !(field.starts_with('*') || field.starts_with('?'))
}

fn wildcard(field: &str) -> &str {
    if field == "?" {
        "*"
    } else {
        field
    }
}

/// 数值越界或步长为 0 时给出字段名；名称和语法错误留给 `cron` crate 报告
fn check_bounds(field: &str, bounds: &FieldBounds) -> Result<(), String> {
    for part in field.split(',') {
        let range = match part.split_once('/') {
            Some((range, step)) => {
                if step.parse::<u32>().is_ok_and(|step| step == 0) {
                    return Err(format!("{}字段步长不能为 0: {part}", bounds.name));
                }
                range
            }
            None => part,
        };
        for value in range.split('-') {
            if let Ok(number) = value.parse::<u32>() {
                if number < bounds.min || number > bounds.max {
                    return Err(format!(
                        "{}字段取值 {number} 超出范围 {}-{}",
                        bounds.name, bounds.min, bounds.max
                    ));
                }
            }
        }
    }
    Ok(())
}

/// 把星期字段展开成英文缩写列表
///
/// `cron` crate 的星期编号从周日 = 1 开始，用缩写可以绕开两种编号的差异。
fn weekday_field(field: &str) -> Result<String, String> {
    if field == "*" || field == "?" {
        return Ok("*".to_string());
    }

    let mut days = [false; 7];
    for part in field.split(',') {
        let (range, step) = match part.split_once('/') {
            Some((range, step)) => {
                let step = step
                    .parse::<usize>()
                    .ok()
                    .filter(|step| *step > 0)
                    .ok_or_else(|| format!("星期字段步长无效: {part}"))?;
                (range, Some(step))
            }
            None => (part, None),
        };

        let (start, end) = match range {
            "*" | "?" => (0, 6),
            _ => match range.split_once('-') {
                Some((start, end)) => (weekday(start)?, weekday(end)?),
                // `a/n` 表示从 a 开始到周日（7）
                None => {
                    let day = weekday(range)?;
                    (day, if step.is_some() { 7 } else { day })
                }
            },
        };
        if start > end {
            return Err(format!("星期字段范围无效: {part}"));
        }
        for day in (start..=end).step_by(step.unwrap_or(1)) {
            days[day % 7] = true;
        }
    }

    Ok(WEEKDAY_NAMES
        .iter()
        .zip(days)
        .filter(|(_, selected)| *selected)
        .map(|(name, _)| *name)
        .collect::<Vec<_>>()
        .join(","))
}

fn weekday(value: &str) -> Result<usize, String> {
    let day = match value.parse::<usize>() {
        Ok(number) => number,
        Err(_) => WEEKDAY_NAMES
            .iter()
            .position(|name| name.eq_ignore_ascii_case(value))
            .ok_or_else(|| format!("星期字段取值无效: {value}"))?,
    };
    if day > 7 {
        return Err(format!("星期字段取值 {day} 超出范围 0-7"));
    }
    Ok(day)
}
