//! ISO8601 时间点与时长

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};

use periodic_core::{SchedulerError, SchedulerResult};

use super::Interval;

const NAIVE_FORMATS: [&str; 4] = [
    "%Y-%m-%dT%H:%M:%S",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M",
];

/// 解析时间点，无时区信息时按 UTC 处理
pub fn parse_instant(text: &str) -> Option<DateTime<Utc>> {
    if let Ok(at) = DateTime::parse_from_rfc3339(text) {
        return Some(at.with_timezone(&Utc));
    }
    for format in NAIVE_FORMATS {
        if let Ok(naive) = NaiveDateTime::parse_from_str(text, format) {
            return Some(naive.and_utc());
        }
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
}

/// 解析 `PnYnMnWnDTnHnMnS` 形式的时长
///
/// 以 `P` 开头且后跟数字或 `T` 的文本即视为时长写法。
pub fn parse_duration(text: &str) -> Option<SchedulerResult<Interval>> {
    let upper = text.to_ascii_uppercase();
    let body = upper.strip_prefix('P')?;
    match body.chars().next() {
        Some(c) if c.is_ascii_digit() || c == 'T' => {}
        _ => return None,
    }
    Some(parse_duration_body(body).map_err(|message| SchedulerError::invalid_schedule(text, message)))
}

fn parse_duration_body(body: &str) -> Result<Interval, String> {
    let (date_part, time_part) = match body.split_once('T') {
        Some((date, time)) => {
            if time.is_empty() {
                return Err("T 之后缺少时间部分".to_string());
            }
            (date, Some(time))
        }
        None => (body, None),
    };

    let mut months: u64 = 0;
    let mut seconds: u64 = 0;

    for (value, designator) in components(date_part, &['Y', 'M', 'W', 'D'])? {
        match designator {
            'Y' => months = checked(months, value, 12)?,
            'M' => months = checked(months, value, 1)?,
            'W' => seconds = checked(seconds, value, 7 * 86_400)?,
            'D' => seconds = checked(seconds, value, 86_400)?,
            other => return Err(format!("未知的时长单位: {other}")),
        }
    }

    if let Some(time_part) = time_part {
        for (value, designator) in components(time_part, &['H', 'M', 'S'])? {
            match designator {
                'H' => seconds = checked(seconds, value, 3_600)?,
                'M' => seconds = checked(seconds, value, 60)?,
                'S' => seconds = checked(seconds, value, 1)?,
                other => return Err(format!("未知的时长单位: {other}")),
            }
        }
    }

    let months = u32::try_from(months).map_err(|_| "时长超出范围".to_string())?;
    let interval = Interval { months, seconds };
    if interval.is_zero() {
        return Err("时长必须大于0".to_string());
    }
    Ok(interval)
}

/// 按给定顺序拆出 `数字+单位` 组件，单位必须按顺序出现且不可重复
fn components(part: &str, order: &[char]) -> Result<Vec<(u64, char)>, String> {
    let mut result = Vec::new();
    let mut digits = String::new();
    let mut position = 0;

    for c in part.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        let index = order
            .iter()
            .position(|d| *d == c)
            .ok_or_else(|| format!("未知的时长单位: {c}"))?;
        if index < position || result.iter().any(|(_, d)| *d == c) {
            return Err(format!("时长单位顺序错误: {c}"));
        }
        if digits.is_empty() {
            return Err(format!("时长单位 {c} 前缺少数字"));
        }
        let value = digits
            .parse::<u64>()
            .map_err(|e| format!("无效的时长数值 {digits}: {e}"))?;
        result.push((value, c));
        digits.clear();
        position = index + 1;
    }

    if !digits.is_empty() {
        return Err(format!("数字 {digits} 后缺少时长单位"));
    }
    Ok(result)
}

fn checked(total: u64, value: u64, factor: u64) -> Result<u64, String> {
    value
        .checked_mul(factor)
        .and_then(|v| total.checked_add(v))
        .ok_or_else(|| "时长超出范围".to_string())
}
