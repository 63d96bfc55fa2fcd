//! 调度表达式
//!
//! 支持五种写法，按 [`NOTATION_PRECEDENCE`] 的固定顺序依次尝试，第一个识别成功的写法生效：
//!
//! 1. 秒数：`"60"`
//! 2. ISO8601 时间点：`"2025-01-01T00:00:00Z"`（一次性）
//! 3. ISO8601 时长：`"PT30M"`、`"P1D"`
//! 4. 相对时间：`"1 minute"`、`"2 hours 30 minutes"`、`"tomorrow"`、`"next monday"`
//! 5. CRON 表达式（5 个字段，分钟精度）：`"0 0 * * *"`
//!
//! 写法一旦被识别，其内部的格式错误直接报告为 `InvalidSchedule`，不再回退到后续写法。

pub mod cron;
pub mod iso8601;
pub mod relative;

use std::fmt;

use chrono::{DateTime, Months, Utc};

use periodic_core::{SchedulerError, SchedulerResult};

pub use self::cron::CronExpression;
pub use self::relative::RelativePoint;

/// 调度写法
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notation {
    Seconds,
    IsoInstant,
    IsoDuration,
    Relative,
    Cron,
}

/// 写法的识别顺序，含义重叠的字面量据此确定性地归属
pub const NOTATION_PRECEDENCE: [Notation; 5] = [
    Notation::Seconds,
    Notation::IsoInstant,
    Notation::IsoDuration,
    Notation::Relative,
    Notation::Cron,
];

impl Notation {
    /// `None` 表示文本不属于该写法；`Some(Err)` 表示属于该写法但格式错误
    pub fn try_parse(self, text: &str) -> Option<SchedulerResult<ScheduleExpression>> {
        match self {
            Notation::Seconds => parse_seconds(text),
            Notation::IsoInstant => iso8601::parse_instant(text).map(|at| Ok(ScheduleExpression::At(at))),
            Notation::IsoDuration => iso8601::parse_duration(text)
                .map(|parsed| parsed.map(ScheduleExpression::Interval)),
            Notation::Relative => relative::parse(text).map(Ok),
            Notation::Cron => CronExpression::try_parse(text)
                .map(|parsed| parsed.map(ScheduleExpression::Cron)),
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Notation::Seconds => "seconds",
            Notation::IsoInstant => "iso8601_instant",
            Notation::IsoDuration => "iso8601_duration",
            Notation::Relative => "relative",
            Notation::Cron => "cron",
        }
    }
}

/// 固定间隔，月份部分按日历月累加
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Interval {
    pub months: u32,
    pub seconds: u64,
}

impl Interval {
    pub fn from_seconds(seconds: u64) -> Self {
        Self { months: 0, seconds }
    }

    pub fn is_zero(&self) -> bool {
        self.months == 0 && self.seconds == 0
    }

    pub fn add_to(&self, at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let at = if self.months > 0 {
            at.checked_add_months(Months::new(self.months))?
        } else {
            at
        };
        let seconds = i64::try_from(self.seconds).ok()?;
        at.checked_add_signed(chrono::Duration::try_seconds(seconds)?)
    }
}

/// 解析后的调度表达式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScheduleExpression {
    /// 固定间隔：秒数、ISO8601 时长或相对时长
    Interval(Interval),
    /// 一次性时间点
    At(DateTime<Utc>),
    /// 尚未锚定的相对时间点，每次都相对 `after` 求值
    RelativePoint(RelativePoint),
    Cron(CronExpression),
}

impl ScheduleExpression {
    pub fn parse(text: &str) -> SchedulerResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SchedulerError::invalid_schedule(text, "调度表达式为空"));
        }

        for notation in NOTATION_PRECEDENCE {
            if let Some(result) = notation.try_parse(text) {
                return result;
            }
        }

        Err(SchedulerError::invalid_schedule(text, "不支持的调度格式"))
    }

    /// 严格晚于 `after` 的最早一次运行时间
    ///
    /// 一次性时间点已过去时返回 `Ok(None)`；CRON 表达式在搜索窗口内找不到匹配时返回
    /// `ScheduleUnsatisfiable`。
    pub fn next(&self, after: DateTime<Utc>) -> SchedulerResult<Option<DateTime<Utc>>> {
        match self {
            ScheduleExpression::Interval(interval) => Ok(interval.add_to(after)),
            ScheduleExpression::At(at) => Ok((*at > after).then_some(*at)),
            ScheduleExpression::RelativePoint(point) => Ok(point.resolve(after)),
            ScheduleExpression::Cron(cron) => cron.next_after(after).map(Some),
        }
    }

    /// 将相对时间点锚定为注册时刻之后的固定时间点，其他表达式原样返回
    pub fn anchored(self, reference: DateTime<Utc>) -> Self {
        match self {
            ScheduleExpression::RelativePoint(point) => match point.resolve(reference) {
                Some(at) => ScheduleExpression::At(at),
                None => ScheduleExpression::RelativePoint(point),
            },
            other => other,
        }
    }

    pub fn is_one_shot(&self) -> bool {
        matches!(
            self,
            ScheduleExpression::At(_) | ScheduleExpression::RelativePoint(_)
        )
    }
}

impl fmt::Display for ScheduleExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScheduleExpression::Interval(interval) if interval.months == 0 => {
                write!(f, "every {}s", interval.seconds)
            }
            ScheduleExpression::Interval(interval) => {
                write!(f, "every {} month(s) {}s", interval.months, interval.seconds)
            }
            ScheduleExpression::At(at) => write!(f, "at {}", at.to_rfc3339()),
            ScheduleExpression::RelativePoint(point) => write!(f, "{point}"),
            ScheduleExpression::Cron(cron) => write!(f, "cron {}", cron.source()),
        }
    }
}

fn parse_seconds(text: &str) -> Option<SchedulerResult<ScheduleExpression>> {
    if text.is_empty() || !text.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let result = match text.parse::<u64>() {
        Ok(0) => Err(SchedulerError::invalid_schedule(text, "间隔秒数必须大于0")),
        Ok(seconds) => Ok(ScheduleExpression::Interval(Interval::from_seconds(seconds))),
        Err(e) => Err(SchedulerError::invalid_schedule(text, e.to_string())),
    };
    Some(result)
}
