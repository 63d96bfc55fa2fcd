use std::io::{self, Write};
use std::sync::Mutex;

use periodic_core::{MessageBus, SchedulerError, SchedulerMessage, SchedulerResult};

/// 周期任务进程一侧的消息总线
///
/// 每条消息序列化为一行 JSON 写到标准输出，由监督进程中的 `CommandTrigger` 读取并转发。
/// 日志走标准错误，标准输出只承载协议消息。
pub struct StdoutMessageBus {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl StdoutMessageBus {
    pub fn new() -> Self {
        Self::with_writer(Box::new(io::stdout()))
    }

    pub fn with_writer(writer: Box<dyn Write + Send>) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }
}

impl Default for StdoutMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus for StdoutMessageBus {
    fn publish(&self, message: SchedulerMessage) -> SchedulerResult<()> {
        let line = message.serialize()?;
        let mut writer = self
            .writer
            .lock()
            .map_err(|_| SchedulerError::MessageBus("标准输出写入锁已损坏".to_string()))?;
        writeln!(writer, "{line}")?;
        writer.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_writes_one_parseable_line_per_message() {
        let buffer = SharedBuffer::default();
        let bus = StdoutMessageBus::with_writer(Box::new(buffer.clone()));

        bus.publish(SchedulerMessage::process_started(3)).unwrap();
        bus.publish(SchedulerMessage::process_started(4)).unwrap();

        let output = String::from_utf8(buffer.0.lock().unwrap().clone()).unwrap();
        let parsed: Vec<SchedulerMessage> = output
            .lines()
            .filter_map(SchedulerMessage::from_output_line)
            .collect();
        assert_eq!(
            parsed,
            vec![
                SchedulerMessage::process_started(3),
                SchedulerMessage::process_started(4)
            ]
        );
    }
}
