//! 周期任务进程一侧的运行时，以及监督进程用来启动它的执行触发器

pub mod executors;
pub mod privileges;
pub mod process;
pub mod stdout_bus;
pub mod trigger;

pub use executors::CommandHandler;
pub use privileges::switch_identity;
pub use process::PeriodicProcess;
pub use stdout_bus::StdoutMessageBus;
pub use trigger::CommandTrigger;
