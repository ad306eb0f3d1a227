pub mod task;
pub mod task_event;

pub use task::{NewTask, Task};
pub use task_event::TaskEvent;
