mod async_task_scheduler;


pub use async_task_scheduler::*;
