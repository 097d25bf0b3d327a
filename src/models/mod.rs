pub mod completed_task;
pub mod project_detail;
pub mod project_issue;
pub mod raw_task;
pub mod sync_report;
pub mod weekly_order;
