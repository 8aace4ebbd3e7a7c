pub mod annotations;
pub mod detector;
pub mod pipeline;
pub mod records;
pub mod result_log;
pub mod storage;
