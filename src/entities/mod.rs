pub mod detection_result;
pub mod image;
pub mod session;
pub mod user;
