pub mod session;
pub mod yolo;
