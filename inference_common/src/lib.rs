pub mod bbox;
pub mod class_names;
pub mod frame_times;
pub mod nms;
pub mod output;
pub mod render;
