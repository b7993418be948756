pub mod barrier;
pub mod command_buffer;
pub mod command_list;
pub mod fence;
pub mod submit_info;
