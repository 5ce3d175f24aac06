pub mod commands;
pub mod constants;
pub mod scheduler;
pub mod state;
pub mod sweep;
pub mod systems;
pub mod world;
