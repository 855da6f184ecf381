pub mod control;
pub mod geometry;
pub mod hardware;
pub mod io;
pub mod link;
pub mod mission;
pub mod sim;
pub mod system;
pub mod velocity;
pub mod vision;
